use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use ldap_manager::auth::ratelimit::LoginRateLimiter;
use ldap_manager::auth::session::build_store;
use ldap_manager::cache::manager::CacheManager;
use ldap_manager::config::Config;
use ldap_manager::http::routes;
use ldap_manager::http::state::AppState;
use ldap_manager::ldap::client::DirectoryClient;
use ldap_manager::ldap::pool::ConnectionPool;
use ldap_manager::shutdown::{self, Handles};
use ldap_manager::template_cache::TemplateCache;
use tracing_subscriber::EnvFilter;

const RATE_LIMIT_THRESHOLD: u32 = 5;
const RATE_LIMIT_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(5 * 60);
const RATE_LIMIT_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const TEMPLATE_CACHE_MAX_ENTRIES: usize = 2048;
const TEMPLATE_CACHE_DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(60);
const TEMPLATE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "fatal error during startup or shutdown");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let mut handles = Handles::default();

    let mut pool = ConnectionPool::new(
        config.ldap_server.clone(),
        config.ldap_base_dn.clone(),
        config.ldap_is_ad,
        config.pool,
    );
    if config.cache_enabled() {
        // Keep the service account's connections warm, the one identity
        // the reaper knows ahead of time to replenish (spec §4.3).
        pool = pool.with_floor_credentials(
            config.ldap_readonly_user.clone().expect("checked by cache_enabled"),
            config.ldap_readonly_password.clone().expect("checked by cache_enabled"),
        );
    }
    let pool = Arc::new(pool);
    handles.push(pool.clone().spawn_reaper());

    let cache = if config.cache_enabled() {
        let ro_user = config.ldap_readonly_user.clone().expect("checked by cache_enabled");
        let ro_password = config.ldap_readonly_password.clone().expect("checked by cache_enabled");

        let reader = DirectoryClient::connect(
            &config.ldap_server,
            &config.ldap_base_dn,
            &ro_user,
            &ro_password,
            config.ldap_is_ad,
            config.pool.connection_timeout,
        )
        .await?;
        let manager = Arc::new(CacheManager::new(Arc::new(reader)));

        let (tx, rx) = tokio::sync::watch::channel(false);
        handles.push(tx);
        let refresh_interval = config.refresh_interval;
        let manager_for_loop = manager.clone();
        shutdown::spawn_supervised("cache-manager-refresh", move || {
            let manager = manager_for_loop.clone();
            let rx = rx.clone();
            manager.run(refresh_interval, rx)
        });

        Some(manager)
    } else {
        tracing::warn!("LDAP_READONLY_USER/LDAP_READONLY_PASSWORD not set, cache disabled");
        None
    };

    let sessions = build_store(config.persist_sessions, &config.session_path)?;

    let rate_limiter = Arc::new(LoginRateLimiter::new(RATE_LIMIT_THRESHOLD, RATE_LIMIT_COOLDOWN));
    handles.push(rate_limiter.clone().spawn_cleanup(RATE_LIMIT_CLEANUP_INTERVAL));

    let template_cache = Arc::new(TemplateCache::new(TEMPLATE_CACHE_MAX_ENTRIES, TEMPLATE_CACHE_DEFAULT_TTL));
    handles.push(template_cache.clone().spawn_sweeper(TEMPLATE_SWEEP_INTERVAL));

    let state = AppState {
        config: config.clone(),
        pool: pool.clone(),
        cache,
        sessions,
        rate_limiter,
        template_cache,
    };

    let app = routes::build(state, "static");

    let addr = listen_addr(&config.listen_addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown::wait_for_signal());

    // Bounded drain (spec §5): a connection that won't close on its own
    // doesn't get to block shutdown forever.
    match tokio::time::timeout(std::time::Duration::from_secs(30), serve).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!("graceful shutdown timed out after 30s, forcing exit"),
    }

    handles.stop_all();
    pool.close().await;

    Ok(())
}

/// `LISTEN_ADDR` may be given as `:3000` (bind all interfaces) or a full
/// `host:port` pair.
fn listen_addr(raw: &str) -> SocketAddr {
    let full = if raw.starts_with(':') { format!("0.0.0.0{raw}") } else { raw.to_string() };
    full.parse().unwrap_or_else(|_| "0.0.0.0:3000".parse().unwrap())
}
