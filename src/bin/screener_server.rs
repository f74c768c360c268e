use std::sync::Arc;

use coindash::{
    demo_snapshot, init_logging, load_snapshot_pair, log_app_bind, log_app_start,
    log_screener_config, log_source_selected, logging_config_from_env, screener_config_from_env,
    screener_router_with_config, InMemorySnapshotSource, ServerConfig, SnapshotError,
    SnapshotOrigin, SnapshotSource, SCREENER_ROUTES,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let server_cfg = ServerConfig::from_env()?;
    let screener_cfg = screener_config_from_env()?;
    log_screener_config(&screener_cfg);

    let source: Arc<dyn SnapshotSource> = Arc::new(source_from_config(&server_cfg)?);
    let app = screener_router_with_config(source, screener_cfg);
    let listener = tokio::net::TcpListener::bind(server_cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr, &SCREENER_ROUTES);
    axum::serve(listener, app).await?;

    Ok(())
}

fn source_from_config(cfg: &ServerConfig) -> Result<InMemorySnapshotSource, SnapshotError> {
    let (origin, pair) = match cfg.snapshot_paths() {
        Some((live, historical)) => (
            SnapshotOrigin::Files { live, historical },
            load_snapshot_pair(live, historical)?,
        ),
        None if cfg.use_demo => (
            SnapshotOrigin::Demo {
                reason: "COINDASH_USE_DEMO",
            },
            demo_snapshot(),
        ),
        None => (
            SnapshotOrigin::Demo {
                reason: "snapshot_paths_unset",
            },
            demo_snapshot(),
        ),
    };

    log_source_selected(origin, &pair);
    Ok(InMemorySnapshotSource::new(pair))
}
