//! HTTP bridge for the OTC desk.
//!
//! Endpoints: health, intents, unreachable users, restart broadcast, snapshot.
//! Env: `PORT`, `STATE_PATH`, plus the desk settings read by `DeskConfig::from_env`.

use otc_proximity_desk::api::{self, AppState};
use otc_proximity_desk::audit::LogAuditSink;
use otc_proximity_desk::persistence::FilePersistence;
use otc_proximity_desk::{Desk, DeskConfig};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let state_path = std::env::var("STATE_PATH").unwrap_or_else(|_| "storage/state.json".into());

    let config = DeskConfig::from_env();
    log::info!(
        "desk config assets={} radius_km={} fallback_k={}",
        config.supported_assets.join(","),
        config.match_radius_km,
        config.fallback_k
    );
    let desk = Arc::new(Desk::with_audit(config, Arc::new(LogAuditSink)));
    let persistence = FilePersistence::new(&state_path);
    // Starting empty would overwrite the unreadable file on the first save.
    match persistence.load() {
        Ok(Some(state)) => {
            if let Err(e) = desk.restore(state) {
                log::error!("state restore failed path={} error={}", state_path, e);
                std::process::exit(1);
            }
        }
        Ok(None) => log::info!("no saved state path={}", state_path),
        Err(e) => {
            log::error!("state load failed path={} error={}", state_path, e);
            std::process::exit(1);
        }
    }
    // The gateway fetches these from POST /lifecycle/restart and delivers them.
    log::info!(
        "restart broadcast ready users={}",
        desk.restart_notifications().len()
    );

    let app = api::create_router(AppState::new(desk, Some(persistence)));

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("bind");
    log::info!("OTC desk is running on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .expect("serve");
}
