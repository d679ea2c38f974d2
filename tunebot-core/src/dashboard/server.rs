use std::net::SocketAddr;
use std::time::Duration;

use axum_server::{Handle, Server};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dashboard::routes::{router, DashboardState};

/// Binds the dashboard on `addr` and serves it until the event bus shuts
/// down. In-flight requests get a few seconds to finish.
pub fn spawn_dashboard(addr: SocketAddr, state: DashboardState) -> JoinHandle<()> {
    let bus = state.bus.clone();
    let app = router(state);

    let handle = Handle::new();
    let handle_clone = handle.clone();
    tokio::spawn(async move {
        bus.wait_for_shutdown().await;
        handle_clone.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    info!("Dashboard listening on http://{}", addr);
    let server = Server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Dashboard server error: {}", e);
        }
        info!("Dashboard server shut down.");
    })
}
