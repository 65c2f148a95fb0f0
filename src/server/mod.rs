//! permgate server implementation
//!
//! Serves the token endpoint over HTTP and runs the keep-warm ticker.

mod http;
mod warm;

pub use http::{
    create_router, AppState, ErrorBody, PermgateServer, ServerConfig, TokenQuery,
    DEFAULT_IDENTITY_HEADER, DEFAULT_WARM_INTERVAL,
};
pub use warm::Warmer;

use tokio::signal;

/// Resolves on ctrl-c or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
