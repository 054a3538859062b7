use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub(crate) fn api_router() -> Router {
    Router::new()
        .nest("/channel", crate::handler::channel::channel_router())
        .nest("/system", crate::handler::system::system_router())
}

pub(crate) fn start_api_server(listen: String, cancel: CancellationToken) {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Error binding API server to {}: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", listen);
        if let Err(e) = axum::serve(listener, api_router())
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error starting API server: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("Shutting down API server...");
        }
    }
}
