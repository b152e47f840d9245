use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:9000".to_string());
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("signal server listening on {addr}");

    let shutdown_signal = async {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, terminating");
        }
    };

    tokio::select! {
        _ = frost_signal_server::run(listener) => {},
        _ = shutdown_signal => {},
    }
}
