use et_service::{ServiceConfig, TunerService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    let service = TunerService::new(config.optimizer.clone())?;

    let listener = TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "tuner service listening");

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let service = service.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let _ = socket.read(&mut buffer).await;

            let body = match serde_json::to_string(&service.health()) {
                Ok(body) => body,
                Err(e) => {
                    warn!(%peer, error = %e, "failed to encode health response");
                    return;
                }
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );

            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
    }
}
