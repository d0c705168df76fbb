use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boldem_relay::{smtp, BoldemTransport, TransportConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = format!(
        "0.0.0.0:{}",
        std::env::var("PORT").unwrap_or_else(|_| "25".into())
    );

    let domain: Arc<str> = std::env::var("DOMAIN")
        .unwrap_or_else(|_| "localhost".into())
        .into();

    let config = TransportConfig::from_env().context("loading Boldem configuration")?;
    tracing::info!(api_url = %config.api_url, "boldem-relay for {domain} started");
    let transport = Arc::new(BoldemTransport::new(config).context("building Boldem transport")?);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Listening on: {}", addr);

    // Main loop: accept connections and spawn a task to handle them
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::info!("Accepted a connection from {}", addr);

        let domain = Arc::clone(&domain);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let smtp = smtp::Server::new(&*domain, stream, transport);
            if let Err(err) = smtp.serve().await {
                tracing::warn!("Connection from {addr} ended with error: {err:#}");
            }
        });
    }
}
