use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rttp_proxy::config::Config;
use rttp_proxy::routes::{self, ProxyState};
use rttp_proxy::server::Server;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::parse();

    let state = ProxyState::from_config(&config)?;
    info!(
        upstream = %config.upstream,
        ttl = ?config.ttl(),
        timeout = ?config.upstream_timeout(),
        "proxy configured"
    );
    let pipeline = Arc::new(routes::pipeline(&state));

    let server = Server::bind(config.bind_addr()).await?;
    server
        .run_until(
            move |req| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(req).await }
            },
            shutdown_signal(),
        )
        .await?;

    info!("proxy stopped");
    Ok(())
}
