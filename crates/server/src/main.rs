//! Netplay relay server binary.
//!
//! Usage: `padlink-server [port]` (default port 6400).

use padlink_protocol::DEFAULT_PORT;
use padlink_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u16>()?,
        None => DEFAULT_PORT,
    };

    let mut server = Server::new(ServerConfig::default());
    let port = server.open(port).await?;
    println!("Listening on port {port}...");

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}
