use crate::error::Result;
use crate::server::{Server, ServerConfig};

/// Runs the rendezvous server in the foreground until interrupted.
pub async fn run(port: u16) -> Result<()> {
    let server = Server::bind(ServerConfig {
        port,
        ..ServerConfig::default()
    })
    .await?;
    server.run().await
}
