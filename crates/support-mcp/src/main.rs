mod config;
mod error;
mod server;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use support_core::faq::FaqSnapshot;
use support_core::ticket::TicketRegistry;
use support_core::tools::Toolkit;

use config::Config;
use server::SupportToolsServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting support MCP server");

    let config = Config::from_env()?;
    let corpus = config.load_corpus()?;
    info!(entries = corpus.len(), path = ?config.faq_path, "faq corpus loaded");

    let server = SupportToolsServer::new(Toolkit::new(
        FaqSnapshot::new(corpus),
        TicketRegistry::new(),
    ));

    match std::env::var("MCP_TCP_LISTEN_ADDR") {
        Ok(addr) => serve_tcp(server, &addr).await,
        Err(_) => serve_stdio(server).await,
    }
}

async fn serve_stdio(server: SupportToolsServer) -> anyhow::Result<()> {
    info!("MCP server ready, serving on stdio");
    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "MCP server error"))?;
    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}

/// One MCP session per accepted connection; sessions share the toolkit.
async fn serve_tcp(server: SupportToolsServer, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(listen_addr = %addr, "MCP server ready, serving on TCP");
    loop {
        let (stream, peer) = listener.accept().await?;
        let session = server.clone();
        tokio::spawn(async move {
            info!(%peer, "MCP client connected");
            match session.serve(stream).await {
                Ok(service) => {
                    if let Err(e) = service.waiting().await {
                        tracing::warn!(%peer, error = %e, "MCP session ended with error");
                    }
                }
                Err(e) => tracing::error!(%peer, error = %e, "MCP handshake failed"),
            }
            info!(%peer, "MCP client disconnected");
        });
    }
}
