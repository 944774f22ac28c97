//! Stand-in services for developing and testing the relying party without a
//! real identity provider.

use std::net::SocketAddr;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod idp;

/// Arguments shared by every fixture binary
#[derive(Parser, Debug, Clone)]
pub struct FixtureArgs {
    /// Port to listen on, 0 picks a free one
    #[arg(short, long, default_value = "0")]
    pub port: u16,

    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
}

impl FixtureArgs {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Serve `app` in the foreground with request tracing.
pub async fn run_server(args: FixtureArgs, app: Router) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let listener = tokio::net::TcpListener::bind(args.addr()?).await?;
    info!(addr = %listener.local_addr()?, "Fixture server listening");

    axum::serve(listener, app.layer(TraceLayer::new_for_http())).await?;
    Ok(())
}
