use std::sync::Arc;

use clap::Parser;
use fixtures::{
    idp::{self, IdpState},
    run_server, FixtureArgs,
};

/// Fake OpenID provider for local development
#[derive(Parser, Debug)]
#[clap(name = "idp-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,

    /// Public base URL advertised in discovery. Defaults to the bind address.
    #[arg(long)]
    issuer: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let issuer = match args.issuer {
        Some(issuer) => issuer,
        None => format!("http://{}", args.common.addr()?),
    };
    let state = Arc::new(IdpState::new(issuer));

    run_server(args.common, idp::router(state)).await
}
