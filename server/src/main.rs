use color_eyre::eyre::WrapErr as _;
use tracing::info;

use oidc_rp::{routes, telemetry, AppState, Config};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::setup_tracing()?;

    // Fail before starting anything if the environment is incomplete
    let config = Config::from_env().wrap_err("Invalid configuration")?;

    let _sentry_guard = telemetry::setup_sentry(config.sentry_dsn.as_deref());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { run_server(config).await })
}

async fn run_server(config: Config) -> color_eyre::Result<()> {
    let bind_addr = config.bind_addr;
    let app_state = AppState::from_config(config).await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, routes::routes(app_state))
        .await
        .wrap_err("Server error")?;

    Ok(())
}
