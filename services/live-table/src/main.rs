use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sixdice_execution::InMemoryLedger;
use sixdice_live_table::{
    api::Api,
    clock::SystemClock,
    config::{build_config, Args},
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);
    let config = build_config(&args)?;

    let ledger = Arc::new(InMemoryLedger::new());
    let table = sixdice_live_table::start(&config, ledger, Arc::new(SystemClock))
        .context("failed to start table")?;
    let app = Api::new(table.state.clone()).router();

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        addr = %config.listen,
        tick_ms = config.tick_ms,
        betting_ms = config.engine.phases.betting_ms,
        six_match = ?config.engine.rules.six_match,
        operator_routes = config.operator_token.is_some(),
        "live table listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("axum server error")?;
    table.actor.abort();
    Ok(())
}
