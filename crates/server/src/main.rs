//! ReAct agent server
//!
//! Serves the agent over HTTP and logs every GenAI span.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use react_agent_server::{AppState, ConfigInfo, ServerConfig, build_agent, router};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    init_logging(config.json_logs)?;

    info!(service = %config.service_name, "Agent server starting");

    let agent = build_agent(&config)?;
    let info = ConfigInfo::new(&config, agent.as_deref());
    info!(
        model_configured = info.model_configured,
        telemetry_connection_string_set = info.telemetry_connection_string_set,
        deployment = %info.deployment,
        agent = %info.agent_name,
        "Configuration loaded"
    );

    let app = router(AppState { agent, info }).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.listen_addr.parse().context("Invalid LISTEN_ADDR")?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
