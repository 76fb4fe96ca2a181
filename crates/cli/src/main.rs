//! ReAct agent CLI
//!
//! Ask the agent directly or talk to a running server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use react_agent_core::{
    AgentConfig, AgentReply, AgentSession, CompositeSink, InMemorySink, ModelReasoner, SpanEmitter, SpanRecord,
    SpanStatus, TracingSink, Usage,
};
use react_agent_openai::{AzureOpenAiClient, OpenAiConfig};
use react_agent_tools::builtin_registry;

#[derive(Parser)]
#[command(name = "react-agent")]
#[command(about = "ReAct agent with GenAI tracing")]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent locally against Azure OpenAI
    Ask {
        /// Question to ask; reads questions from stdin when omitted
        message: Option<String>,

        #[command(flatten)]
        model: ModelArgs,

        /// Print the span tree after each answer
        #[arg(long)]
        spans: bool,
    },

    /// List the built-in tools
    Tools,

    /// Send a message to a running server
    Chat {
        message: String,

        /// Server base URL
        #[arg(long, env = "AGENT_SERVER_URL", default_value = "http://127.0.0.1:8000")]
        server: String,
    },

    /// Show a running server's configuration
    Config {
        /// Server base URL
        #[arg(long, env = "AGENT_SERVER_URL", default_value = "http://127.0.0.1:8000")]
        server: String,
    },
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    endpoint: String,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT_NAME", default_value = "gpt-4o")]
    deployment: String,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2024-10-21")]
    api_version: String,

    #[arg(long, env = "AGENT_NAME", default_value = "demo-agent")]
    agent_name: String,

    /// Reported as gen_ai.agent.id
    #[arg(long, env = "AGENT_ID")]
    agent_id: Option<String>,

    #[arg(long, env = "AGENT_MAX_ITERATIONS", default_value = "5")]
    max_iterations: u32,

    /// Wall-clock budget per question in seconds
    #[arg(long, env = "AGENT_MAX_DURATION_SECS", default_value = "60")]
    max_duration: u64,

    /// Per-call tool timeout in seconds
    #[arg(long, env = "AGENT_TOOL_TIMEOUT_SECS", default_value = "10")]
    tool_timeout: u64,

    /// Clarifying re-prompts for an unparseable model response
    #[arg(long, env = "AGENT_MALFORMED_RETRIES", default_value = "1")]
    malformed_retries: u32,
}

impl ModelArgs {
    fn agent_config(&self) -> AgentConfig {
        let config = AgentConfig::default()
            .with_agent_name(&self.agent_name)
            .with_model(&self.deployment)
            .with_max_iterations(self.max_iterations)
            .with_max_duration(Duration::from_secs(self.max_duration))
            .with_tool_timeout(Duration::from_secs(self.tool_timeout))
            .with_malformed_retries(self.malformed_retries);
        match self.agent_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => config.with_agent_id(id),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Ask { message, model, spans } => ask(message, model, spans).await?,

        Commands::Tools => {
            let registry = builtin_registry(Duration::from_secs(10));
            println!("Built-in tools:");
            for definition in registry.definitions() {
                println!();
                println!("  {}", definition.name);
                println!("    {}", definition.description);
                for parameter in &definition.parameters {
                    let required = if parameter.required { "required" } else { "optional" };
                    println!("    - {} ({required}): {}", parameter.name, parameter.description);
                }
            }
        }

        Commands::Chat { message, server } => {
            let url = format!("{}/api/chat", server.trim_end_matches('/'));
            let resp = reqwest::Client::new()
                .post(&url)
                .json(&serde_json::json!({ "message": message }))
                .send()
                .await
                .with_context(|| format!("Failed to reach {url}"))?;

            let status = resp.status();
            let body: ChatResponse = resp.json().await.context("Failed to parse server response")?;
            if !body.success {
                bail!("Server returned {status}: {}", body.error.unwrap_or_default());
            }
            println!("{}", body.response.unwrap_or_default());
            if let Some(usage) = body.usage {
                println!();
                println!(
                    "[run {} | {} tokens in, {} out]",
                    body.run_id.unwrap_or_default(),
                    usage.input_tokens,
                    usage.output_tokens
                );
            }
        }

        Commands::Config { server } => {
            let url = format!("{}/config", server.trim_end_matches('/'));
            let config: serde_json::Value = reqwest::get(&url)
                .await
                .with_context(|| format!("Failed to reach {url}"))?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn ask(message: Option<String>, args: ModelArgs, show_spans: bool) -> Result<()> {
    let config = args.agent_config();

    let mut openai = OpenAiConfig::new(&args.endpoint, &args.api_key).with_deployment(&args.deployment);
    openai.api_version = args.api_version;
    let client = AzureOpenAiClient::new(openai).context("Failed to build Azure OpenAI client")?;

    let recorder = Arc::new(InMemorySink::new());
    let sink = CompositeSink::new()
        .with(Arc::new(TracingSink))
        .with(recorder.clone());
    let session = AgentSession::new(
        config.clone(),
        ModelReasoner::new(client).with_malformed_retries(config.malformed_retries),
        Arc::new(builtin_registry(config.tool_timeout)),
        Arc::new(SpanEmitter::new(Arc::new(sink))),
    );

    if let Some(message) = message {
        let reply = session.run(&message).await?;
        print_reply(&reply);
        if show_spans {
            print_spans(&recorder.finished());
        }
        return Ok(());
    }

    println!("Ask a question (Ctrl-D to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match session.run(&line).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => eprintln!("Error: {e}"),
        }
        if show_spans {
            print_spans(&recorder.finished());
        }
        recorder.clear();
    }
    Ok(())
}

fn print_reply(reply: &AgentReply) {
    if reply.failed() {
        eprintln!("The agent could not answer; see the logs for details.");
    } else if reply.degraded() {
        eprintln!("Note: best-effort answer.");
    }
    println!("{}", reply.answer);
    println!(
        "[{:?} | {} iteration(s) | {} tokens in, {} out]",
        reply.status, reply.iterations, reply.usage.input_tokens, reply.usage.output_tokens
    );
}

/// Print spans nested under their parents, in start order.
fn print_spans(spans: &[SpanRecord]) {
    let mut ordered: Vec<&SpanRecord> = spans.iter().collect();
    ordered.sort_by_key(|s| s.start_time);

    println!("Spans:");
    for span in ordered {
        let indent = if span.parent.is_some() { "    " } else { "  " };
        let status = match &span.status {
            Some(SpanStatus::Ok) => "ok".to_string(),
            Some(SpanStatus::Error(msg)) => format!("error: {msg}"),
            Some(SpanStatus::Cancelled) => "cancelled".to_string(),
            None => "open".to_string(),
        };
        println!(
            "{indent}{} ({} ms, {status})",
            span.name,
            span.duration_ms().unwrap_or_default()
        );
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    success: bool,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_args_from_flags() {
        let cli = Cli::try_parse_from([
            "react-agent",
            "ask",
            "What is 12 * 7?",
            "--endpoint",
            "https://example.openai.azure.com",
            "--api-key",
            "secret",
            "--agent-id",
            "asst_42",
            "--max-duration",
            "15",
            "--malformed-retries",
            "0",
        ])
        .unwrap();

        let Commands::Ask { model, .. } = cli.command else {
            panic!("expected ask");
        };
        let config = model.agent_config();
        assert_eq!(config.agent_id.as_deref(), Some("asst_42"));
        assert_eq!(config.max_duration, Duration::from_secs(15));
        assert_eq!(config.malformed_retries, 0);
    }
}
