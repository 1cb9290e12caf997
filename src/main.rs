//! Interactive CLI for the QoS advisor.

use std::io::Write as _;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use qos_advisor::{
    AdvisorConfig, BackendConfig, ClientConfig, GroqClient, Intent, Pipeline, StabilityConfig,
    StdioBackend,
};

#[derive(Parser, Debug)]
#[command(
    name = "qos-advisor",
    version,
    about = "SRE agent: QoS capability reports and workload allocation advice"
)]
struct Cli {
    /// Groq API key for the LLM
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: String,

    /// LLM model identifier
    #[arg(long, default_value = "llama-3.3-70b-versatile")]
    model: String,

    /// Command starting the metrics tool server
    #[arg(long, default_value = "prometheus-tool-server")]
    backend_command: String,

    /// Extra argument for the tool server command (repeatable)
    #[arg(long = "backend-arg")]
    backend_args: Vec<String>,

    /// URI of the QoS knowledge-base resource
    #[arg(long, default_value = "qos/config")]
    kb_uri: String,

    /// Per-call backend deadline in seconds
    #[arg(long, default_value_t = 30)]
    backend_timeout: u64,

    /// Rolling window for the stability history
    #[arg(long, default_value = "24h")]
    history_window: String,

    /// Sample resolution for the stability history
    #[arg(long, default_value = "5m")]
    history_resolution: String,

    /// Log filter (RUST_LOG overrides this)
    #[arg(long, default_value = "info")]
    log_filter: String,
}

fn print_panel(title: &str, body: &str) {
    let rule = "─".repeat(72);
    println!("\n┌{rule}");
    println!("│ {title}");
    println!("├{rule}");
    for line in body.lines() {
        println!("│ {line}");
    }
    println!("└{rule}");
}

#[tokio::main]
async fn main() -> qos_advisor::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let backend_config = BackendConfig::new(cli.backend_command.clone())
        .with_args(cli.backend_args.clone())
        .with_timeout(cli.backend_timeout);
    let backend = Arc::new(StdioBackend::spawn(&backend_config)?);

    let llm = Arc::new(GroqClient::new(
        ClientConfig::new(cli.groq_api_key.clone()).with_default_model(cli.model.clone()),
    )?);

    let config = AdvisorConfig::new()
        .with_kb_uri(cli.kb_uri.clone())
        .with_stability(StabilityConfig {
            window: cli.history_window.clone(),
            resolution: cli.history_resolution.clone(),
        });
    let pipeline = Pipeline::new(backend, llm, config);

    println!("SRE Agent: QoS & Capability Planner");
    println!("Type a request, or q / quit / exit to leave.");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request.to_lowercase().as_str(), "q" | "quit" | "exit") {
            break;
        }

        match pipeline.run(request).await {
            Ok(outcome) => {
                if let Some(table) = &outcome.ranking_table {
                    print_panel("Ranking & Rescue Scan", table);
                }
                let title = match outcome.intent {
                    Intent::Status => "Capability Report",
                    Intent::Allocation => "Allocation Advice",
                };
                print_panel(title, &outcome.text);
            }
            Err(e) => {
                // Fatal setup errors end the turn, not the session.
                eprintln!("request failed: {e}");
            }
        }
    }

    Ok(())
}
