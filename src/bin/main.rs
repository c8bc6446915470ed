use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepsearcher_orchestrator::api::{create_router, AppState};
use deepsearcher_orchestrator::query::Orchestrator;
use deepsearcher_orchestrator::Config;

#[derive(Parser)]
#[command(name = "deepsearcher", about = "Agentic retrieval-augmented question answering")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question against the configured collections and exit.
    Query {
        text: String,
        #[arg(long)]
        max_iter: Option<usize>,
    },
    /// Run the HTTP façade (`/query`, `/set-provider-config`, `/health`).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "deepsearcher_orchestrator=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Query { text, max_iter } => run_query(config, &text, max_iter).await,
        Commands::Serve => run_server(config).await,
    }
}

async fn run_query(config: Config, text: &str, max_iter: Option<usize>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config).await?;
    let (answer, citations, tokens) = orchestrator.query(text, max_iter).await?;

    println!("{answer}");
    println!();
    println!("tokens consumed: {tokens}");

    if !citations.is_empty() {
        println!();
        println!("References:");
        for (i, citation) in citations.iter().enumerate() {
            let snippet: String = citation.text.chars().take(160).collect();
            println!("  [{}] {} — {}", i + 1, citation.reference, snippet);
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::from_config(config).await?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
