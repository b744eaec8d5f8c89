use clap::{Parser, Subcommand};
use datalake_gateway::config::Config;
use datalake_gateway::gateway::Gateway;
use datalake_gateway::pipeline::{Pipeline, Stage, Variant};
use datalake_gateway::{logging, metrics, server};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "datalake_gateway")]
#[command(about = "CSV ingestion gateway and air-quality data-lake pipeline")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $DATALAKE_CONFIG, then config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP ingestion gateway
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the data-lake pipeline
    Pipeline {
        #[arg(long, value_enum, default_value = "regular")]
        variant: Variant,
        /// Stages to run (repeatable). All stages when omitted.
        #[arg(long, value_enum)]
        stage: Vec<Stage>,
    },
    /// Inspect the gateway ingest log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Print staged envelopes, or one envelope by id
    Show {
        #[arg(long)]
        id: Option<String>,
        /// Only the most recent N envelopes
        #[arg(long)]
        last: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { port } => {
            metrics::init_metrics();
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            server::start_server(&config).await?;
        }
        Commands::Pipeline { variant, stage } => {
            metrics::init_metrics();
            let stages = if stage.is_empty() {
                Stage::ALL.to_vec()
            } else {
                stage
            };
            let pipeline = Pipeline::from_config(&config)?;
            info!(?variant, ?stages, "starting pipeline");
            println!("🚀 Running {:?} pipeline...", variant);

            let report = pipeline.run(variant, &stages).await;
            for task in &report.tasks {
                println!("   - {}", task);
            }
            println!(
                "Total time taken: {:.2} minutes",
                report.total_duration().as_secs_f64() / 60.0
            );
            if report.succeeded() {
                println!("✅ Pipeline completed successfully");
            } else {
                error!("pipeline run failed");
                println!("❌ Pipeline failed");
                std::process::exit(1);
            }
        }
        Commands::Log {
            command: LogCommands::Show { id, last },
        } => {
            let gateway = Gateway::open(&config.gateway.data_root)?;
            match id {
                Some(id) => match gateway.find_envelope(&id)? {
                    Some(envelope) => println!("{}", serde_json::to_string_pretty(&envelope)?),
                    None => {
                        println!("⚠️  No envelope with id {}", id);
                        std::process::exit(1);
                    }
                },
                None => {
                    let envelopes = gateway.envelopes()?;
                    let skip = last.map_or(0, |n| envelopes.len().saturating_sub(n));
                    for envelope in envelopes.iter().skip(skip) {
                        println!(
                            "{}  {}  {}  {}{}",
                            envelope.accepted_at,
                            envelope.envelope_id,
                            envelope.envelope.name,
                            envelope.payload_ref,
                            envelope
                                .dedupe_of
                                .as_deref()
                                .map(|d| format!("  (dedupe of {})", d))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}
