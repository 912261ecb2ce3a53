use anyhow::Result;
use clap::{Parser, Subcommand};
use tcr_report::{ReportConfig, ReportPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tcr-cli")]
#[command(about = "Topic Catalog Reporter command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate the enriched-topics report once
    Run,
    /// Start the HTTP trigger surface
    Serve,
    /// Start the cron scheduler and keep running until interrupted
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = tcr_report::run_report_once_from_env().await?;
            println!(
                "report complete: run_id={} topics={} new={} blob={}",
                summary.run_id, summary.topics_reported, summary.new_topics, summary.output_blob
            );
        }
        Commands::Serve => {
            tcr_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            let pipeline = ReportPipeline::new(ReportConfig::from_env())?;
            match pipeline.maybe_build_scheduler().await? {
                Some(mut sched) => {
                    sched.start().await?;
                    tokio::signal::ctrl_c().await?;
                }
                None => {
                    eprintln!("scheduler disabled; set TCR_SCHEDULER_ENABLED=1 to enable it");
                }
            }
        }
    }

    Ok(())
}
