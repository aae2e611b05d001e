use anyhow::Context;
use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

use tsalign::align::MarkerfreeAligner;
use tsalign::cli::{Args, Command, RunArgs};
use tsalign::collection::{JsonInputCollection, JsonOutputStore};
use tsalign::config::AppConfig;
use tsalign::logging::{cleanup_old_logs, init_logging};
use tsalign::scheduler::StreamingScheduler;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_env();
    args.apply_to(&mut config);
    config.validate()?;

    match &args.command {
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run(run_args) => {
            let _guard = init_logging(&config.logging, args.verbose)?;
            if let Some(dir) = &config.logging.dir
                && let Err(e) = cleanup_old_logs(dir, config.logging.retention_days).await
            {
                warn!(error = %e, "Failed to clean up old logs");
            }
            run_scheduler(config, run_args).await
        }
    }
}

async fn run_scheduler(config: AppConfig, run_args: &RunArgs) -> anyhow::Result<()> {
    let input = JsonInputCollection::open(&run_args.input)
        .with_context(|| format!("Failed to open input collection {}", run_args.input.display()))?;
    let store = Arc::new(JsonOutputStore::new(&run_args.output_dir));
    let aligner = Arc::new(MarkerfreeAligner::new(config.aligner.clone()));

    info!(
        input = %run_args.input.display(),
        output_dir = %run_args.output_dir.display(),
        work_dir = %config.work_dir.display(),
        "tsalign starting"
    );

    let scheduler = StreamingScheduler::new(
        config.scheduler.clone(),
        config.pipeline(),
        Box::new(input),
        store,
        aligner,
    );
    let summary = scheduler.run().await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
