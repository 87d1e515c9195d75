use anyhow::Context;
use clap::Parser;
use tracing::info;
use trafficdl::cli::{self, Cli, Commands, RunOptions};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            save,
            load,
            skip_train,
        } => {
            let run_config =
                cli::load_config(config.as_ref()).context("failed to load configuration")?;
            cli::init_logging(&run_config.logging()?);

            let options = RunOptions::new(save, load, skip_train);
            if let Some(report) = cli::run(run_config, &options)? {
                info!(
                    epochs = report.epochs.len(),
                    elapsed_secs = report.total_elapsed().as_secs_f64(),
                    "run finished"
                );
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Evaluators => cli::list_evaluators(),
    }

    Ok(())
}
