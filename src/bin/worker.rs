use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use taonga::jobs::worker::Worker;
use taonga::jobs::{JobScheduler, Lane, PipelineContext};
use taonga::{config, logging};

#[derive(Parser)]
#[command(
    name = "taonga-worker",
    about = "Lane-polling worker for distributed pipeline execution"
)]
struct Cli {
    /// Lanes to poll, highest priority first.
    #[arg(long, value_delimiter = ',', default_values = ["urgent", "default", "slow"])]
    lanes: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let mut lanes = Vec::with_capacity(cli.lanes.len());
    for name in &cli.lanes {
        let Ok(lane) = name.parse::<Lane>() else {
            bail!("unknown lane: {name}");
        };
        if lane == Lane::Dead {
            bail!("the dead lane is not executable");
        }
        lanes.push(lane);
    }

    let ctx = Arc::new(PipelineContext::from_config().await?);
    let scheduler = JobScheduler::new(ctx);
    Worker::new(scheduler, lanes).run().await;
    Ok(())
}
