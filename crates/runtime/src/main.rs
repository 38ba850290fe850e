#![deny(clippy::all, clippy::pedantic)]

//! `netrun`: runs a model described by a JSON run config and prints a summary
//! of every output.
//!
//! NPU models run on the host-simulated accelerator runtime.

use anyhow::Result;
use clap::Parser;
use compute::DeviceType;
use network::npu::SimulatedNpu;
use network::{NetworkFactory, NpuRuntime};
use runtime::{run, RunConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netrun", version, about = "Runs a model and summarizes its outputs", long_about = None)]
struct Cli {
    /// Run config (JSON)
    #[arg(value_name = "FILE")]
    config: PathBuf,

    /// Device to run on, overriding the config
    #[arg(long)]
    device: Option<DeviceType>,

    #[arg(long)]
    device_id: Option<i32>,

    /// Reshape every input to this batch after init
    #[arg(short, long)]
    batch: Option<usize>,

    /// Number of forward passes
    #[arg(short = 'n', long)]
    iterations: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy())
        .init();

    let cli = Cli::parse();
    let mut config = RunConfig::load(&cli.config)?;
    config.override_with(cli.device, cli.device_id, cli.iterations);

    let factory = NetworkFactory::new().with_npu_runtime(NpuRuntime::new(Arc::new(SimulatedNpu::new())));
    let report = run(&config, cli.batch, &factory)?;

    println!("{} iteration(s) in {:?}", report.iterations, report.elapsed);
    for output in &report.outputs {
        println!("  {output}");
    }
    Ok(())
}
