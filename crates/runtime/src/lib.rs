#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::cast_precision_loss)]

//! Runs a model end to end: create the network for a config, initialize it,
//! fill the inputs, forward a number of times and summarize the outputs.

mod config;

pub use config::RunConfig;

use anyhow::{Context, Result};
use compute::{host_buffer, Blob, DimsVector};
use network::{InputShapesMap, NetworkBackend, NetworkFactory, ShareMemoryMode};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Statistics of one output blob after the last forward.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSummary {
    pub name: String,
    pub dims: DimsVector,
    pub mean: f32,
    pub min: f32,
    pub max: f32,
}

impl OutputSummary {
    fn of(blob: &Blob) -> Result<Self> {
        let values = blob.read_f32().with_context(|| format!("read output {}", blob.name()))?;
        let (min, max) = values.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = if values.is_empty() { 0.0 } else { values.iter().sum::<f32>() / values.len() as f32 };
        Ok(Self { name: blob.name().to_string(), dims: blob.desc().dims.clone(), mean, min, max })
    }
}

impl fmt::Display for OutputSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: mean {:.6} min {:.6} max {:.6}", self.name, self.dims, self.mean, self.min, self.max)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub iterations: usize,
    pub elapsed: Duration,
    /// Sorted by name.
    pub outputs: Vec<OutputSummary>,
}

impl RunReport {
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputSummary> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Input shapes with every batch set to `batch`.
fn with_batch(network: &dyn NetworkBackend, batch: usize) -> InputShapesMap {
    network
        .input_blobs()
        .iter()
        .map(|(name, blob)| {
            let mut dims = blob.desc().dims.clone();
            if let Some(first) = dims.first_mut() {
                *first = batch;
            }
            (name.clone(), dims)
        })
        .collect()
}

/// Runs `config` on a network from `factory`, optionally at another batch.
pub fn run(config: &RunConfig, batch: Option<usize>, factory: &NetworkFactory) -> Result<RunReport> {
    let mut network = factory.create(&config.network).context("create network")?;
    network.init(&config.network, &config.model, &config.input_shapes).context("init network")?;

    if let Some(batch) = batch {
        let shapes = with_batch(&*network, batch);
        network.reshape(&shapes).with_context(|| format!("reshape to batch {batch}"))?;
    }
    if config.network.share_memory_mode == ShareMemoryMode::SetFromExternal {
        let size = network.forward_memory_size()?;
        debug!(size, "provide forward memory");
        network.set_forward_memory(host_buffer(size)).context("set forward memory")?;
    }

    for blob in network.input_blobs().values() {
        let values = vec![config.input_fill; blob.desc().count()];
        blob.write_f32(&values).with_context(|| format!("fill input {}", blob.name()))?;
    }

    let start = Instant::now();
    for iteration in 0..config.iterations {
        network.forward().with_context(|| format!("forward #{iteration}"))?;
    }
    let elapsed = start.elapsed();
    info!(iterations = config.iterations, ?elapsed, "forward done");

    let mut outputs = network.output_blobs().values().map(OutputSummary::of).collect::<Result<Vec<_>>>()?;
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    network.deinit().context("deinit network")?;
    Ok(RunReport { iterations: config.iterations, elapsed, outputs })
}
