//! Configuration for one deterministic simulation run (SPEC_FULL.md §4.8).

use super::network::NetworkCondition;
use super::workload::WorkloadModel;

/// Which scheduler the simulation should exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerChoice {
    Default,
    Aggressive,
    Conservative,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub content_size: u64,
    pub chunk_size: u64,
    pub duration_secs: f64,
    pub seed: u64,
    pub scheduler: SchedulerChoice,
    pub network: NetworkCondition,
    pub workload: WorkloadModel,
    pub available_connections: u32,
    pub request_size: u64,
    pub request_count: u64,
}

impl SimulationConfig {
    #[must_use]
    pub fn new(content_size: u64, chunk_size: u64, duration_secs: f64, seed: u64) -> Self {
        Self {
            content_size,
            chunk_size,
            duration_secs,
            seed,
            scheduler: SchedulerChoice::Default,
            network: NetworkCondition::LOCALHOST,
            workload: WorkloadModel::Sequential,
            available_connections: 4,
            request_size: chunk_size,
            request_count: content_size.div_ceil(chunk_size.max(1)),
        }
    }
}
