//! Fluent constructor for a [`SimulationConfig`] / [`SimulatedCluster`] pair.

use super::cluster::SimulatedCluster;
use super::config::{SchedulerChoice, SimulationConfig};
use super::network::NetworkCondition;
use super::workload::WorkloadModel;

#[derive(Debug, Clone, Copy)]
pub struct SimulationBuilder {
    config: SimulationConfig,
}

impl SimulationBuilder {
    #[must_use]
    pub fn new(content_size: u64, chunk_size: u64, duration_secs: f64, seed: u64) -> Self {
        Self {
            config: SimulationConfig::new(content_size, chunk_size, duration_secs, seed),
        }
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerChoice) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn network(mut self, network: NetworkCondition) -> Self {
        self.config.network = network;
        self
    }

    #[must_use]
    pub fn workload(mut self, workload: WorkloadModel) -> Self {
        self.config.workload = workload;
        self
    }

    #[must_use]
    pub fn available_connections(mut self, n: u32) -> Self {
        self.config.available_connections = n;
        self
    }

    #[must_use]
    pub fn request_size(mut self, size: u64) -> Self {
        self.config.request_size = size;
        self
    }

    #[must_use]
    pub fn request_count(mut self, count: u64) -> Self {
        self.config.request_count = count;
        self
    }

    #[must_use]
    pub fn config(&self) -> SimulationConfig {
        self.config
    }

    #[must_use]
    pub fn build(self) -> SimulatedCluster {
        SimulatedCluster::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_config_and_seed_produce_identical_scores() {
        let run = || {
            SimulationBuilder::new(50_000_000, 64 * 1024, 60.0, 42)
                .scheduler(SchedulerChoice::Default)
                .network(NetworkCondition::LOCALHOST)
                .workload(WorkloadModel::Sequential)
                .build()
                .run()
        };
        let a = run();
        let b = run();
        assert_eq!(a, b);
        assert!(a.composite_score() > 0.0);
    }
}
