//! Rolling statistics and the composite score (SPEC_FULL.md §4.8).

/// Mutable accumulator used while the cluster event loop runs; converted to
/// the immutable [`SimulationStats`] + derived metrics via [`Self::finish`].
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    pub total_requests: u64,
    pub completed_downloads: u64,
    pub failed_downloads: u64,
    pub cache_hits: u64,
    pub total_bytes: u64,
    pub total_duration_secs: f64,
    latency_samples: Vec<f64>,
}

impl StatsAccumulator {
    pub fn record_request(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_completion(&mut self, bytes: u32, duration_secs: f64) {
        self.completed_downloads += 1;
        self.total_bytes += u64::from(bytes);
        self.total_duration_secs += duration_secs;
    }

    pub fn record_failure(&mut self) {
        self.failed_downloads += 1;
    }

    pub fn record_request_latency(&mut self, latency_secs: f64) {
        self.latency_samples.push(latency_secs);
    }

    #[must_use]
    pub fn finish(mut self) -> SimulationStats {
        self.latency_samples
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let average_request_latency = if self.latency_samples.is_empty() {
            0.0
        } else {
            self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64
        };

        let p95_request_latency = percentile(&self.latency_samples, 0.95);

        let average_throughput = if self.total_duration_secs > 0.0 {
            self.total_bytes as f64 / self.total_duration_secs
        } else {
            0.0
        };

        let average_duration = if self.completed_downloads > 0 {
            self.total_duration_secs / self.completed_downloads as f64
        } else {
            0.0
        };

        let cache_hit_rate = if self.total_requests > 0 {
            self.cache_hits as f64 / self.total_requests as f64
        } else {
            0.0
        };

        let completion_rate = if self.total_requests > 0 {
            self.completed_downloads as f64 / self.total_requests as f64
        } else {
            0.0
        };

        SimulationStats {
            total_requests: self.total_requests,
            completed_downloads: self.completed_downloads,
            failed_downloads: self.failed_downloads,
            average_throughput,
            average_duration,
            average_request_latency,
            p95_request_latency,
            cache_hit_rate,
            completion_rate,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Final derived statistics for a completed simulation run, including the
/// weighted composite score (completion 35%, latency 25%, throughput 20%,
/// cache 15%, speed 5%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationStats {
    pub total_requests: u64,
    pub completed_downloads: u64,
    pub failed_downloads: u64,
    pub average_throughput: f64,
    pub average_duration: f64,
    pub average_request_latency: f64,
    pub p95_request_latency: f64,
    pub cache_hit_rate: f64,
    pub completion_rate: f64,
}

impl SimulationStats {
    /// Weighted composite score in `[0, 1]`-ish range (throughput/latency
    /// terms are normalized against generous reference scales, not hard
    /// bounds).
    #[must_use]
    pub fn composite_score(&self) -> f64 {
        let completion_term = self.completion_rate;
        let latency_term = 1.0 / (1.0 + self.average_request_latency);
        let throughput_term = (self.average_throughput / 10_000_000.0).min(1.0);
        let cache_term = self.cache_hit_rate;
        let speed_term = 1.0 / (1.0 + self.average_duration);

        0.35 * completion_term
            + 0.25 * latency_term
            + 0.20 * throughput_term
            + 0.15 * cache_term
            + 0.05 * speed_term
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_score_is_deterministic_for_identical_accumulators() {
        let mut acc_a = StatsAccumulator::default();
        let mut acc_b = StatsAccumulator::default();
        for acc in [&mut acc_a, &mut acc_b] {
            acc.record_request();
            acc.record_completion(1024, 0.01);
            acc.record_request_latency(0.02);
            acc.record_cache_hit();
        }
        assert_eq!(acc_a.finish().composite_score(), acc_b.finish().composite_score());
    }

    #[test]
    fn empty_run_has_zero_completion_and_cache_terms() {
        let stats = StatsAccumulator::default().finish();
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.cache_hit_rate, 0.0);
    }
}
