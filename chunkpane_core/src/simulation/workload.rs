//! Read-request generation models (SPEC_FULL.md §4.8).

use super::rng::SimRng;

/// Generates the initial `ReadRequest` stream for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadModel {
    /// Walks the file front-to-back in fixed-size requests.
    Sequential,
    /// Uniformly random offsets.
    Random,
    /// Skewed toward low offsets (hot-region access pattern).
    Zipfian,
}

impl WorkloadModel {
    /// Generate `count` `(offset, length)` read requests over `[0,
    /// content_size)`, each `request_size` bytes (clamped at EOF).
    #[must_use]
    pub fn generate_requests(
        &self,
        rng: &mut SimRng,
        content_size: u64,
        request_size: u64,
        count: u64,
    ) -> Vec<(u64, u64)> {
        let mut requests = Vec::with_capacity(count as usize);
        let total_slots = content_size.div_ceil(request_size).max(1);

        for i in 0..count {
            let slot = match self {
                Self::Sequential => i % total_slots,
                Self::Random => rng.gen_range_u64(0, total_slots),
                Self::Zipfian => rng.gen_zipf(total_slots, 1.5),
            };
            let offset = slot * request_size;
            let length = request_size.min(content_size.saturating_sub(offset));
            if length > 0 {
                requests.push((offset, length));
            }
        }
        requests
    }
}
