//! Scheduler strategies shared by the simulation core and, optionally, the
//! real painter's planner (SPEC_FULL.md §4.7 / §6 scheduler contract).

/// A single request to start downloading one chunk, emitted by a
/// [`SchedulerStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStart {
    pub chunk: u64,
    pub offset: u64,
    pub size: u32,
}

/// Inputs available to a strategy when deciding what to schedule for one
/// read request.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRequest {
    pub offset: u64,
    pub length: u64,
    pub chunk_size: u64,
    pub content_size: u64,
    pub available_connections: u32,
}

/// A reference chunk-selection policy. Implementors decide which chunks a
/// read needs (`schedule`) and how many of those may be fetched at once
/// (`concurrency`) — two independent questions. `schedule` must always
/// return every chunk the read spans (selection), never fewer just because
/// connections are scarce; capping by connection count is `concurrency`'s
/// job, applied by the caller at dispatch time so chunks past the cap are
/// queued rather than dropped.
pub trait SchedulerStrategy: Send + Sync {
    fn schedule(&mut self, request: ScheduleRequest) -> Vec<DownloadStart>;

    /// How many chunks from `schedule`'s result may be fetched
    /// concurrently. Defaults to all available connections.
    fn concurrency(&self, request: ScheduleRequest) -> u32 {
        request.available_connections.max(1)
    }

    /// Hook for adaptive strategies to learn from outcomes. No-op by
    /// default.
    fn record_outcome(&mut self, _hit: bool, _transfer_time_secs: f64) {}

    fn name(&self) -> &'static str;
}

fn chunks_in(request: &ScheduleRequest) -> (u64, u64) {
    let start = request.offset / request.chunk_size;
    let last_byte = (request.offset + request.length).saturating_sub(1).min(request.content_size.saturating_sub(1));
    let end = last_byte / request.chunk_size + 1;
    (start, end)
}

fn emit(chunk_size: u64, content_size: u64, chunks: std::ops::Range<u64>) -> Vec<DownloadStart> {
    chunks
        .map(|chunk| {
            let offset = chunk * chunk_size;
            let size = ((offset + chunk_size).min(content_size) - offset) as u32;
            DownloadStart {
                chunk,
                offset,
                size,
            }
        })
        .collect()
}

/// Exactly the chunks covering the read, fetched up to
/// `available_connections` at a time.
#[derive(Debug, Default)]
pub struct DefaultStrategy;

impl SchedulerStrategy for DefaultStrategy {
    fn schedule(&mut self, request: ScheduleRequest) -> Vec<DownloadStart> {
        let (start, end) = chunks_in(&request);
        emit(request.chunk_size, request.content_size, start..end)
    }

    fn concurrency(&self, request: ScheduleRequest) -> u32 {
        let (start, end) = chunks_in(&request);
        request.available_connections.min((end - start).max(1) as u32).max(1)
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Expands the window to `[startChunk-1, endChunk+4]` (clamped), fetched
/// using every available connection.
#[derive(Debug, Default)]
pub struct AggressiveStrategy;

impl SchedulerStrategy for AggressiveStrategy {
    fn schedule(&mut self, request: ScheduleRequest) -> Vec<DownloadStart> {
        let (start, end) = chunks_in(&request);
        let total_chunks = request.content_size.div_ceil(request.chunk_size).max(1);
        let expanded_start = start.saturating_sub(1);
        let expanded_end = (end + 4).min(total_chunks);
        emit(request.chunk_size, request.content_size, expanded_start..expanded_end)
    }

    fn name(&self) -> &'static str {
        "aggressive"
    }
}

/// Exactly the needed chunks, fetched using at most half the available
/// connections (at least one).
#[derive(Debug, Default)]
pub struct ConservativeStrategy;

impl SchedulerStrategy for ConservativeStrategy {
    fn schedule(&mut self, request: ScheduleRequest) -> Vec<DownloadStart> {
        let (start, end) = chunks_in(&request);
        emit(request.chunk_size, request.content_size, start..end)
    }

    fn concurrency(&self, request: ScheduleRequest) -> u32 {
        let (start, end) = chunks_in(&request);
        let needed = end - start;
        request.available_connections.min(needed.max(1) as u32 / 2).max(1)
    }

    fn name(&self) -> &'static str {
        "conservative"
    }
}

/// Prefetches `aggressiveness - 2` chunks ahead (clamped at 0) and scales
/// connection count with `aggressiveness`, adjusting `aggressiveness` in
/// `1..=5` based on observed hit rate and recent transfer time.
#[derive(Debug)]
pub struct AdaptiveStrategy {
    aggressiveness: u8,
    recent_hits: u32,
    recent_misses: u32,
    recent_transfer_secs: f64,
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self {
            aggressiveness: 3,
            recent_hits: 0,
            recent_misses: 0,
            recent_transfer_secs: 0.0,
        }
    }
}

impl SchedulerStrategy for AdaptiveStrategy {
    fn schedule(&mut self, request: ScheduleRequest) -> Vec<DownloadStart> {
        let (start, end) = chunks_in(&request);
        let total_chunks = request.content_size.div_ceil(request.chunk_size).max(1);
        let prefetch = u64::from(self.aggressiveness.saturating_sub(2));
        let expanded_end = (end + prefetch).min(total_chunks);

        emit(request.chunk_size, request.content_size, start..expanded_end)
    }

    fn concurrency(&self, request: ScheduleRequest) -> u32 {
        let connections = ((u64::from(request.available_connections) * u64::from(self.aggressiveness)) / 5).max(1);
        connections.min(u64::from(request.available_connections.max(1))) as u32
    }

    fn record_outcome(&mut self, hit: bool, transfer_time_secs: f64) {
        if hit {
            self.recent_hits += 1;
        } else {
            self.recent_misses += 1;
        }
        self.recent_transfer_secs = transfer_time_secs;

        let total = self.recent_hits + self.recent_misses;
        if total >= 10 {
            let hit_rate = f64::from(self.recent_hits) / f64::from(total);
            if hit_rate > 0.8 && self.recent_transfer_secs < 1.0 {
                self.aggressiveness = (self.aggressiveness + 1).min(5);
            } else if hit_rate < 0.4 || self.recent_transfer_secs > 3.0 {
                self.aggressiveness = self.aggressiveness.saturating_sub(1).max(1);
            }
            self.recent_hits = 0;
            self.recent_misses = 0;
        }
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}
