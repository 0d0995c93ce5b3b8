//! The event-loop engine (SPEC_FULL.md §4.8): pops events by `(time,
//! event_id)`, dispatches, and owns the connection slots.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::scheduler::{
    AdaptiveStrategy, AggressiveStrategy, ConservativeStrategy, DefaultStrategy, DownloadStart,
    ScheduleRequest, SchedulerStrategy,
};

use super::config::{SchedulerChoice, SimulationConfig};
use super::event::{Message, SimulationEvent};
use super::rng::SimRng;
use super::stats::{SimulationStats, StatsAccumulator};

/// One logical connection slot: busy-until clock and the chunk it's
/// currently serving, if any.
#[derive(Debug, Clone, Copy)]
struct SimulatedNode {
    busy_until: f64,
    current_chunk: Option<u64>,
}

impl SimulatedNode {
    fn idle() -> Self {
        Self {
            busy_until: 0.0,
            current_chunk: None,
        }
    }
}

/// The deterministic, single-threaded cooperative event loop.
pub struct SimulatedCluster {
    config: SimulationConfig,
    clock: f64,
    queue: BinaryHeap<Reverse<Message>>,
    next_event_id: u64,
    nodes: Vec<SimulatedNode>,
    valid: Vec<bool>,
    in_progress: std::collections::HashMap<u64, f64>,
    /// Chunks selected by the strategy but not yet dispatched, because
    /// either every node was busy or the strategy's `concurrency` cap for
    /// the request that selected them was already reached. Drained as
    /// connections free up, never dropped.
    backlog: VecDeque<DownloadStart>,
    /// Strategy-chosen concurrency cap for the most recent request;
    /// re-evaluated on every `handle_read_request` call.
    max_concurrent: u32,
    stats: StatsAccumulator,
    rng: SimRng,
    strategy: Box<dyn SchedulerStrategy>,
}

impl SimulatedCluster {
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        let leaf_count = config.content_size.div_ceil(config.chunk_size.max(1)).max(1);
        let strategy: Box<dyn SchedulerStrategy> = match config.scheduler {
            SchedulerChoice::Default => Box::new(DefaultStrategy),
            SchedulerChoice::Aggressive => Box::new(AggressiveStrategy),
            SchedulerChoice::Conservative => Box::new(ConservativeStrategy),
            SchedulerChoice::Adaptive => Box::new(AdaptiveStrategy::default()),
        };
        let rng = SimRng::new(config.seed);
        Self {
            nodes: vec![SimulatedNode::idle(); config.available_connections.max(1) as usize],
            valid: vec![false; leaf_count as usize],
            in_progress: std::collections::HashMap::new(),
            backlog: VecDeque::new(),
            max_concurrent: config.available_connections.max(1),
            stats: StatsAccumulator::default(),
            strategy,
            rng,
            clock: 0.0,
            queue: BinaryHeap::new(),
            next_event_id: 0,
            config,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    fn push(&mut self, event: SimulationEvent) {
        self.queue.push(Reverse(Message(event)));
    }

    fn seed_requests(&mut self) {
        let mut rng = SimRng::new(self.config.seed);
        let requests = self.config.workload.generate_requests(
            &mut rng,
            self.config.content_size,
            self.config.request_size,
            self.config.request_count,
        );
        self.rng = rng;
        for (i, (offset, length)) in requests.into_iter().enumerate() {
            let time = (i as f64) * 0.001;
            let event_id = self.next_id();
            self.push(SimulationEvent::ReadRequest {
                time,
                event_id,
                offset,
                length,
            });
        }
        let end_id = self.next_id();
        self.push(SimulationEvent::SimulationEnd {
            time: self.config.duration_secs,
            event_id: end_id,
        });
    }

    fn free_connection(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.current_chunk.is_none())
    }

    fn active_count(&self) -> u32 {
        self.nodes.iter().filter(|n| n.current_chunk.is_some()).count() as u32
    }

    /// Dispatch queued chunks onto free nodes, up to `max_concurrent`
    /// simultaneously active downloads. Called whenever a node frees up so
    /// the backlog drains instead of sitting forever.
    fn drain_backlog(&mut self, time: f64) {
        while self.active_count() < self.max_concurrent {
            let Some(start) = self.backlog.pop_front() else {
                break;
            };
            if self.in_progress.contains_key(&start.chunk)
                || self.valid.get(start.chunk as usize).copied().unwrap_or(true)
            {
                continue;
            }
            let Some(conn) = self.free_connection() else {
                self.backlog.push_front(start);
                break;
            };
            self.nodes[conn].current_chunk = Some(start.chunk);
            self.in_progress.insert(start.chunk, time);
            let event_id = self.next_id();
            self.push(SimulationEvent::DownloadStart {
                time,
                event_id,
                chunk: start.chunk,
                offset: start.offset,
                size: start.size,
                conn,
            });
        }
    }

    /// Run the simulation to completion and return final statistics.
    #[must_use]
    pub fn run(mut self) -> SimulationStats {
        self.seed_requests();

        while let Some(Reverse(Message(event))) = self.queue.pop() {
            self.clock = event.time();
            if self.clock >= self.config.duration_secs {
                break;
            }
            self.dispatch(event);
        }

        self.stats.finish()
    }

    fn dispatch(&mut self, event: SimulationEvent) {
        match event {
            SimulationEvent::ReadRequest {
                time,
                offset,
                length,
                ..
            } => self.handle_read_request(time, offset, length),
            SimulationEvent::DownloadStart {
                time,
                chunk,
                conn,
                size,
                ..
            } => self.handle_download_start(time, chunk, conn, size),
            SimulationEvent::DownloadComplete {
                time,
                chunk,
                conn,
                start_time,
                bytes,
                ..
            } => self.handle_download_complete(time, chunk, conn, start_time, bytes),
            SimulationEvent::DownloadFailed { time, chunk, conn, .. } => {
                self.stats.record_failure();
                self.in_progress.remove(&chunk);
                self.nodes[conn].current_chunk = None;
                self.drain_backlog(time);
            }
            SimulationEvent::SimulationEnd { .. } => {}
        }
    }

    fn handle_read_request(&mut self, time: f64, offset: u64, length: u64) {
        self.stats.record_request();
        let chunk_size = self.config.chunk_size;
        let start_chunk = offset / chunk_size;
        let end_chunk = (offset + length - 1) / chunk_size + 1;

        let all_valid = (start_chunk..end_chunk)
            .all(|c| self.valid.get(c as usize).copied().unwrap_or(false));
        if all_valid {
            self.stats.record_cache_hit();
            return;
        }

        let available = self.nodes.iter().filter(|n| n.current_chunk.is_none()).count() as u32;
        let request = ScheduleRequest {
            offset,
            length,
            chunk_size,
            content_size: self.config.content_size,
            available_connections: available,
        };
        // `schedule` always returns the full selection for this read; the
        // strategy's concurrency cap throttles dispatch, not selection, so
        // nothing here is ever dropped from the request's chunk list.
        let starts: Vec<DownloadStart> = self.strategy.schedule(request);
        self.max_concurrent = self.strategy.concurrency(request).max(1);

        for start in starts {
            if self.in_progress.contains_key(&start.chunk)
                || self.valid.get(start.chunk as usize).copied().unwrap_or(true)
                || self.backlog.iter().any(|b| b.chunk == start.chunk)
            {
                continue;
            }
            self.backlog.push_back(start);
        }
        self.drain_backlog(time);
    }

    fn handle_download_start(&mut self, time: f64, chunk: u64, conn: usize, size: u32) {
        self.nodes[conn].busy_until = time;
        let transfer_time = self.config.network.transfer_time(size);
        let failed = self.rng.gen_f64() < self.config.network.loss_rate;
        let event_id = self.next_id();
        if failed {
            self.push(SimulationEvent::DownloadFailed {
                time: time + transfer_time,
                event_id,
                chunk,
                conn,
                reason: "simulated loss".to_string(),
            });
        } else {
            self.push(SimulationEvent::DownloadComplete {
                time: time + transfer_time,
                event_id,
                chunk,
                conn,
                start_time: time,
                bytes: size,
            });
        }
    }

    fn handle_download_complete(
        &mut self,
        time: f64,
        chunk: u64,
        conn: usize,
        start_time: f64,
        bytes: u32,
    ) {
        if let Some(slot) = self.valid.get_mut(chunk as usize) {
            *slot = true;
        }
        self.in_progress.remove(&chunk);
        self.nodes[conn].current_chunk = None;

        let duration = time - start_time;
        self.stats.record_completion(bytes, duration);
        self.stats.record_request_latency(duration);
        self.strategy.record_outcome(true, duration);
        self.drain_backlog(time);
    }
}
