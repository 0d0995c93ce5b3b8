//! Tagged simulation events and the `(time, event_id)` ordering wrapper used
//! by the cluster's `BinaryHeap` (SPEC_FULL.md §4.8).

use std::cmp::Ordering;

/// A single step in a simulation run. Carries a monotonic `event_id` for
/// stable tie-breaking on equal `time`.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    ReadRequest {
        time: f64,
        event_id: u64,
        offset: u64,
        length: u64,
    },
    DownloadStart {
        time: f64,
        event_id: u64,
        chunk: u64,
        offset: u64,
        size: u32,
        conn: usize,
    },
    DownloadComplete {
        time: f64,
        event_id: u64,
        chunk: u64,
        conn: usize,
        start_time: f64,
        bytes: u32,
    },
    DownloadFailed {
        time: f64,
        event_id: u64,
        chunk: u64,
        conn: usize,
        reason: String,
    },
    SimulationEnd {
        time: f64,
        event_id: u64,
    },
}

impl SimulationEvent {
    #[must_use]
    pub fn time(&self) -> f64 {
        match self {
            Self::ReadRequest { time, .. }
            | Self::DownloadStart { time, .. }
            | Self::DownloadComplete { time, .. }
            | Self::DownloadFailed { time, .. }
            | Self::SimulationEnd { time, .. } => *time,
        }
    }

    #[must_use]
    pub fn event_id(&self) -> u64 {
        match self {
            Self::ReadRequest { event_id, .. }
            | Self::DownloadStart { event_id, .. }
            | Self::DownloadComplete { event_id, .. }
            | Self::DownloadFailed { event_id, .. }
            | Self::SimulationEnd { event_id, .. } => *event_id,
        }
    }
}

/// Min-heap ordering wrapper: orders by `(time, event_id)` ascending when
/// used inside a `std::collections::BinaryHeap` via `Reverse`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message(pub SimulationEvent);

impl Eq for Message {}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .time()
            .partial_cmp(&other.0.time())
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.0.event_id().cmp(&other.0.event_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    #[test]
    fn ties_break_on_event_id() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(Message(SimulationEvent::SimulationEnd {
            time: 1.0,
            event_id: 2,
        })));
        heap.push(Reverse(Message(SimulationEvent::SimulationEnd {
            time: 1.0,
            event_id: 1,
        })));
        let Reverse(Message(first)) = heap.pop().unwrap();
        assert_eq!(first.event_id(), 1);
    }
}
