pub mod error;
pub mod event_sink;
pub mod footer;
pub mod hasher_pool;
pub mod painter;
pub mod pane;
pub mod reference;
pub mod scheduler;
pub mod shape;
pub mod simulation;
pub mod transport;
pub mod tree;

pub use error::{
    ChunkSubmissionError, FooterError, PaintError, PaneError, TransportError, TreeError,
    VerificationError,
};
pub use event_sink::{Event, EventSink, JsonFileEventSink, NullEventSink, TracingEventSink};
pub use footer::MerkleFooter;
pub use hasher_pool::{HasherPool, PooledHasher};
pub use painter::{ChunkFetch, MerklePainter};
pub use painter::plan::{plan_ranges, IntactQuery, PlannedRange};
pub use painter::progress::{DownloadProgress, PaintOutcome};
pub use pane::{ChunkBoundary, MerklePane};
pub use reference::ReferenceTree;
pub use scheduler::{
    AdaptiveStrategy, AggressiveStrategy, ConservativeStrategy, DefaultStrategy, DownloadStart,
    ScheduleRequest, SchedulerStrategy,
};
pub use shape::{AncestorIter, MerkleShape, ShapeError};
pub use simulation::{
    Message, NetworkCondition, SchedulerChoice, SimulationBuilder, SimulationConfig,
    SimulationEvent, SimulationStats, SimulatedCluster, WorkloadModel,
};
pub use transport::{http::HttpTransport, ChunkedTransport, MemoryTransport};
pub use tree::MerkleTree;
