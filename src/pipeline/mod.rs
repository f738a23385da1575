//! Pipeline coordination and observation.

pub mod coordinator;
pub mod report;

pub use coordinator::{PipelineConfig, TalkPipeline};
pub use report::{ConsoleReporter, NullObserver, ObserverEvent, PipelineObserver, RecordingObserver};
