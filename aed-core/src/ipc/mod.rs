//! Output boundary: serialisable record types and the sinks that receive them.

pub mod events;
pub mod sink;

pub use events::{ClassScore, ResultRecord, StreamState, SystemStatus};
pub use sink::{BroadcastSink, JsonLinesSink, ResultSink};
