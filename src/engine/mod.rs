//! Markup protocol engine
//!
//! Correlates the compiler's asynchronous, out-of-order markup responses
//! with the requests that produced them:
//! - a concurrency-safe table of outstanding requests with a blocking-wait
//!   contract for synchronous callers
//! - a single-consumer dispatcher that classifies each incoming unit and
//!   delivers typed events to the host's collaborators

pub mod dispatcher;
pub mod events;
pub mod requests;

pub use dispatcher::Dispatcher;
pub use events::{BufferSource, EditorSink, Event, MemoryBuffers, RecordingSink};
pub use requests::{AbortReason, RequestOutcome, RequestRecord, RequestTable};
