//! Inbound event processing
//!
//! The dispatcher classifies transport events, the lanes serialize each
//! sender's messages, and the pipeline takes a single message to a workflow.

pub mod content;
pub mod dispatcher;
pub mod lanes;
pub mod pipeline;

pub use content::MessageContentExtractor;
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use lanes::SenderLanes;
pub use pipeline::{MessageOutcome, MessagePipeline};
