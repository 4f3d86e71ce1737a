//! Event pipelines: user-authored DAGs of processors that rewrite, route or
//! drop an alert event before it is stored and notified.
//!
//! - [`Engine`] runs one pipeline in topological order with branching,
//!   retries, termination and streaming outputs
//! - [`ProcessorRegistry`] builds node processors from their type and config
//! - [`Recorder`] stores execution history and prunes it
//! - [`PipelineRunner`] applies a rule's pipelines to a dispatched event

pub mod context;
pub mod engine;
pub mod error;
pub mod processor;
pub mod recorder;
pub mod result;
pub mod runner;

pub use context::{Metadata, StreamChan, TriggerContext, TriggerMode, WorkflowContext};
pub use engine::{Engine, CYCLE_MESSAGE};
pub use error::{PipelineError, Result};
pub use processor::{
    BranchOutput, BranchProcessor, NodeProcessor, Processed, Processor, ProcessorRegistry,
};
pub use recorder::{ExecutionStats, ExecutionStore, MemoryExecutionStore, PipelineExecution, Recorder};
pub use result::{ExecutionStatus, NodeExecutionResult, NodeStatus, WorkflowResult};
pub use runner::PipelineRunner;
