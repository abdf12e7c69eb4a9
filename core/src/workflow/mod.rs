// escrow-core/src/workflow/mod.rs

//! Named-step pipelines over a shared, lock-protected context.
//!
//! Every compound operation of the coordinator (escrow payment, accept, reject,
//! webhook consumption, billing) is a [`Pipeline`] whose steps carry `before`, `on`
//! and `after` handlers. Pipelines are registered once in [`Workflows`] and run by
//! context type.

pub mod context_data;
pub mod control;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod registry;
pub mod step;

pub use context_data::ContextData;
pub use control::{PipelineControl, PipelineResult};
pub use error::WorkflowError;
pub use pipeline::{Handler, Pipeline};
pub use registry::Workflows;
pub use step::{SkipCondition, StepDef};
