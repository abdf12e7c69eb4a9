// escrow-core/src/workflow/registry.rs

//! Type-keyed pipeline registry: one pipeline per context data type.

use super::context_data::ContextData;
use super::control::PipelineResult;
use super::error::WorkflowError;
use super::pipeline::Pipeline;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

#[async_trait]
trait ErasedPipeline<E>: Send + Sync
where
  E: std::error::Error + Send + Sync + 'static,
{
  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<PipelineResult, E>;
}

#[async_trait]
impl<TData, HandlerErr, E> ErasedPipeline<E> for Pipeline<TData, HandlerErr>
where
  TData: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
  E: std::error::Error + From<HandlerErr> + From<WorkflowError> + Send + Sync + 'static,
{
  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<PipelineResult, E> {
    let ctx = ctx.downcast::<ContextData<TData>>().map_err(|_| {
      E::from(WorkflowError::TypeMismatch {
        expected_type: std::any::type_name::<ContextData<TData>>().to_string(),
      })
    })?;
    self.run(*ctx).await.map_err(E::from)
  }
}

/// Holds the registered pipelines of an application and dispatches runs by the
/// context type passed to [`Workflows::run`].
pub struct Workflows<E>
where
  E: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
{
  pipelines: RwLock<HashMap<TypeId, Arc<dyn ErasedPipeline<E>>>>,
}

impl<E> Default for Workflows<E>
where
  E: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<E> Workflows<E>
where
  E: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      pipelines: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `pipeline` for its context type, replacing any earlier registration.
  pub fn register<TData, HandlerErr>(&self, pipeline: Pipeline<TData, HandlerErr>)
  where
    TData: 'static + Send + Sync,
    HandlerErr: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
    E: From<HandlerErr>,
  {
    event!(Level::DEBUG, context_type = %std::any::type_name::<TData>(), steps = ?pipeline.step_names(), "Registering pipeline.");
    let erased: Arc<dyn ErasedPipeline<E>> = Arc::new(pipeline);
    self.pipelines.write().insert(TypeId::of::<TData>(), erased);
  }

  pub fn is_registered<TData: 'static>(&self) -> bool {
    self.pipelines.read().contains_key(&TypeId::of::<TData>())
  }

  pub async fn run<TData>(&self, ctx: ContextData<TData>) -> Result<PipelineResult, E>
  where
    TData: 'static + Send + Sync,
  {
    let pipeline = self.pipelines.read().get(&TypeId::of::<TData>()).cloned();
    let Some(pipeline) = pipeline else {
      let context_type = std::any::type_name::<TData>().to_string();
      event!(Level::ERROR, %context_type, "No pipeline registered for context.");
      return Err(E::from(WorkflowError::NotRegistered { context_type }));
    };
    pipeline.run_erased(Box::new(ctx)).await
  }
}
