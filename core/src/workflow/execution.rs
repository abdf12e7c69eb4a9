// escrow-core/src/workflow/execution.rs

use super::context_data::ContextData;
use super::control::{PipelineControl, PipelineResult};
use super::error::WorkflowError;
use super::pipeline::{Phase, Pipeline};
use tracing::{event, instrument, Instrument, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<WorkflowError> + Send + Sync + 'static,
{
  /// Runs every step in order. For each step the `before`, `on` and `after` handlers
  /// run in registration order; the first error or `Stop` ends the run.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(context_type = %std::any::type_name::<TData>(), num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx: ContextData<TData>) -> Result<PipelineResult, Err> {
    for (step_index, step) in self.steps.iter().enumerate() {
      let step_span = tracing::info_span!("pipeline_step", step_name = %step.name, step_index);

      if let Some(skip_if) = &step.skip_if {
        if skip_if(ctx.clone()) {
          event!(parent: &step_span, Level::DEBUG, "Step skipped by its condition.");
          continue;
        }
      }

      let handler_count: usize = [Phase::Before, Phase::On, Phase::After]
        .iter()
        .map(|phase| self.handlers(*phase, &step.name).len())
        .sum();
      if handler_count == 0 {
        if step.optional {
          event!(parent: &step_span, Level::DEBUG, "Optional step has no handlers.");
          continue;
        }
        event!(parent: &step_span, Level::ERROR, "Required step has no handlers.");
        return Err(Err::from(WorkflowError::HandlerMissing {
          step_name: step.name.clone(),
        }));
      }

      for phase in [Phase::Before, Phase::On, Phase::After] {
        let control = self
          .run_phase(phase, &step.name, &ctx)
          .instrument(step_span.clone())
          .await?;
        if control == PipelineControl::Stop {
          event!(parent: &step_span, Level::INFO, phase = phase.label(), "Pipeline stopped by handler.");
          return Ok(PipelineResult::Stopped);
        }
      }
    }

    Ok(PipelineResult::Completed)
  }

  async fn run_phase(&self, phase: Phase, step_name: &str, ctx: &ContextData<TData>) -> Result<PipelineControl, Err> {
    for handler in self.handlers(phase, step_name) {
      match handler(ctx.clone()).await {
        Ok(PipelineControl::Continue) => {}
        Ok(PipelineControl::Stop) => return Ok(PipelineControl::Stop),
        Err(e) => {
          event!(Level::WARN, phase = phase.label(), error = %e, "Step handler failed.");
          return Err(e);
        }
      }
    }
    Ok(PipelineControl::Continue)
  }
}
