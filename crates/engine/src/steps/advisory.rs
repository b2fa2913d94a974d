// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory step execution

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::eval::eval;
use crate::interpreter::Interpreter;
use crate::steps::StepOutcome;
use grim_adapters::AdvisoryRequest;
use grim_core::{AdvisoryFallback, LedgerEvent, Value};
use std::time::Duration;

impl Interpreter {
    /// Consult the advisor; hard timeouts surface as `deadline_exceeded`
    /// (catchable), everything else falls back to the declared fallback.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn exec_advisory(
        &self,
        id: &str,
        prompt: &str,
        advisor: &str,
        output: Option<&str>,
        timeout: f64,
        fallback: &AdvisoryFallback,
        output_schema: Option<&serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        ctx.ledger.record(LedgerEvent::AdvisoryStarted {
            step_id: id.to_string(),
            advisor: advisor.to_string(),
        });
        ctx.increment_advisory_calls();

        let (value, fallback_used) = match &self.advisor {
            Some(handler) => {
                let request = AdvisoryRequest {
                    step_id: id.to_string(),
                    advisor: advisor.to_string(),
                    prompt: prompt.to_string(),
                    timeout,
                    output_schema: output_schema.cloned(),
                    tooling: ctx.advisor_tooling.clone(),
                };
                let call = handler.advise(request);
                match tokio::time::timeout(Duration::from_secs_f64(timeout), call).await {
                    Err(_elapsed) => {
                        return Err(StepError::deadline_exceeded(format!(
                            "advisory '{id}' timed out after {timeout}s"
                        )))
                    }
                    Ok(Ok(value)) => (value, false),
                    Ok(Err(e)) => {
                        tracing::warn!(step = id, error = %e, "advisor failed, using fallback");
                        (self.fallback_value(fallback, ctx).await?, true)
                    }
                }
            }
            None => (self.fallback_value(fallback, ctx).await?, true),
        };

        ctx.ledger.record(LedgerEvent::AdvisoryCompleted {
            step_id: id.to_string(),
            advisor: advisor.to_string(),
            fallback_used,
        });

        if let Some(binding) = output {
            ctx.bind_variable(binding, value.clone());
        }
        ctx.record_output(id, value);
        Ok(StepOutcome::Completed)
    }

    async fn fallback_value(
        &self,
        fallback: &AdvisoryFallback,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        match fallback {
            AdvisoryFallback::Literal { value } => Ok(value.clone()),
            AdvisoryFallback::Expression { expression } => {
                Ok(eval(expression, &self.env(ctx)).await?)
            }
        }
    }
}
