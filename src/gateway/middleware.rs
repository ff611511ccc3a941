//! Cross-cutting stages around every gateway call.
//!
//! Stages run once per call, in order, after the core has produced its
//! outcome. The standard chain scrubs errors first and then records timing,
//! so the log line carries the same message the caller receives.

use crate::error::GatewayResult;
use crate::models::ExecutionResult;
use std::future::Future;
use std::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Per-call identity and clock.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Uuid,
    pub operation: &'static str,
    started: Instant,
}

impl CallContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operation,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// One wrapper stage.
pub trait Stage: Send + Sync {
    fn complete(
        &self,
        ctx: &CallContext,
        outcome: GatewayResult<ExecutionResult>,
    ) -> GatewayResult<ExecutionResult>;
}

/// Removes credentials from error messages.
#[derive(Debug, Default)]
pub struct ErrorNormalization {
    secrets: Vec<String>,
}

impl ErrorNormalization {
    pub fn new(secrets: Vec<String>) -> Self {
        Self { secrets }
    }
}

impl Stage for ErrorNormalization {
    fn complete(
        &self,
        _ctx: &CallContext,
        outcome: GatewayResult<ExecutionResult>,
    ) -> GatewayResult<ExecutionResult> {
        outcome.map_err(|e| e.scrub(&self.secrets))
    }
}

/// Stamps execution time and logs the outcome.
#[derive(Debug, Default)]
pub struct Timing;

impl Stage for Timing {
    fn complete(
        &self,
        ctx: &CallContext,
        outcome: GatewayResult<ExecutionResult>,
    ) -> GatewayResult<ExecutionResult> {
        let elapsed_ms = ctx.elapsed_ms();
        match outcome {
            Ok(mut result) => {
                result.execution_time_ms = elapsed_ms;
                info!(
                    request_id = %ctx.request_id,
                    operation = ctx.operation,
                    rows = result.row_count,
                    truncated = result.truncated,
                    elapsed_ms,
                    "Query completed"
                );
                Ok(result)
            }
            Err(e) if e.is_rejection() => {
                warn!(
                    request_id = %ctx.request_id,
                    operation = ctx.operation,
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms,
                    "Query rejected"
                );
                Err(e)
            }
            Err(e) => {
                error!(
                    request_id = %ctx.request_id,
                    operation = ctx.operation,
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms,
                    "Query failed"
                );
                Err(e)
            }
        }
    }
}

/// Ordered stage chain.
pub struct Middleware {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Default for Middleware {
    fn default() -> Self {
        Self::standard(Vec::new())
    }
}

impl Middleware {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Error scrubbing followed by timing.
    pub fn standard(secrets: Vec<String>) -> Self {
        Self::new(vec![
            Box::new(ErrorNormalization::new(secrets)),
            Box::new(Timing),
        ])
    }

    /// Run `call` inside a request span and pass its outcome through every stage.
    pub async fn run<F>(&self, operation: &'static str, call: F) -> GatewayResult<ExecutionResult>
    where
        F: Future<Output = GatewayResult<ExecutionResult>>,
    {
        let ctx = CallContext::new(operation);
        let span = info_span!("gateway_call", request_id = %ctx.request_id, operation);
        let outcome = call.instrument(span.clone()).await;
        let _entered = span.enter();
        self.stages
            .iter()
            .fold(outcome, |outcome, stage| stage.complete(&ctx, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::time::Duration;

    fn empty_result() -> ExecutionResult {
        ExecutionResult {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            execution_time_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_timing_stamps_duration() {
        let chain = Middleware::default();
        let result = chain
            .run("sql", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(empty_result())
            })
            .await
            .unwrap();
        assert!(result.execution_time_ms >= 20);
    }

    #[tokio::test]
    async fn test_errors_are_scrubbed() {
        let chain = Middleware::standard(vec!["hunter22".to_string()]);
        let err = chain
            .run("sql", async {
                Err(GatewayError::connection(
                    "login failed for postgres://app:hunter22@db:5432/x",
                    "check credentials",
                ))
            })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("hunter22"), "{}", message);
        assert_eq!(err.kind(), "connection_error");
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        struct Tag(&'static str);
        impl Stage for Tag {
            fn complete(
                &self,
                _ctx: &CallContext,
                outcome: GatewayResult<ExecutionResult>,
            ) -> GatewayResult<ExecutionResult> {
                outcome.map(|mut r| {
                    r.columns
                        .push(crate::models::ColumnMetadata::new(self.0, "TEXT"));
                    r
                })
            }
        }
        let chain = Middleware::new(vec![Box::new(Tag("first")), Box::new(Tag("second"))]);
        let result = chain.run("sql", async { Ok(empty_result()) }).await.unwrap();
        let names: Vec<_> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
