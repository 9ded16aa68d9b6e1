use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use conductor_core::agent::{Budget, Scope};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Model,
    Tool,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Model => "model",
            Self::Tool => "tool",
        })
    }
}

/// A scope's `max_calls` is spent. Fails closed: no further calls in that
/// scope are admitted for the rest of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{scope} budget exhausted ({max_calls} calls)")]
pub struct BudgetExceeded {
    pub scope: ScopeKind,
    pub max_calls: u32,
}

/// A single call ran past its scope timeout on every attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {attempts} attempt(s) of {timeout:?}")]
pub struct CallTimeout {
    pub attempts: u32,
    pub timeout: Duration,
}

/// Per-run budget counters. Counters only ever grow.
#[derive(Debug, Clone)]
pub struct BudgetState {
    budget: Budget,
    model_calls: u32,
    tool_calls: u32,
    started: Instant,
}

impl BudgetState {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            model_calls: 0,
            tool_calls: 0,
            started: Instant::now(),
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn model_calls(&self) -> u32 {
        self.model_calls
    }

    pub fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    pub fn admit_model_call(&mut self) -> Result<(), BudgetExceeded> {
        admit(&mut self.model_calls, &self.budget.model, ScopeKind::Model)
    }

    pub fn admit_tool_call(&mut self) -> Result<(), BudgetExceeded> {
        admit(&mut self.tool_calls, &self.budget.tool, ScopeKind::Tool)
    }

    /// True when the next model call would be denied.
    pub fn model_exhausted(&self) -> bool {
        spent(self.model_calls, &self.budget.model)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn run_timed_out(&self) -> bool {
        self.budget
            .run_timeout()
            .is_some_and(|limit| self.elapsed() >= limit)
    }
}

fn spent(used: u32, scope: &Scope) -> bool {
    scope.max_calls > 0 && used >= scope.max_calls
}

fn admit(counter: &mut u32, scope: &Scope, kind: ScopeKind) -> Result<(), BudgetExceeded> {
    if spent(*counter, scope) {
        return Err(BudgetExceeded {
            scope: kind,
            max_calls: scope.max_calls,
        });
    }
    *counter += 1;
    Ok(())
}

/// Run `attempt` under the scope's per-call timeout, retrying up to
/// `retry_count` extra times with no backoff. Without a timeout the attempt
/// runs once to completion.
pub async fn retry_on_timeout<T, F, Fut>(
    label: &str,
    scope: &Scope,
    mut attempt: F,
) -> Result<T, CallTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(timeout) = scope.timeout() else {
        return Ok(attempt().await);
    };

    let attempts = scope.retry_count + 1;
    for n in 1..=attempts {
        match tokio::time::timeout(timeout, attempt()).await {
            Ok(value) => return Ok(value),
            Err(_) if n < attempts => {
                warn!(call = label, attempt = n, timeout_ms = timeout.as_millis() as u64, "call timed out, retrying");
            }
            Err(_) => {}
        }
    }

    warn!(call = label, attempts, timeout_ms = timeout.as_millis() as u64, "call timed out, retries exhausted");
    Err(CallTimeout { attempts, timeout })
}
