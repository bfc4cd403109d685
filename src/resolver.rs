use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ctgov::CtgovClient;
use crate::domain::ResolutionOutcome;
use crate::normalize::NormalizedId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(200),
        }
    }
}

/// Wraps a lookup client with the retry budget. `NotFound` is final on the first answer;
/// `TransientError` is retried until the budget runs out and then returned as-is.
#[derive(Debug, Clone)]
pub struct DetailResolver<C: CtgovClient> {
    client: C,
    policy: RetryPolicy,
}

impl<C: CtgovClient> DetailResolver<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn resolve(&self, id: &NormalizedId) -> ResolutionOutcome {
        let mut attempt = 0u32;
        loop {
            let outcome = self.client.fetch_study(id);
            match outcome {
                ResolutionOutcome::TransientError(reason) if attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    debug!(%id, attempt, %reason, "transient lookup failure, retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                ResolutionOutcome::TransientError(reason) => {
                    warn!(%id, attempts = attempt + 1, %reason, "lookup retries exhausted");
                    return ResolutionOutcome::TransientError(reason);
                }
                other => return other,
            }
        }
    }
}
