//! Bounded waiting for asynchronous client status transitions
//!
//! Registration and unregistration complete on the central server some time
//! after the API accepted them. [`StatusWait`] is an explicit state machine: each
//! observed client either reaches the target, schedules another probe after the
//! poll interval, or exhausts the attempt budget.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::xroad::models::{Client, ClientStatus};

/// How often and how many times a status is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// Terminal condition a wait is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    /// `REGISTERED`
    Registered,
    /// `DELETION_IN_PROGRESS` or `SAVED`
    Unregistered,
}

impl StatusTarget {
    pub fn is_reached(self, status: ClientStatus) -> bool {
        match self {
            StatusTarget::Registered => status == ClientStatus::Registered,
            StatusTarget::Unregistered => matches!(
                status,
                ClientStatus::DeletionInProgress | ClientStatus::Saved
            ),
        }
    }

    pub fn operation(self) -> &'static str {
        match self {
            StatusTarget::Registered => "register-client",
            StatusTarget::Unregistered => "unregister-client",
        }
    }
}

/// Outcome of feeding one observation into a [`StatusWait`]
#[derive(Debug, Clone, PartialEq)]
pub enum WaitStep {
    Reached(Client),
    Pending { retry_in: Duration, last_status: ClientStatus },
    Exhausted { last_status: ClientStatus },
}

/// Awaiting state: target status plus the remaining attempt budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWait {
    target: StatusTarget,
    attempts_remaining: u32,
    policy: PollPolicy,
}

impl StatusWait {
    pub fn new(target: StatusTarget, policy: PollPolicy) -> Self {
        Self {
            target,
            attempts_remaining: policy.max_attempts.max(1),
            policy,
        }
    }

    pub fn target(&self) -> StatusTarget {
        self.target
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Consumes one attempt with the latest observed client
    pub fn observe(&mut self, client: Client) -> WaitStep {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);

        if self.target.is_reached(client.status) {
            WaitStep::Reached(client)
        } else if self.attempts_remaining == 0 {
            WaitStep::Exhausted {
                last_status: client.status,
            }
        } else {
            WaitStep::Pending {
                retry_in: self.policy.interval,
                last_status: client.status,
            }
        }
    }

    /// Drives the wait to completion, probing with `probe` between sleeps
    pub async fn run<F, Fut>(mut self, client_id: &str, mut probe: F) -> ControllerResult<Client>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ControllerResult<Client>> + Send,
    {
        loop {
            let client = probe().await?;
            match self.observe(client) {
                WaitStep::Reached(client) => {
                    info!(
                        client_id,
                        status = %client.status,
                        "Client reached {:?}",
                        self.target
                    );
                    return Ok(client);
                }
                WaitStep::Pending {
                    retry_in,
                    last_status,
                } => {
                    debug!(
                        client_id,
                        status = %last_status,
                        attempts_remaining = self.attempts_remaining,
                        "Waiting for client status to change"
                    );
                    tokio::time::sleep(retry_in).await;
                }
                WaitStep::Exhausted { last_status } => {
                    warn!(
                        client_id,
                        status = %last_status,
                        max_attempts = self.policy.max_attempts,
                        "Gave up waiting for client status"
                    );
                    return Err(ControllerError::timeout(
                        self.target.operation(),
                        format!(
                            "client {} still {} after {} status checks",
                            client_id, last_status, self.policy.max_attempts
                        ),
                    ));
                }
            }
        }
    }
}
