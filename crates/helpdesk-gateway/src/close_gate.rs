//! Two-step confirmation before a ticket channel is closed.

use helpdesk_core::{ChannelRef, PromptId, UserRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("closing a ticket requires the manage channels permission")]
pub(crate) struct NotPermitted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Confirmed {
        channel: ChannelRef,
        requested_by: UserRef,
    },
    Cancelled,
    /// Answered after the timeout; treated like a cancel.
    Expired,
    /// Never issued, or already resolved.
    Unknown,
}

#[derive(Debug)]
struct Pending {
    channel: ChannelRef,
    requested_by: UserRef,
    deadline: Instant,
}

/// Outstanding close prompts. Each prompt resolves at most once.
#[derive(Debug)]
pub(crate) struct ClosureGate {
    timeout: Duration,
    pending: Mutex<HashMap<PromptId, Pending>>,
}

impl ClosureGate {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn prompt(
        &self,
        channel: ChannelRef,
        requested_by: UserRef,
        can_manage_channels: bool,
    ) -> Result<PromptId, NotPermitted> {
        if !can_manage_channels {
            return Err(NotPermitted);
        }
        let id = PromptId::new();
        self.lock().insert(
            id,
            Pending {
                channel,
                requested_by,
                deadline: Instant::now() + self.timeout,
            },
        );
        Ok(id)
    }

    pub(crate) fn resolve(&self, id: PromptId, decision: Decision) -> Resolution {
        let Some(pending) = self.lock().remove(&id) else {
            return Resolution::Unknown;
        };
        if Instant::now() >= pending.deadline {
            return Resolution::Expired;
        }
        match decision {
            Decision::Confirm => Resolution::Confirmed {
                channel: pending.channel,
                requested_by: pending.requested_by,
            },
            Decision::Cancel => Resolution::Cancelled,
        }
    }

    /// Drop expired prompts, returning how many were removed.
    pub(crate) fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, prompt| prompt.deadline > now);
        before - pending.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PromptId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sweep `gate` every `every` until `shutdown` fires.
pub(crate) fn spawn_sweeper(
    gate: Arc<ClosureGate>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let dropped = gate.sweep();
                    if dropped > 0 {
                        debug!(dropped, "expired close prompts dropped");
                    }
                }
            }
        }
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelRef {
        ChannelRef::new(10_u64, "product-alice-1")
    }

    fn staff() -> UserRef {
        UserRef::new(2_u64, "staff")
    }

    fn gate() -> ClosureGate {
        ClosureGate::new(Duration::from_secs(30))
    }

    #[test]
    fn prompt_requires_manage_channels() {
        assert_eq!(gate().prompt(channel(), staff(), false), Err(NotPermitted));
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_within_timeout() {
        let gate = gate();
        let id = gate.prompt(channel(), staff(), true).unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;

        assert_eq!(
            gate.resolve(id, Decision::Confirm),
            Resolution::Confirmed {
                channel: channel(),
                requested_by: staff(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prompts_are_single_use() {
        let gate = gate();
        let id = gate.prompt(channel(), staff(), true).unwrap();

        assert_eq!(gate.resolve(id, Decision::Cancel), Resolution::Cancelled);
        assert_eq!(gate.resolve(id, Decision::Confirm), Resolution::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_expired() {
        let gate = gate();
        let id = gate.prompt(channel(), staff(), true).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(gate.resolve(id, Decision::Confirm), Resolution::Expired);
        assert_eq!(gate.resolve(id, Decision::Confirm), Resolution::Unknown);
    }

    #[test]
    fn unknown_prompt_is_ignored() {
        assert_eq!(
            gate().resolve(PromptId::new(), Decision::Confirm),
            Resolution::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_prompts() {
        let gate = gate();
        let old = gate.prompt(channel(), staff(), true).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = gate.prompt(channel(), staff(), true).unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(gate.sweep(), 1);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.resolve(old, Decision::Confirm), Resolution::Unknown);
        assert!(matches!(
            gate.resolve(fresh, Decision::Confirm),
            Resolution::Confirmed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_clears_abandoned_prompts() {
        let gate = Arc::new(gate());
        gate.prompt(channel(), staff(), true).unwrap();
        let token = CancellationToken::new();
        let sweeper = spawn_sweeper(Arc::clone(&gate), Duration::from_secs(30), token.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(gate.len(), 0);

        token.cancel();
        sweeper.await.unwrap();
    }
}
