//! Keeps the platform connection alive.
//!
//! Each attempt builds a fresh client. A failed attempt is shut down, counted,
//! and retried after a fixed delay until the restart ceiling is exceeded.

use chrono::Utc;
use helpdesk_core::{
    ClientFactory, PlatformClient, ReadinessObserver, SupervisorStatus, format_uptime,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RestartPolicy {
    pub restart_delay: Duration,
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(30),
            max_restarts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SupervisorExit {
    /// The client returned cleanly.
    Completed,
    /// `stop` was called.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("platform connection failed {restarts} times, giving up: {last_error}")]
pub(crate) struct SupervisorFatal {
    pub restarts: u32,
    pub last_error: String,
}

/// Shared supervisor status. Writers are the supervisor and its clients'
/// readiness callbacks; readers take a snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusHandle(Arc<Mutex<SupervisorStatus>>);

impl StatusHandle {
    pub(crate) fn snapshot(&self) -> SupervisorStatus {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update<T>(&self, change: impl FnOnce(&mut SupervisorStatus) -> T) -> T {
        change(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ReadinessObserver for StatusHandle {
    fn on_ready(&self, guild_count: usize) {
        self.update(|status| {
            status.ready = true;
            status.guild_count = guild_count;
        });
        info!(guilds = guild_count, "platform client ready");
    }

    fn on_disconnect(&self) {
        self.update(|status| status.ready = false);
    }
}

#[allow(missing_debug_implementations)]
pub(crate) struct Supervisor {
    factory: Arc<dyn ClientFactory>,
    policy: RestartPolicy,
    status: StatusHandle,
    shutdown: CancellationToken,
    active: Mutex<Option<Arc<dyn PlatformClient>>>,
}

impl Supervisor {
    pub(crate) fn new(factory: Arc<dyn ClientFactory>, policy: RestartPolicy) -> Self {
        Self {
            factory,
            policy,
            status: StatusHandle::default(),
            shutdown: CancellationToken::new(),
            active: Mutex::new(None),
        }
    }

    pub(crate) fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub(crate) fn status(&self) -> SupervisorStatus {
        self.status.snapshot()
    }

    /// Run clients until one returns cleanly, `stop` is called, or the
    /// restart ceiling is exceeded.
    pub(crate) async fn run_forever(&self) -> Result<SupervisorExit, SupervisorFatal> {
        self.status.update(|status| {
            status.running = true;
            status.start_time = Some(Utc::now());
        });
        info!(
            max_restarts = self.policy.max_restarts,
            restart_delay_secs = self.policy.restart_delay.as_secs(),
            "supervisor started"
        );

        let exit = self.supervise().await;
        self.status.update(|status| {
            status.running = false;
            status.ready = false;
        });
        match &exit {
            Ok(reason) => info!(exit = ?reason, "supervisor finished"),
            Err(fatal) => error!(restarts = fatal.restarts, error = %fatal.last_error, "supervisor gave up"),
        }
        exit
    }

    async fn supervise(&self) -> Result<SupervisorExit, SupervisorFatal> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(SupervisorExit::Stopped);
            }

            let attempt = self.status.snapshot().restart_count + 1;
            let span = info_span!("supervisor_attempt", attempt);
            let outcome = self.attempt().instrument(span).await;

            if self.shutdown.is_cancelled() {
                return Ok(SupervisorExit::Stopped);
            }
            let failure = match outcome {
                Ok(()) => return Ok(SupervisorExit::Completed),
                Err(failure) => failure,
            };

            let restarts = self.status.update(|status| {
                status.restart_count += 1;
                status.restart_count
            });
            error!(restarts, error = %failure, "platform client failed");

            if restarts > self.policy.max_restarts {
                return Err(SupervisorFatal {
                    restarts,
                    last_error: format!("{failure:#}"),
                });
            }

            warn!(
                restarts,
                delay_secs = self.policy.restart_delay.as_secs(),
                "restarting platform client"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(SupervisorExit::Stopped),
                () = tokio::time::sleep(self.policy.restart_delay) => {}
            }
        }
    }

    async fn attempt(&self) -> anyhow::Result<()> {
        let client = self.factory.connect().await?;
        self.set_active(Some(Arc::clone(&client)));

        // `stop` may have run while we were connecting.
        if self.shutdown.is_cancelled() {
            client.shutdown().await;
            self.set_active(None);
            return Ok(());
        }

        let observer: Arc<dyn ReadinessObserver> = Arc::new(self.status.clone());
        let result = client.run(observer).await;
        self.set_active(None);
        if result.is_err() {
            client.shutdown().await;
        }
        result
    }

    /// Stop supervising: cancel any pending backoff and shut the active
    /// client down. Safe to call more than once.
    pub(crate) async fn stop(&self) {
        self.shutdown.cancel();
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(client) = active {
            client.shutdown().await;
        }
    }

    fn set_active(&self, client: Option<Arc<dyn PlatformClient>>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = client;
    }
}

/// Log a status line every `every` until `shutdown` fires.
pub(crate) fn spawn_status_reporter(
    status: StatusHandle,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = status.snapshot();
                    info!(
                        running = snapshot.running,
                        uptime = %format_uptime(snapshot.uptime_secs(Utc::now())),
                        restarts = snapshot.restart_count,
                        ready = snapshot.ready,
                        guilds = snapshot.guild_count,
                        "supervisor status"
                    );
                }
            }
        }
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_core::fakes::{ClientScript, FakeClientFactory};

    fn policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            restart_delay: Duration::from_secs(30),
            max_restarts,
        }
    }

    fn supervisor(
        script: impl IntoIterator<Item = ClientScript>,
        max_restarts: u32,
    ) -> (Arc<Supervisor>, Arc<FakeClientFactory>) {
        let factory = Arc::new(FakeClientFactory::new(script));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&factory) as Arc<dyn ClientFactory>,
            policy(max_restarts),
        ));
        (supervisor, factory)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_fixed_delay_until_clean_exit() {
        let (supervisor, factory) = supervisor(
            [
                ClientScript::Fail("gateway reset".to_owned()),
                ClientScript::ConnectError("dns".to_owned()),
                ClientScript::Finish,
            ],
            10,
        );

        let exit = supervisor.run_forever().await;

        assert_eq!(exit, Ok(SupervisorExit::Completed));
        let status = supervisor.status();
        assert_eq!(status.restart_count, 2);
        assert!(!status.running);
        assert!(status.start_time.is_some());

        let connects = factory.connect_times();
        assert_eq!(connects.len(), 3);
        for pair in connects.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(30));
        }
        // Only the client that was built and failed needed releasing.
        assert_eq!(factory.shutdown_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ceiling() {
        let (supervisor, factory) = supervisor(
            std::iter::repeat_n(ClientScript::Fail("boom".to_owned()), 4),
            3,
        );

        let fatal = supervisor.run_forever().await.unwrap_err();

        assert_eq!(fatal.restarts, 4);
        assert!(fatal.last_error.contains("boom"));
        assert_eq!(factory.connect_count(), 4);
        let status = supervisor.status();
        assert!(!status.running);
        assert_eq!(status.restart_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_readiness_while_running() {
        let (supervisor, factory) = supervisor([], 10);
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run_forever().await }
        });

        wait_until(|| supervisor.status().ready).await;
        let status = supervisor.status();
        assert!(status.running);
        assert_eq!(status.guild_count, 1);
        assert_eq!(status.restart_count, 0);

        supervisor.stop().await;
        assert_eq!(task.await.unwrap(), Ok(SupervisorExit::Stopped));
        assert_eq!(factory.shutdown_count(), 1);
        assert!(!supervisor.status().ready);
    }

    #[tokio::test]
    async fn stop_cancels_pending_backoff() {
        let (supervisor, factory) =
            supervisor([ClientScript::Fail("gateway reset".to_owned())], 10);
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run_forever().await }
        });

        wait_until(|| supervisor.status().restart_count == 1).await;
        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(task.await.unwrap(), Ok(SupervisorExit::Stopped));
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn stop_before_start_never_connects() {
        let (supervisor, factory) = supervisor([], 10);
        supervisor.stop().await;

        assert_eq!(supervisor.run_forever().await, Ok(SupervisorExit::Stopped));
        assert_eq!(factory.connect_count(), 0);
    }

    #[test]
    fn status_handle_tracks_readiness() {
        let handle = StatusHandle::default();
        handle.on_ready(3);
        assert!(handle.snapshot().ready);
        assert_eq!(handle.snapshot().guild_count, 3);
        handle.on_disconnect();
        assert!(!handle.snapshot().ready);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reporter_stops_on_shutdown() {
        let token = CancellationToken::new();
        let reporter =
            spawn_status_reporter(StatusHandle::default(), Duration::from_secs(60), token.clone());
        tokio::time::sleep(Duration::from_secs(125)).await;
        token.cancel();
        reporter.await.unwrap();
    }
}
