//! Fake implementations for testing.
#![allow(clippy::unwrap_used)]

use crate::error::PlatformError;
use crate::traits::{ClientFactory, Platform, PlatformClient, ReadinessObserver};
use crate::types::{
    ChannelId, ChannelRef, HistoryMessage, NewChannel, OutboundMessage, PermissionOverwrite,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// FakePlatform
// ---------------------------------------------------------------------------

/// One recorded call against [`FakePlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CreateChannel(NewChannel),
    SetPermission {
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    },
    Send {
        channel: ChannelId,
        message: OutboundMessage,
    },
    FetchHistory {
        channel: ChannelId,
        limit: usize,
    },
    DeleteChannel(ChannelId),
}

/// In-memory guild that records every call with the (tokio) time it happened.
#[derive(Debug)]
pub struct FakePlatform {
    categories: Mutex<HashSet<ChannelId>>,
    history: Mutex<HashMap<ChannelId, Vec<HistoryMessage>>>,
    calls: Mutex<Vec<(Instant, PlatformCall)>>,
    next_channel_id: AtomicU64,
    fail_create: Mutex<Option<PlatformError>>,
    fail_permissions: Mutex<Option<PlatformError>>,
    fail_send: Mutex<HashMap<ChannelId, PlatformError>>,
    fail_history: Mutex<Option<PlatformError>>,
    fail_delete: Mutex<Option<PlatformError>>,
}

impl FakePlatform {
    pub const FIRST_CHANNEL_ID: u64 = 10_000;

    pub fn new() -> Self {
        Self {
            categories: Mutex::new(HashSet::new()),
            history: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_channel_id: AtomicU64::new(Self::FIRST_CHANNEL_ID),
            fail_create: Mutex::new(None),
            fail_permissions: Mutex::new(None),
            fail_send: Mutex::new(HashMap::new()),
            fail_history: Mutex::new(None),
            fail_delete: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_category(self, id: impl Into<ChannelId>) -> Self {
        self.categories.lock().unwrap().insert(id.into());
        self
    }

    pub fn remove_category(&self, id: ChannelId) {
        self.categories.lock().unwrap().remove(&id);
    }

    pub fn set_history(&self, channel: ChannelId, messages: Vec<HistoryMessage>) {
        self.history.lock().unwrap().insert(channel, messages);
    }

    pub fn fail_create_with(&self, error: PlatformError) {
        *self.fail_create.lock().unwrap() = Some(error);
    }

    pub fn fail_permissions_with(&self, error: PlatformError) {
        *self.fail_permissions.lock().unwrap() = Some(error);
    }

    pub fn fail_send_to(&self, channel: ChannelId, error: PlatformError) {
        self.fail_send.lock().unwrap().insert(channel, error);
    }

    pub fn fail_history_with(&self, error: PlatformError) {
        *self.fail_history.lock().unwrap() = Some(error);
    }

    pub fn fail_delete_with(&self, error: PlatformError) {
        *self.fail_delete.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, PlatformCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_channels(&self) -> Vec<NewChannel> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::CreateChannel(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn permissions_for(&self, channel: ChannelId) -> Vec<PermissionOverwrite> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::SetPermission {
                    channel: c,
                    overwrite,
                } if c == channel => Some(overwrite),
                _ => None,
            })
            .collect()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<OutboundMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::Send {
                    channel: c,
                    message,
                } if c == channel => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<ChannelId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::DeleteChannel(channel) => Some(channel),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn category_exists(&self, id: ChannelId) -> Result<bool, PlatformError> {
        Ok(self.categories.lock().unwrap().contains(&id))
    }

    async fn create_channel(&self, request: NewChannel) -> Result<ChannelRef, PlatformError> {
        // Give concurrent submissions a chance to interleave.
        tokio::task::yield_now().await;
        self.record(PlatformCall::CreateChannel(request.clone()));
        if let Some(error) = self.fail_create.lock().unwrap().clone() {
            return Err(error);
        }
        let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelRef::new(id, request.name))
    }

    async fn set_permission(
        &self,
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::SetPermission { channel, overwrite });
        match self.fail_permissions.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send(
        &self,
        channel: ChannelId,
        message: OutboundMessage,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Send { channel, message });
        match self.fail_send.lock().unwrap().get(&channel).cloned() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn fetch_history(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        self.record(PlatformCall::FetchHistory { channel, limit });
        if let Some(error) = self.fail_history.lock().unwrap().clone() {
            return Err(error);
        }
        let history = self
            .history
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        self.record(PlatformCall::DeleteChannel(channel));
        match self.fail_delete.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeClientFactory
// ---------------------------------------------------------------------------

/// What the next client built by [`FakeClientFactory`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientScript {
    /// `connect` itself fails.
    ConnectError(String),
    /// Becomes ready, then `run` fails.
    Fail(String),
    /// Becomes ready, then `run` returns cleanly.
    Finish,
    /// Becomes ready and runs until shut down.
    RunUntilShutdown,
}

/// Client factory that plays back a script, one entry per connection attempt.
///
/// When the script is exhausted every further client runs until shutdown.
#[derive(Debug)]
pub struct FakeClientFactory {
    script: Mutex<VecDeque<ClientScript>>,
    guild_count: usize,
    connects: Mutex<Vec<Instant>>,
    shutdowns: Arc<AtomicUsize>,
}

impl FakeClientFactory {
    pub fn new(script: impl IntoIterator<Item = ClientScript>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            guild_count: 1,
            connects: Mutex::new(Vec::new()),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Times at which `connect` was called.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    /// Number of `shutdown` calls across all clients built so far.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn connect(&self) -> Result<Arc<dyn PlatformClient>> {
        self.connects.lock().unwrap().push(Instant::now());
        let script = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ClientScript::RunUntilShutdown);
        if let ClientScript::ConnectError(message) = script {
            anyhow::bail!(message);
        }
        Ok(Arc::new(FakeClient {
            script,
            guild_count: self.guild_count,
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

#[derive(Debug)]
struct FakeClient {
    script: ClientScript,
    guild_count: usize,
    stopped: AtomicBool,
    stop: Notify,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl PlatformClient for FakeClient {
    async fn run(&self, observer: Arc<dyn ReadinessObserver>) -> Result<()> {
        observer.on_ready(self.guild_count);
        let outcome = match &self.script {
            ClientScript::Fail(message) => Err(anyhow::anyhow!(message.clone())),
            ClientScript::Finish | ClientScript::ConnectError(_) => Ok(()),
            ClientScript::RunUntilShutdown => {
                while !self.stopped.load(Ordering::SeqCst) {
                    self.stop.notified().await;
                }
                Ok(())
            }
        };
        observer.on_disconnect();
        outcome
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }
}
