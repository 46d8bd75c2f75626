//! Core trait definitions for Helpdesk.
//!
//! These define the contracts between components. The Discord adapter lives in
//! helpdesk-channels; ticket handling and supervision live in the gateway.

use crate::error::PlatformError;
use crate::types::{
    ChannelId, ChannelRef, CommandSpec, Effect, HistoryMessage, InteractionEvent, NewChannel,
    OutboundMessage, PermissionOverwrite, ResponseMode,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Remote operations against one guild of the chat platform.
///
/// Every call may fail with a retryable (rate limit, network) or permanent
/// (permission, missing object) [`PlatformError`].
#[async_trait]
pub trait Platform: Send + Sync {
    /// Whether `id` still names a category in this guild.
    async fn category_exists(&self, id: ChannelId) -> Result<bool, PlatformError>;

    async fn create_channel(&self, request: NewChannel) -> Result<ChannelRef, PlatformError>;

    async fn set_permission(
        &self,
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError>;

    async fn send(&self, channel: ChannelId, message: OutboundMessage)
    -> Result<(), PlatformError>;

    /// Up to `limit` most recent messages, oldest first.
    async fn fetch_history(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError>;

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError>;
}

// ---------------------------------------------------------------------------
// Interaction handling
// ---------------------------------------------------------------------------

/// Turns inbound interactions into effects for the adapter to render.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Slash commands to register with the platform.
    fn commands(&self) -> Vec<CommandSpec>;

    /// How the adapter must acknowledge `event` before calling [`handle`].
    ///
    /// [`handle`]: InteractionHandler::handle
    fn response_mode(&self, event: &InteractionEvent) -> ResponseMode;

    async fn handle(&self, event: InteractionEvent, platform: &dyn Platform) -> Effect;
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Receives readiness changes from a running client.
pub trait ReadinessObserver: Send + Sync {
    fn on_ready(&self, guild_count: usize);

    fn on_disconnect(&self);
}

/// One connected platform client instance.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Run the event loop until it fails or is shut down.
    ///
    /// `Ok(())` means the client stopped cleanly.
    async fn run(&self, observer: Arc<dyn ReadinessObserver>) -> Result<()>;

    /// Close the connection and release resources. Idempotent.
    async fn shutdown(&self);
}

/// Builds a fresh client for every connection attempt.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PlatformClient>>;
}
