//! Discord adapter built on serenity.
//!
//! [`DiscordPlatform`] performs guild operations over the REST client.
//! [`DiscordClientFactory`] builds one gateway connection per attempt and
//! feeds its interactions to an [`InteractionHandler`].

mod convert;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use helpdesk_core::{
    ChannelId, ChannelRef, ClientFactory, CommandValue, HistoryMessage, InteractionEvent,
    InteractionHandler, InteractionKind, NewChannel, OutboundMessage, PermissionOverwrite,
    Platform, PlatformClient, PlatformError, ReadinessObserver, ResponseMode, RoleId, UserRef,
};
use serenity::all::{
    ActionRowComponent, Channel, ChannelId as DiscordChannelId, ChannelType, Client, Command,
    CommandDataOptionValue, CommandInteraction, ComponentInteraction, Context, CreateAttachment,
    CreateChannel, CreateInteractionResponse, CreateInteractionResponseFollowup, CreateMessage,
    EventHandler, GatewayIntents, GetMessages, GuildId, Http, Interaction, Member,
    ModalInteraction, PartialChannel, Permissions, Ready, ShardManager, User,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Discord caps a single history page at this many messages.
const HISTORY_PAGE_LIMIT: usize = 100;

/// Transcripts need message bodies, which Discord only delivers with the
/// message-content intent.
const INTENTS: GatewayIntents = GatewayIntents::GUILDS
    .union(GatewayIntents::GUILD_MESSAGES)
    .union(GatewayIntents::MESSAGE_CONTENT);

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Guild operations for the guild an interaction came from.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, guild_id: GuildId) -> Self {
        Self { http, guild_id }
    }
}

fn discord_channel(id: ChannelId) -> DiscordChannelId {
    DiscordChannelId::new(id.get())
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn category_exists(&self, id: ChannelId) -> Result<bool, PlatformError> {
        match discord_channel(id).to_channel(&*self.http).await {
            Ok(Channel::Guild(channel)) => {
                Ok(channel.kind == ChannelType::Category && channel.guild_id == self.guild_id)
            }
            Ok(_) => Ok(false),
            Err(error) => match convert::platform_error(&error) {
                PlatformError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_channel(&self, request: NewChannel) -> Result<ChannelRef, PlatformError> {
        let mut builder = CreateChannel::new(request.name)
            .kind(ChannelType::Text)
            .category(discord_channel(request.category));
        if let Some(topic) = request.topic {
            builder = builder.topic(topic);
        }
        let channel = self
            .guild_id
            .create_channel(&*self.http, builder)
            .await
            .map_err(|e| convert::platform_error(&e))?;
        Ok(ChannelRef::new(channel.id.get(), channel.name))
    }

    async fn set_permission(
        &self,
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PlatformError> {
        discord_channel(channel)
            .create_permission(
                &self.http,
                convert::overwrite(self.guild_id, overwrite.target, overwrite.access),
            )
            .await
            .map_err(|e| convert::platform_error(&e))
    }

    async fn send(
        &self,
        channel: ChannelId,
        message: OutboundMessage,
    ) -> Result<(), PlatformError> {
        let mut builder = CreateMessage::new().components(convert::buttons(message.buttons));
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        if let Some(embed) = message.embed {
            builder = builder.embed(convert::embed(embed));
        }
        if let Some(attachment) = message.attachment {
            builder = builder.add_file(CreateAttachment::bytes(
                attachment.bytes,
                attachment.filename,
            ));
        }
        discord_channel(channel)
            .send_message(&*self.http, builder)
            .await
            .map(|_| ())
            .map_err(|e| convert::platform_error(&e))
    }

    async fn fetch_history(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        let page = u8::try_from(limit.min(HISTORY_PAGE_LIMIT)).unwrap_or(u8::MAX);
        let mut messages = discord_channel(channel)
            .messages(&*self.http, GetMessages::new().limit(page))
            .await
            .map_err(|e| convert::platform_error(&e))?;
        // Discord returns newest first.
        messages.reverse();
        Ok(messages.iter().map(convert::history_message).collect())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        discord_channel(channel)
            .delete(&*self.http)
            .await
            .map(|_| ())
            .map_err(|e| convert::platform_error(&e))
    }
}

// ---------------------------------------------------------------------------
// Interaction translation
// ---------------------------------------------------------------------------

/// The interaction a response must be addressed to.
enum Responder {
    Component(Box<ComponentInteraction>),
    Modal(Box<ModalInteraction>),
    Command(Box<CommandInteraction>),
}

impl Responder {
    async fn respond(
        &self,
        http: &Http,
        response: CreateInteractionResponse,
    ) -> serenity::Result<()> {
        match self {
            Self::Component(i) => i.create_response(http, response).await,
            Self::Modal(i) => i.create_response(http, response).await,
            Self::Command(i) => i.create_response(http, response).await,
        }
    }

    async fn defer(&self, http: &Http) -> serenity::Result<()> {
        match self {
            Self::Component(i) => i.defer_ephemeral(http).await,
            Self::Modal(i) => i.defer_ephemeral(http).await,
            Self::Command(i) => i.defer_ephemeral(http).await,
        }
    }

    async fn followup(
        &self,
        http: &Http,
        followup: CreateInteractionResponseFollowup,
    ) -> serenity::Result<()> {
        let sent = match self {
            Self::Component(i) => i.create_followup(http, followup).await,
            Self::Modal(i) => i.create_followup(http, followup).await,
            Self::Command(i) => i.create_followup(http, followup).await,
        };
        sent.map(|_| ())
    }
}

struct Origin<'a> {
    user: &'a User,
    member: Option<&'a Member>,
    channel_id: DiscordChannelId,
    channel: Option<&'a PartialChannel>,
}

fn to_event(id: String, kind: InteractionKind, origin: &Origin<'_>) -> InteractionEvent {
    let permissions = origin
        .member
        .and_then(|m| m.permissions)
        .unwrap_or_else(Permissions::empty);
    InteractionEvent {
        id,
        kind,
        user: UserRef::new(origin.user.id.get(), origin.user.name.clone()),
        channel: ChannelRef::new(
            origin.channel_id.get(),
            origin
                .channel
                .and_then(|c| c.name.clone())
                .unwrap_or_default(),
        ),
        can_manage_channels: permissions.manage_channels(),
        is_admin: permissions.administrator(),
    }
}

fn modal_fields(interaction: &ModalInteraction) -> HashMap<String, String> {
    interaction
        .data
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            ActionRowComponent::InputText(input) => Some((
                input.custom_id.clone(),
                input.value.clone().unwrap_or_default(),
            )),
            _ => None,
        })
        .collect()
}

fn command_options(interaction: &CommandInteraction) -> HashMap<String, CommandValue> {
    interaction
        .data
        .options
        .iter()
        .filter_map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::Channel(id) => CommandValue::Channel(ChannelId(id.get())),
                CommandDataOptionValue::Role(id) => CommandValue::Role(RoleId(id.get())),
                CommandDataOptionValue::String(text) => CommandValue::Text(text.clone()),
                _ => return None,
            };
            Some((option.name.clone(), value))
        })
        .collect()
}

/// Translate a guild interaction; direct-message interactions yield `None`.
fn translate(interaction: Interaction) -> Option<(GuildId, InteractionEvent, Responder)> {
    match interaction {
        Interaction::Component(i) => {
            let guild_id = i.guild_id?;
            let origin = Origin {
                user: &i.user,
                member: i.member.as_ref(),
                channel_id: i.channel_id,
                channel: i.channel.as_ref(),
            };
            let event = to_event(i.data.custom_id.clone(), InteractionKind::Button, &origin);
            Some((guild_id, event, Responder::Component(Box::new(i))))
        }
        Interaction::Modal(i) => {
            let guild_id = i.guild_id?;
            let origin = Origin {
                user: &i.user,
                member: i.member.as_ref(),
                channel_id: i.channel_id,
                channel: i.channel.as_ref(),
            };
            let kind = InteractionKind::FormSubmit {
                fields: modal_fields(&i),
            };
            let event = to_event(i.data.custom_id.clone(), kind, &origin);
            Some((guild_id, event, Responder::Modal(Box::new(i))))
        }
        Interaction::Command(i) => {
            let guild_id = i.guild_id?;
            let origin = Origin {
                user: &i.user,
                member: i.member.as_deref(),
                channel_id: i.channel_id,
                channel: i.channel.as_ref(),
            };
            let kind = InteractionKind::Command {
                options: command_options(&i),
            };
            let event = to_event(i.data.name.clone(), kind, &origin);
            Some((guild_id, event, Responder::Command(Box::new(i))))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

type ObserverSlot = Arc<OnceLock<Arc<dyn ReadinessObserver>>>;

struct Handler {
    interactions: Arc<dyn InteractionHandler>,
    observer: ObserverSlot,
}

impl Handler {
    async fn dispatch(
        &self,
        http: Arc<Http>,
        guild_id: GuildId,
        event: InteractionEvent,
        responder: Responder,
    ) {
        let route = event.id.clone();
        let platform = DiscordPlatform::new(Arc::clone(&http), guild_id);

        match self.interactions.response_mode(&event) {
            ResponseMode::Immediate => {
                let effect = self.interactions.handle(event, &platform).await;
                if let Some(response) = convert::immediate_response(effect)
                    && let Err(error) = responder.respond(&http, response).await
                {
                    warn!(route = %route, error = %error, "failed to answer interaction");
                }
            }
            ResponseMode::Deferred => {
                if let Err(error) = responder.defer(&http).await {
                    warn!(route = %route, error = %error, "failed to acknowledge interaction");
                    return;
                }
                let effect = self.interactions.handle(event, &platform).await;
                if let Some(followup) = convert::followup_response(effect)
                    && let Err(error) = responder.followup(&http, followup).await
                {
                    warn!(route = %route, error = %error, "failed to send follow-up");
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let commands = self
            .interactions
            .commands()
            .iter()
            .map(convert::command)
            .collect();
        match Command::set_global_commands(&ctx.http, commands).await {
            Ok(registered) => info!(count = registered.len(), "slash commands registered"),
            Err(error) => warn!(error = %error, "failed to register slash commands"),
        }

        info!(user = %ready.user.name, guilds = ready.guilds.len(), "discord gateway ready");
        if let Some(observer) = self.observer.get() {
            observer.on_ready(ready.guilds.len());
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Some((guild_id, event, responder)) = translate(interaction) else {
            debug!("ignoring interaction outside a guild");
            return;
        };
        debug!(route = %event.id, user = %event.user.name, "interaction received");
        self.dispatch(Arc::clone(&ctx.http), guild_id, event, responder)
            .await;
    }
}

/// Builds Discord gateway clients from a bot token.
#[allow(missing_debug_implementations)]
pub struct DiscordClientFactory {
    token: String,
    interactions: Arc<dyn InteractionHandler>,
}

impl DiscordClientFactory {
    pub fn new(token: impl Into<String>, interactions: Arc<dyn InteractionHandler>) -> Self {
        Self {
            token: token.into(),
            interactions,
        }
    }
}

#[async_trait]
impl ClientFactory for DiscordClientFactory {
    async fn connect(&self) -> Result<Arc<dyn PlatformClient>> {
        let observer: ObserverSlot = Arc::new(OnceLock::new());
        let handler = Handler {
            interactions: Arc::clone(&self.interactions),
            observer: Arc::clone(&observer),
        };
        let client = Client::builder(&self.token, INTENTS)
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;
        let shard_manager = Arc::clone(&client.shard_manager);

        Ok(Arc::new(DiscordClient {
            client: tokio::sync::Mutex::new(client),
            shard_manager,
            observer,
        }))
    }
}

struct DiscordClient {
    client: tokio::sync::Mutex<Client>,
    shard_manager: Arc<ShardManager>,
    observer: ObserverSlot,
}

#[async_trait]
impl PlatformClient for DiscordClient {
    async fn run(&self, observer: Arc<dyn ReadinessObserver>) -> Result<()> {
        if self.observer.set(Arc::clone(&observer)).is_err() {
            anyhow::bail!("discord client was already started");
        }
        let outcome = self
            .client
            .lock()
            .await
            .start()
            .await
            .context("discord gateway stopped");
        observer.on_disconnect();
        outcome
    }

    async fn shutdown(&self) {
        self.shard_manager.shutdown_all().await;
    }
}
