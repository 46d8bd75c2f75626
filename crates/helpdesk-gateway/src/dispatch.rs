//! Routes platform interactions to ticket operations.
//!
//! Every button, form and slash command is addressed by a stable id (see
//! [`helpdesk_core::interaction_id`]). [`Route::parse`] maps the id to a
//! route, which fixes how the adapter acknowledges it and which handler runs.

use async_trait::async_trait;
use helpdesk_core::{
    Button, ButtonStyle, ChannelId, CommandOption, CommandOptionKind, CommandSpec, CommandValue,
    Effect, Embed, InteractionEvent, InteractionHandler, InteractionKind, OutboundMessage,
    Platform, PromptId, ResponseMode, RoleId, TicketError, TicketForm, TicketKind,
    interaction_id,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::close_gate::{ClosureGate, Decision, Resolution};
use crate::config_store::Config;
use crate::tickets::TicketManager;

const COLOR_PANEL: u32 = 0x58_65F2;

const CMD_PANEL: &str = "panel";
const CMD_CONFIG: &str = "config";
const CMD_SET_PRODUCTS: &str = "set_products_category";
const CMD_SET_PARTNERSHIPS: &str = "set_partnerships_category";
const CMD_SET_LOG: &str = "set_log_channel";
const CMD_SET_STAFF: &str = "set_staff_role";

const OPT_CATEGORY: &str = "category";
const OPT_CHANNEL: &str = "channel";
const OPT_ROLE: &str = "role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminCommand {
    Panel,
    Config,
    SetCategory(TicketKind),
    SetLogChannel,
    SetStaffRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Open(TicketKind),
    Submit(TicketKind),
    Close,
    Confirm(PromptId),
    Cancel(PromptId),
    Admin(AdminCommand),
}

impl Route {
    fn parse(id: &str) -> Option<Self> {
        let route = match interaction_id::split(id) {
            (interaction_id::OPEN_PREFIX, Some(slug)) => Self::Open(TicketKind::from_slug(slug)?),
            (interaction_id::FORM_PREFIX, Some(slug)) => Self::Submit(TicketKind::from_slug(slug)?),
            (interaction_id::CLOSE, None) => Self::Close,
            (interaction_id::CLOSE_CONFIRM_PREFIX, Some(prompt)) => {
                Self::Confirm(PromptId::parse(prompt)?)
            }
            (interaction_id::CLOSE_CANCEL_PREFIX, Some(prompt)) => {
                Self::Cancel(PromptId::parse(prompt)?)
            }
            (CMD_PANEL, None) => Self::Admin(AdminCommand::Panel),
            (CMD_CONFIG, None) => Self::Admin(AdminCommand::Config),
            (CMD_SET_PRODUCTS, None) => Self::Admin(AdminCommand::SetCategory(TicketKind::Product)),
            (CMD_SET_PARTNERSHIPS, None) => {
                Self::Admin(AdminCommand::SetCategory(TicketKind::Partnership))
            }
            (CMD_SET_LOG, None) => Self::Admin(AdminCommand::SetLogChannel),
            (CMD_SET_STAFF, None) => Self::Admin(AdminCommand::SetStaffRole),
            _ => return None,
        };
        Some(route)
    }

    /// Routes that call the platform before answering are deferred.
    fn response_mode(self) -> ResponseMode {
        match self {
            Self::Submit(_) | Self::Confirm(_) => ResponseMode::Deferred,
            Self::Open(_) | Self::Close | Self::Cancel(_) | Self::Admin(_) => {
                ResponseMode::Immediate
            }
        }
    }
}

/// The interaction handler handed to the platform adapter.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    tickets: Arc<TicketManager>,
    gate: Arc<ClosureGate>,
}

impl Dispatcher {
    pub(crate) fn new(tickets: Arc<TicketManager>, gate: Arc<ClosureGate>) -> Self {
        Self { tickets, gate }
    }

    async fn submit(
        &self,
        kind: TicketKind,
        event: InteractionEvent,
        platform: &dyn Platform,
    ) -> Effect {
        let InteractionKind::FormSubmit { fields } = &event.kind else {
            return Effect::Ignore;
        };
        let form = match TicketForm::from_fields(kind, fields) {
            Ok(form) => form,
            Err(error) => {
                debug!(user = %event.user.name, error = %error, "rejected ticket form");
                return Effect::Reply(TicketError::from(error).user_message());
            }
        };
        let result = match form {
            TicketForm::Product {
                product_name,
                description,
                deadline,
            } => {
                self.tickets
                    .submit_product_request(platform, &event.user, product_name, description, deadline)
                    .await
            }
            TicketForm::Partnership { invite_link } => {
                self.tickets
                    .submit_partnership_request(platform, &event.user, invite_link)
                    .await
            }
        };
        match result {
            Ok(ticket) => Effect::Reply(format!(
                "✅ Ticket created: {}",
                ticket.channel.mention()
            )),
            Err(error) => Effect::Reply(error.user_message()),
        }
    }

    fn request_close(&self, event: InteractionEvent) -> Effect {
        match self
            .gate
            .prompt(event.channel, event.user, event.can_manage_channels)
        {
            Ok(prompt) => {
                let message = OutboundMessage::text(format!(
                    "⚠️ Close this ticket? A transcript will be saved and the channel deleted. \
                     This prompt expires in {} seconds.",
                    self.gate.timeout().as_secs()
                ))
                .with_button(Button::new(
                    interaction_id::confirm_close(prompt),
                    "✅ Yes, close",
                    ButtonStyle::Danger,
                ))
                .with_button(Button::new(
                    interaction_id::cancel_close(prompt),
                    "Cancel",
                    ButtonStyle::Secondary,
                ));
                Effect::Message {
                    message,
                    ephemeral: true,
                }
            }
            Err(error) => {
                debug!(error = %error, "close request refused");
                Effect::Reply("❌ Only staff can close tickets.".to_owned())
            }
        }
    }

    async fn confirm_close(&self, prompt: PromptId, platform: &dyn Platform) -> Effect {
        match self.gate.resolve(prompt, Decision::Confirm) {
            Resolution::Confirmed {
                channel,
                requested_by,
            } => match self
                .tickets
                .close_ticket(platform, &channel, &requested_by)
                .await
            {
                // The channel is gone; there is nothing left to answer in.
                Ok(transcript) => {
                    info!(
                        channel = %transcript.channel.name,
                        path = %transcript.path.display(),
                        messages = transcript.lines,
                        "ticket archived"
                    );
                    Effect::Ignore
                }
                Err(error) => {
                    warn!(channel = %channel.name, error = %error, "ticket closure failed");
                    Effect::Reply(error.user_message())
                }
            },
            Resolution::Expired => Effect::Reply(expired_message()),
            // The ack was deferred, so the user must hear back.
            Resolution::Cancelled | Resolution::Unknown => Effect::Reply(stale_message()),
        }
    }

    fn cancel_close(&self, prompt: PromptId) -> Effect {
        match self.gate.resolve(prompt, Decision::Cancel) {
            Resolution::Cancelled => Effect::Reply("✅ Closure cancelled.".to_owned()),
            Resolution::Expired => Effect::Reply(expired_message()),
            Resolution::Unknown => Effect::Reply(stale_message()),
            Resolution::Confirmed { .. } => Effect::Ignore,
        }
    }

    fn admin(&self, command: AdminCommand, event: &InteractionEvent) -> Effect {
        if !event.is_admin {
            return Effect::Reply("❌ Only administrators can use this command.".to_owned());
        }
        let InteractionKind::Command { options } = &event.kind else {
            return Effect::Ignore;
        };

        let store = self.tickets.config();
        let reply = match command {
            AdminCommand::Panel => {
                return Effect::Message {
                    message: panel(),
                    ephemeral: false,
                };
            }
            AdminCommand::Config => describe(&store.snapshot()),
            AdminCommand::SetCategory(kind) => {
                let Some(CommandValue::Channel(id)) = options.get(OPT_CATEGORY) else {
                    return missing_option(OPT_CATEGORY);
                };
                store.update(|config| match kind {
                    TicketKind::Product => config.products_category_id = Some(*id),
                    TicketKind::Partnership => config.partnerships_category_id = Some(*id),
                });
                format!("✅ {} category set to {}.", kind.label(), channel_mention(*id))
            }
            AdminCommand::SetLogChannel => {
                let Some(CommandValue::Channel(id)) = options.get(OPT_CHANNEL) else {
                    return missing_option(OPT_CHANNEL);
                };
                store.update(|config| config.log_channel_id = Some(*id));
                format!("✅ Log channel set to {}.", channel_mention(*id))
            }
            AdminCommand::SetStaffRole => {
                let Some(CommandValue::Role(id)) = options.get(OPT_ROLE) else {
                    return missing_option(OPT_ROLE);
                };
                store.update(|config| config.staff_role_id = Some(*id));
                format!("✅ Staff role set to {}.", role_mention(*id))
            }
        };
        info!(command = ?command, user = %event.user.name, "admin command applied");
        Effect::Reply(reply)
    }
}

#[async_trait]
impl InteractionHandler for Dispatcher {
    fn commands(&self) -> Vec<CommandSpec> {
        let set_category = |name, kind: TicketKind| CommandSpec {
            name,
            description: match kind {
                TicketKind::Product => "Set the category for product tickets",
                TicketKind::Partnership => "Set the category for partnership tickets",
            },
            option: Some(CommandOption {
                name: OPT_CATEGORY,
                description: "Category new tickets are created under",
                kind: CommandOptionKind::Category,
            }),
        };
        vec![
            CommandSpec {
                name: CMD_PANEL,
                description: "Post the ticket panel in this channel",
                option: None,
            },
            CommandSpec {
                name: CMD_CONFIG,
                description: "Show the current ticket configuration",
                option: None,
            },
            set_category(CMD_SET_PRODUCTS, TicketKind::Product),
            set_category(CMD_SET_PARTNERSHIPS, TicketKind::Partnership),
            CommandSpec {
                name: CMD_SET_LOG,
                description: "Set the channel that receives ticket logs and transcripts",
                option: Some(CommandOption {
                    name: OPT_CHANNEL,
                    description: "Log channel",
                    kind: CommandOptionKind::TextChannel,
                }),
            },
            CommandSpec {
                name: CMD_SET_STAFF,
                description: "Set the role that can see every ticket",
                option: Some(CommandOption {
                    name: OPT_ROLE,
                    description: "Staff role",
                    kind: CommandOptionKind::Role,
                }),
            },
        ]
    }

    fn response_mode(&self, event: &InteractionEvent) -> ResponseMode {
        Route::parse(&event.id).map_or(ResponseMode::Immediate, Route::response_mode)
    }

    async fn handle(&self, event: InteractionEvent, platform: &dyn Platform) -> Effect {
        let Some(route) = Route::parse(&event.id) else {
            debug!(id = %event.id, "no route for interaction");
            return Effect::Ignore;
        };
        debug!(
            route = ?route,
            user = %event.user.name,
            channel = %event.channel.name,
            "dispatching interaction"
        );

        match route {
            Route::Open(kind) => Effect::OpenForm(kind),
            Route::Submit(kind) => self.submit(kind, event, platform).await,
            Route::Close => self.request_close(event),
            Route::Confirm(prompt) => self.confirm_close(prompt, platform).await,
            Route::Cancel(prompt) => self.cancel_close(prompt),
            Route::Admin(command) => self.admin(command, &event),
        }
    }
}

/// The public panel members use to open tickets.
fn panel() -> OutboundMessage {
    let embed = Embed::new(
        "🎫 Support tickets",
        "Need something from the team? Pick the kind of request below and fill in \
         the short form. A private channel will be created for you.",
        COLOR_PANEL,
    )
    .footer("Helpdesk tickets");
    TicketKind::ALL
        .into_iter()
        .fold(OutboundMessage::embed(embed), |message, kind| {
            let (label, style) = match kind {
                TicketKind::Product => ("📦 Products", ButtonStyle::Primary),
                TicketKind::Partnership => ("🤝 Partnerships", ButtonStyle::Success),
            };
            message.with_button(Button::new(interaction_id::open(kind), label, style))
        })
}

fn describe(config: &Config) -> String {
    let channel = |id: Option<ChannelId>| id.map_or_else(|| "not set".to_owned(), channel_mention);
    format!(
        "🔧 **Ticket configuration**\n\
         Products category: {}\n\
         Partnerships category: {}\n\
         Log channel: {}\n\
         Staff role: {}\n\
         Next ticket number: {}",
        channel(config.products_category_id),
        channel(config.partnerships_category_id),
        channel(config.log_channel_id),
        config
            .staff_role_id
            .map_or_else(|| "not set".to_owned(), role_mention),
        config.ticket_counter,
    )
}

fn channel_mention(id: ChannelId) -> String {
    format!("<#{id}>")
}

fn role_mention(id: RoleId) -> String {
    format!("<@&{id}>")
}

fn missing_option(name: &str) -> Effect {
    Effect::Reply(format!("⚠️ Missing required option `{name}`."))
}

fn stale_message() -> String {
    "⚠️ This prompt is no longer valid. Press the close button again.".to_owned()
}

fn expired_message() -> String {
    "⌛ This confirmation has expired. Press the close button again.".to_owned()
}
