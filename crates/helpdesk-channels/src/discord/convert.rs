//! Conversions between helpdesk types and serenity models/builders.

use chrono::{DateTime, Utc};
use helpdesk_core::{
    Access, Button, ButtonStyle, CommandOptionKind, CommandSpec, Effect, Embed, HistoryMessage,
    OutboundMessage, PermissionTarget, PlatformError, TicketKind, interaction_id,
};
use serenity::all::{
    ButtonStyle as DiscordButtonStyle, ChannelType, CommandOptionType, CreateActionRow,
    CreateButton, CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter,
    CreateInputText, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateModal, GuildId, InputTextStyle, Message,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, Timestamp, UserId,
};

pub(crate) fn embed(embed: Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new()
        .title(embed.title)
        .description(embed.description)
        .colour(embed.color);
    for field in embed.fields {
        builder = builder.field(field.name, field.value, true);
    }
    if let Some(footer) = embed.footer {
        builder = builder.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(at) = embed.timestamp
        && let Ok(timestamp) = Timestamp::from_unix_timestamp(at.timestamp())
    {
        builder = builder.timestamp(timestamp);
    }
    builder
}

pub(crate) fn buttons(buttons: Vec<Button>) -> Vec<CreateActionRow> {
    if buttons.is_empty() {
        return Vec::new();
    }
    let row = buttons
        .into_iter()
        .map(|button| {
            CreateButton::new(button.custom_id)
                .label(button.label)
                .style(button_style(button.style))
        })
        .collect();
    vec![CreateActionRow::Buttons(row)]
}

fn button_style(style: ButtonStyle) -> DiscordButtonStyle {
    match style {
        ButtonStyle::Primary => DiscordButtonStyle::Primary,
        ButtonStyle::Secondary => DiscordButtonStyle::Secondary,
        ButtonStyle::Success => DiscordButtonStyle::Success,
        ButtonStyle::Danger => DiscordButtonStyle::Danger,
    }
}

/// Allow/deny bits for an overwrite; the everyone role shares the guild's id.
pub(crate) fn overwrite(
    guild_id: GuildId,
    target: PermissionTarget,
    access: Access,
) -> PermissionOverwrite {
    let kind = match target {
        PermissionTarget::Member(user) => PermissionOverwriteType::Member(UserId::new(user.get())),
        PermissionTarget::Role(role) => PermissionOverwriteType::Role(RoleId::new(role.get())),
        PermissionTarget::Everyone => PermissionOverwriteType::Role(RoleId::new(guild_id.get())),
    };
    let (allow, deny) = match access {
        Access::Allow => (
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
            Permissions::empty(),
        ),
        Access::Deny => (Permissions::empty(), Permissions::VIEW_CHANNEL),
    };
    PermissionOverwrite { allow, deny, kind }
}

pub(crate) fn history_message(message: &Message) -> HistoryMessage {
    HistoryMessage {
        author: message.author.name.clone(),
        content: message.content.clone(),
        timestamp: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
            .unwrap_or_else(Utc::now),
        has_attachments: !message.attachments.is_empty(),
    }
}

pub(crate) fn platform_error(error: &serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http) = error
        && let Some(status) = http.status_code()
    {
        return match status.as_u16() {
            429 => PlatformError::RateLimited,
            403 => PlatformError::PermissionDenied(http.to_string()),
            404 => PlatformError::NotFound(http.to_string()),
            _ => PlatformError::Transient(http.to_string()),
        };
    }
    PlatformError::Transient(error.to_string())
}

pub(crate) fn command(spec: &CommandSpec) -> CreateCommand {
    let mut builder = CreateCommand::new(spec.name)
        .description(spec.description)
        .default_member_permissions(Permissions::ADMINISTRATOR);
    if let Some(option) = spec.option {
        let created = match option.kind {
            CommandOptionKind::Category => {
                CreateCommandOption::new(CommandOptionType::Channel, option.name, option.description)
                    .channel_types(vec![ChannelType::Category])
            }
            CommandOptionKind::TextChannel => {
                CreateCommandOption::new(CommandOptionType::Channel, option.name, option.description)
                    .channel_types(vec![ChannelType::Text])
            }
            CommandOptionKind::Role => {
                CreateCommandOption::new(CommandOptionType::Role, option.name, option.description)
            }
        };
        builder = builder.add_option(created.required(true));
    }
    builder
}

fn form_modal(kind: TicketKind) -> CreateModal {
    let rows = kind
        .form_fields()
        .iter()
        .map(|field| {
            let style = if field.long {
                InputTextStyle::Paragraph
            } else {
                InputTextStyle::Short
            };
            let mut input = CreateInputText::new(style, field.label, field.id)
                .placeholder(field.placeholder)
                .required(true);
            if let Some(max) = field.max_length {
                input = input.max_length(max);
            }
            CreateActionRow::InputText(input)
        })
        .collect();
    CreateModal::new(interaction_id::form(kind), kind.form_title()).components(rows)
}

/// First response for an `Immediate` route. `None` means nothing to send.
pub(crate) fn immediate_response(effect: Effect) -> Option<CreateInteractionResponse> {
    let response = match effect {
        Effect::OpenForm(kind) => CreateInteractionResponse::Modal(form_modal(kind)),
        Effect::Reply(content) => CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        ),
        Effect::Message { message, ephemeral } => {
            CreateInteractionResponse::Message(message_response(message).ephemeral(ephemeral))
        }
        Effect::Ignore => return None,
    };
    Some(response)
}

/// Follow-up for a `Deferred` route; only text replies make sense there.
pub(crate) fn followup_response(effect: Effect) -> Option<CreateInteractionResponseFollowup> {
    match effect {
        Effect::Reply(content) => Some(
            CreateInteractionResponseFollowup::new()
                .content(content)
                .ephemeral(true),
        ),
        Effect::Ignore => None,
        other => {
            tracing::warn!(effect = ?other, "effect cannot be sent as a follow-up");
            None
        }
    }
}

fn message_response(message: OutboundMessage) -> CreateInteractionResponseMessage {
    let mut builder = CreateInteractionResponseMessage::new().components(buttons(message.buttons));
    if let Some(content) = message.content {
        builder = builder.content(content);
    }
    if let Some(rich) = message.embed {
        builder = builder.embed(embed(rich));
    }
    builder
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_core::{CommandOption, EmbedField, UserId as HelpdeskUserId};

    #[test]
    fn everyone_overwrite_targets_guild_role() {
        let guild = GuildId::new(99);
        let overwrite = overwrite(guild, PermissionTarget::Everyone, Access::Deny);
        assert_eq!(overwrite.kind, PermissionOverwriteType::Role(RoleId::new(99)));
        assert!(overwrite.deny.contains(Permissions::VIEW_CHANNEL));
        assert!(overwrite.allow.is_empty());
    }

    #[test]
    fn member_overwrite_allows_view_and_send() {
        let overwrite = overwrite(
            GuildId::new(1),
            PermissionTarget::Member(HelpdeskUserId(5)),
            Access::Allow,
        );
        assert_eq!(overwrite.kind, PermissionOverwriteType::Member(UserId::new(5)));
        assert!(overwrite.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(overwrite.allow.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn embed_carries_fields_and_footer() {
        let built = embed(
            Embed::new("Ticket closed", "bye", 0x2E_CC71)
                .field(EmbedField::new("Product", "Logo"))
                .footer("Tickets"),
        );
        let json = serde_json::to_value(&built).unwrap();
        assert_eq!(json["title"], "Ticket closed");
        assert_eq!(json["color"], 0x2E_CC71);
        assert_eq!(json["fields"][0]["name"], "Product");
        assert_eq!(json["footer"]["text"], "Tickets");
    }

    #[test]
    fn no_buttons_means_no_rows() {
        assert!(buttons(Vec::new()).is_empty());
        assert_eq!(
            buttons(vec![Button::new("a", "A", ButtonStyle::Primary)]).len(),
            1
        );
    }

    #[test]
    fn ignore_renders_nothing() {
        assert!(immediate_response(Effect::Ignore).is_none());
        assert!(followup_response(Effect::Ignore).is_none());
    }

    #[test]
    fn public_message_renders_embed_and_buttons() {
        let message = OutboundMessage::embed(Embed::new("Tickets", "Pick one", 0x58_65F2))
            .with_button(Button::new("ticket:open:product", "Products", ButtonStyle::Primary));
        let response = immediate_response(Effect::Message {
            message,
            ephemeral: false,
        })
        .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["data"]["embeds"][0]["title"], "Tickets");
        assert_eq!(
            json["data"]["components"][0]["components"][0]["custom_id"],
            "ticket:open:product"
        );
    }

    #[test]
    fn forms_cannot_be_followups() {
        assert!(followup_response(Effect::OpenForm(TicketKind::Product)).is_none());
    }

    #[test]
    fn command_with_role_option_serializes() {
        let spec = CommandSpec {
            name: "set_staff_role",
            description: "Set the staff role",
            option: Some(CommandOption {
                name: "role",
                description: "Staff role",
                kind: CommandOptionKind::Role,
            }),
        };
        let json = serde_json::to_value(command(&spec)).unwrap();
        assert_eq!(json["name"], "set_staff_role");
        assert_eq!(json["options"][0]["name"], "role");
        assert_eq!(json["options"][0]["required"], true);
    }
}
