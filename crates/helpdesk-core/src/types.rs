use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::FormError;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id!(
    /// A channel or category on the platform.
    ChannelId
);
snowflake_id!(
    /// A guild role.
    RoleId
);
snowflake_id!(
    /// A platform user.
    UserId
);

/// A user as seen by an interaction: id plus the handle used in channel names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
}

impl UserRef {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A channel reference returned to callers ("ticket created: #channel").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub name: String,
}

impl ChannelRef {
    pub fn new(id: impl Into<ChannelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

// ---------------------------------------------------------------------------
// Tickets and forms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketKind {
    Product,
    Partnership,
}

impl TicketKind {
    pub const ALL: [Self; 2] = [Self::Product, Self::Partnership];

    /// Prefix used in channel names and interaction ids.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Partnership => "partnership",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Product => "Products",
            Self::Partnership => "Partnerships",
        }
    }

    pub fn form_title(self) -> &'static str {
        match self {
            Self::Product => "Request a custom product",
            Self::Partnership => "Request an official partnership",
        }
    }

    /// The typed field set the submission form for this kind collects.
    pub fn form_fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Product => PRODUCT_FIELDS,
            Self::Partnership => PARTNERSHIP_FIELDS,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One input of a submission form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub placeholder: &'static str,
    /// Multi-line input.
    pub long: bool,
    pub max_length: Option<u16>,
}

pub const FIELD_PRODUCT_NAME: &str = "product_name";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_DEADLINE: &str = "deadline";
pub const FIELD_INVITE_LINK: &str = "invite_link";

const PRODUCT_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        id: FIELD_PRODUCT_NAME,
        label: "Product name",
        placeholder: "e.g. logo, banner, thumbnail...",
        long: false,
        max_length: None,
    },
    FieldSpec {
        id: FIELD_DESCRIPTION,
        label: "Request description",
        placeholder: "Describe the artwork, colours, themes, references...",
        long: true,
        max_length: Some(1000),
    },
    FieldSpec {
        id: FIELD_DEADLINE,
        label: "Desired deadline",
        placeholder: "e.g. 3 days, 1 week...",
        long: false,
        max_length: None,
    },
];

const PARTNERSHIP_FIELDS: &[FieldSpec] = &[FieldSpec {
    id: FIELD_INVITE_LINK,
    label: "Server invite link",
    placeholder: "Paste your server invite here...",
    long: false,
    max_length: None,
}];

/// A submitted request, one variant per ticket kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TicketForm {
    Product {
        product_name: String,
        description: String,
        deadline: String,
    },
    Partnership {
        invite_link: String,
    },
}

impl TicketForm {
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::Product { .. } => TicketKind::Product,
            Self::Partnership { .. } => TicketKind::Partnership,
        }
    }

    /// Build a form from raw submitted values keyed by field id.
    pub fn from_fields(
        kind: TicketKind,
        fields: &HashMap<String, String>,
    ) -> Result<Self, FormError> {
        let take = |id: &'static str| -> Result<String, FormError> {
            let value = fields.get(id).map(|v| v.trim()).unwrap_or_default();
            if value.is_empty() {
                return Err(FormError::MissingField(id));
            }
            Ok(value.to_owned())
        };

        let form = match kind {
            TicketKind::Product => Self::Product {
                product_name: take(FIELD_PRODUCT_NAME)?,
                description: take(FIELD_DESCRIPTION)?,
                deadline: take(FIELD_DEADLINE)?,
            },
            TicketKind::Partnership => Self::Partnership {
                invite_link: take(FIELD_INVITE_LINK)?,
            },
        };

        for spec in kind.form_fields() {
            if let Some(max) = spec.max_length
                && fields
                    .get(spec.id)
                    .is_some_and(|v| v.trim().chars().count() > usize::from(max))
            {
                return Err(FormError::TooLong {
                    field: spec.id,
                    max,
                });
            }
        }

        Ok(form)
    }

    /// Channel topic summarising the request.
    pub fn topic(&self, owner: &UserRef) -> String {
        match self {
            Self::Product {
                product_name,
                deadline,
                ..
            } => format!("Product: {product_name} | Deadline: {deadline}"),
            Self::Partnership { .. } => format!("Partnership requested by {}", owner.name),
        }
    }

    /// Label/value pairs shown in welcome and log embeds.
    pub fn details(&self) -> Vec<EmbedField> {
        match self {
            Self::Product {
                product_name,
                description,
                deadline,
            } => vec![
                EmbedField::new("Product", product_name),
                EmbedField::new("Description", description),
                EmbedField::new("Deadline", deadline),
            ],
            Self::Partnership { invite_link } => {
                vec![EmbedField::new("Server link", invite_link)]
            }
        }
    }
}

/// A ticket as created; the channel itself is the only durable trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub kind: TicketKind,
    pub owner: UserRef,
    pub channel: ChannelRef,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Platform requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub category: ChannelId,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionTarget {
    Member(UserId),
    Role(RoleId),
    /// The guild's default role.
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// View and send.
    Allow,
    /// No view.
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub target: PermissionTarget,
    pub access: Access,
}

impl PermissionOverwrite {
    pub fn allow(target: PermissionTarget) -> Self {
        Self {
            target,
            access: Access::Allow,
        }
    }

    pub fn deny(target: PermissionTarget) -> Self {
        Self {
            target,
            access: Access::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

impl EmbedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            color,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn field(mut self, field: EmbedField) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = EmbedField>) -> Self {
        self.fields.extend(fields);
        self
    }

    #[must_use]
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    #[must_use]
    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

impl Button {
    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A message to post in a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub buttons: Vec<Button>,
    pub attachment: Option<Attachment>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.attachment = Some(Attachment {
            filename: filename.into(),
            bytes,
        });
        self
    }
}

/// A message read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub has_attachments: bool,
}

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

/// Identifies one confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptId(pub Uuid);

impl PromptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for PromptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandValue {
    Channel(ChannelId),
    Role(RoleId),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    Button,
    FormSubmit { fields: HashMap<String, String> },
    Command { options: HashMap<String, CommandValue> },
}

/// A platform interaction reduced to what handlers need.
///
/// `id` is the button/form custom id or the slash command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionEvent {
    pub id: String,
    pub kind: InteractionKind,
    pub user: UserRef,
    pub channel: ChannelRef,
    pub can_manage_channels: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOptionKind {
    Category,
    TextChannel,
    Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOption {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: CommandOptionKind,
}

/// An administrator slash command the adapter registers on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub option: Option<CommandOption>,
}

/// How the adapter must acknowledge an interaction before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// The handler's effect is the first response (modals, prompts).
    Immediate,
    /// Acknowledge privately first; the effect is sent as a follow-up.
    Deferred,
}

/// What the adapter should render in response to an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Show the submission form for a ticket kind.
    OpenForm(TicketKind),
    /// Private text reply to the invoker.
    Reply(String),
    /// Rich reply, optionally visible to the whole channel.
    Message {
        message: OutboundMessage,
        ephemeral: bool,
    },
    Ignore,
}

// ---------------------------------------------------------------------------
// Interaction ids
// ---------------------------------------------------------------------------

/// Stable custom ids shared by the dispatch table and platform adapters.
pub mod interaction_id {
    use super::{PromptId, TicketKind};

    pub const OPEN_PREFIX: &str = "ticket:open";
    pub const FORM_PREFIX: &str = "ticket:form";
    pub const CLOSE: &str = "ticket:close";
    pub const CLOSE_CONFIRM_PREFIX: &str = "ticket:close:confirm";
    pub const CLOSE_CANCEL_PREFIX: &str = "ticket:close:cancel";

    pub fn open(kind: TicketKind) -> String {
        format!("{OPEN_PREFIX}:{}", kind.slug())
    }

    pub fn form(kind: TicketKind) -> String {
        format!("{FORM_PREFIX}:{}", kind.slug())
    }

    pub fn confirm_close(prompt: PromptId) -> String {
        format!("{CLOSE_CONFIRM_PREFIX}:{prompt}")
    }

    pub fn cancel_close(prompt: PromptId) -> String {
        format!("{CLOSE_CANCEL_PREFIX}:{prompt}")
    }

    /// Split `prefix:arg` at the last `:` into the route key and its argument.
    pub fn split(id: &str) -> (&str, Option<&str>) {
        match id.rsplit_once(':') {
            Some((key, arg)) if key != "ticket" => (key, Some(arg)),
            _ => (id, None),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor status
// ---------------------------------------------------------------------------

/// Process supervisor state shared with the health server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub ready: bool,
    pub guild_count: usize,
}

impl SupervisorStatus {
    /// Whole seconds since the supervisor started, zero before that.
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> u64 {
        self.start_time
            .map(|start| u64::try_from((now - start).num_seconds()).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Render seconds as `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
pub fn format_uptime(secs: u64) -> String {
    let clock = format!(
        "{}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    );
    match secs / 86_400 {
        0 => clock,
        1 => format!("1 day, {clock}"),
        days => format!("{days} days, {clock}"),
    }
}
