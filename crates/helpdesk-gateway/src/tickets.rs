//! Ticket creation and closure.
//!
//! A ticket is nothing more than a private channel: creation claims a number,
//! creates the channel with its permission overwrites and posts a welcome
//! message; closure archives the channel history to a transcript file and
//! deletes the channel after a grace delay.

use chrono::Utc;
use helpdesk_core::{
    Button, ButtonStyle, ChannelId, ChannelRef, Embed, EmbedField, NewChannel, OutboundMessage,
    PermissionOverwrite, PermissionTarget, Platform, Ticket, TicketError, TicketForm, TicketKind,
    UserRef, interaction_id,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config_store::ConfigStore;
use crate::transcript::{self, TranscriptStore};

const COLOR_OPEN: u32 = 0x58_65F2;
const COLOR_LOG: u32 = 0x34_98DB;
const COLOR_CLOSED: u32 = 0xE7_4C3C;
const FOOTER: &str = "Helpdesk tickets";

/// Where a closed ticket's transcript went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TranscriptRef {
    pub channel: ChannelRef,
    pub path: PathBuf,
    /// Number of messages captured.
    pub lines: usize,
}

#[derive(Debug)]
pub(crate) struct TicketManager {
    config: Arc<ConfigStore>,
    transcripts: TranscriptStore,
    history_limit: usize,
    close_grace: Duration,
    closing: Mutex<HashSet<ChannelId>>,
}

impl TicketManager {
    pub(crate) fn new(
        config: Arc<ConfigStore>,
        transcripts: TranscriptStore,
        history_limit: usize,
        close_grace: Duration,
    ) -> Self {
        Self {
            config,
            transcripts,
            history_limit,
            close_grace,
            closing: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub(crate) async fn submit_product_request(
        &self,
        platform: &dyn Platform,
        user: &UserRef,
        product_name: impl Into<String>,
        description: impl Into<String>,
        deadline: impl Into<String>,
    ) -> Result<Ticket, TicketError> {
        let form = TicketForm::Product {
            product_name: product_name.into(),
            description: description.into(),
            deadline: deadline.into(),
        };
        self.submit(platform, user, form).await
    }

    pub(crate) async fn submit_partnership_request(
        &self,
        platform: &dyn Platform,
        user: &UserRef,
        invite_link: impl Into<String>,
    ) -> Result<Ticket, TicketError> {
        let form = TicketForm::Partnership {
            invite_link: invite_link.into(),
        };
        self.submit(platform, user, form).await
    }

    /// Open a ticket channel for `user`.
    ///
    /// Fails without side effects when the kind's category is unset or gone.
    /// Once the channel exists, permission and welcome failures are logged
    /// and the ticket is still returned.
    pub(crate) async fn submit(
        &self,
        platform: &dyn Platform,
        user: &UserRef,
        form: TicketForm,
    ) -> Result<Ticket, TicketError> {
        let kind = form.kind();
        let span = info_span!("ticket_create", kind = %kind, user = %user.name);
        self.submit_inner(platform, user, form)
            .instrument(span)
            .await
            .inspect_err(|error| {
                warn!(kind = %kind, user = %user.name, error = %error, "ticket creation failed");
            })
    }

    async fn submit_inner(
        &self,
        platform: &dyn Platform,
        user: &UserRef,
        form: TicketForm,
    ) -> Result<Ticket, TicketError> {
        let kind = form.kind();
        let config = self.config.snapshot();

        let category = config
            .category_for(kind)
            .ok_or(TicketError::CategoryNotConfigured(kind))?;
        if !platform.category_exists(category).await? {
            debug!(category = %category, "configured category no longer exists");
            return Err(TicketError::CategoryNotConfigured(kind));
        }

        let number = self.config.next_ticket_number();
        let channel = platform
            .create_channel(NewChannel {
                name: channel_name(kind, &user.name, number),
                category,
                topic: Some(form.topic(user)),
            })
            .await?;

        let mut overwrites = vec![
            PermissionOverwrite::deny(PermissionTarget::Everyone),
            PermissionOverwrite::allow(PermissionTarget::Member(user.id)),
        ];
        if let Some(role) = config.staff_role_id {
            overwrites.push(PermissionOverwrite::allow(PermissionTarget::Role(role)));
        }
        for overwrite in overwrites {
            if let Err(error) = platform.set_permission(channel.id, overwrite).await {
                warn!(
                    step = "permissions",
                    channel = %channel.name,
                    target = ?overwrite.target,
                    error = %error,
                    "ticket created with incomplete permissions"
                );
            }
        }

        let ticket = Ticket {
            id: number,
            kind,
            owner: user.clone(),
            channel,
            created_at: Utc::now(),
        };

        let staff_mention = config.staff_role_id.map(|role| format!("<@&{role}>"));
        if let Err(error) = platform
            .send(ticket.channel.id, welcome_message(&ticket, &form, staff_mention))
            .await
        {
            warn!(
                step = "welcome",
                channel = %ticket.channel.name,
                error = %error,
                "ticket created without welcome message"
            );
        }

        if let Some(log_channel) = config.log_channel_id
            && let Err(error) = platform
                .send(log_channel, OutboundMessage::embed(creation_log(&ticket, &form)))
                .await
        {
            warn!(
                step = "log",
                channel = %ticket.channel.name,
                error = %error,
                "failed to log ticket creation"
            );
        }

        info!(
            ticket = ticket.id,
            channel = %ticket.channel.name,
            "ticket created"
        );
        Ok(ticket)
    }

    /// Archive and delete a ticket channel. The caller has already confirmed.
    pub(crate) async fn close_ticket(
        &self,
        platform: &dyn Platform,
        channel: &ChannelRef,
        closed_by: &UserRef,
    ) -> Result<TranscriptRef, TicketError> {
        let span = info_span!(
            "ticket_close",
            channel = %channel.name,
            closed_by = %closed_by.name,
        );
        self.close_inner(platform, channel, closed_by)
            .instrument(span)
            .await
    }

    async fn close_inner(
        &self,
        platform: &dyn Platform,
        channel: &ChannelRef,
        closed_by: &UserRef,
    ) -> Result<TranscriptRef, TicketError> {
        let _guard = ClosingGuard::acquire(&self.closing, channel.id)?;

        let history = platform
            .fetch_history(channel.id, self.history_limit)
            .await?;
        let text = transcript::render(&channel.name, &closed_by.name, Utc::now(), &history);
        let path = self
            .transcripts
            .write(channel.id, &text)
            .await
            .map_err(TicketError::Transcript)?;
        debug!(path = %path.display(), messages = history.len(), "transcript written");

        if let Some(log_channel) = self.config.snapshot().log_channel_id {
            let message = OutboundMessage::embed(closure_log(channel, closed_by, history.len()))
                .with_attachment(transcript::file_name(channel.id), text.into_bytes());
            if let Err(error) = platform.send(log_channel, message).await {
                warn!(step = "log", error = %error, "failed to upload transcript to log channel");
            }
        }

        platform
            .send(
                channel.id,
                OutboundMessage::embed(closing_notice(closed_by, self.close_grace)),
            )
            .await?;

        tokio::time::sleep(self.close_grace).await;

        if let Err(error) = platform.delete_channel(channel.id).await {
            warn!(step = "delete", error = %error, "failed to delete closed ticket channel");
        } else {
            info!(messages = history.len(), "ticket closed");
        }

        Ok(TranscriptRef {
            channel: channel.clone(),
            path,
            lines: history.len(),
        })
    }
}

/// Marks a channel as closing for as long as it is held.
struct ClosingGuard<'a> {
    closing: &'a Mutex<HashSet<ChannelId>>,
    channel: ChannelId,
}

impl<'a> ClosingGuard<'a> {
    fn acquire(
        closing: &'a Mutex<HashSet<ChannelId>>,
        channel: ChannelId,
    ) -> Result<Self, TicketError> {
        let inserted = closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel);
        if !inserted {
            return Err(TicketError::AlreadyClosing(channel));
        }
        Ok(Self { closing, channel })
    }
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.channel);
    }
}

/// `<kind>-<handle>-<n>` with the handle reduced to `[a-z0-9_-]`.
pub(crate) fn channel_name(kind: TicketKind, handle: &str, number: u64) -> String {
    let handle: String = handle
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{handle}-{number}", kind.slug())
}

fn welcome_message(
    ticket: &Ticket,
    form: &TicketForm,
    staff_mention: Option<String>,
) -> OutboundMessage {
    let embed = Embed::new(
        format!("🎫 {} ticket #{}", ticket.kind.label(), ticket.id),
        format!(
            "Hello {}! Your request has been received and the team will reply here soon.",
            ticket.owner.mention()
        ),
        COLOR_OPEN,
    )
    .fields(form.details())
    .footer(FOOTER)
    .timestamp(ticket.created_at);

    let mut message = OutboundMessage::embed(embed).with_button(Button::new(
        interaction_id::CLOSE,
        "🔒 Close ticket",
        ButtonStyle::Danger,
    ));
    let mut mentions = vec![ticket.owner.mention()];
    mentions.extend(staff_mention);
    message.content = Some(mentions.join(" "));
    message
}

fn creation_log(ticket: &Ticket, form: &TicketForm) -> Embed {
    Embed::new(
        format!("📥 New {} ticket", ticket.kind.slug()),
        format!(
            "{} opened {}",
            ticket.owner.mention(),
            ticket.channel.mention()
        ),
        COLOR_LOG,
    )
    .field(EmbedField::new("Ticket", format!("#{}", ticket.id)))
    .fields(form.details())
    .timestamp(ticket.created_at)
}

fn closure_log(channel: &ChannelRef, closed_by: &UserRef, messages: usize) -> Embed {
    Embed::new(
        "📄 Ticket transcript",
        format!("#{} was closed by {}", channel.name, closed_by.mention()),
        COLOR_LOG,
    )
    .field(EmbedField::new("Messages", messages.to_string()))
    .timestamp(Utc::now())
}

fn closing_notice(closed_by: &UserRef, grace: Duration) -> Embed {
    Embed::new(
        "🔒 Ticket closed",
        format!(
            "Closed by {}. This channel will be deleted in {} seconds.",
            closed_by.mention(),
            grace.as_secs()
        ),
        COLOR_CLOSED,
    )
    .footer(FOOTER)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests;
