use chrono::{DateTime, Utc};
use helpdesk_core::{ChannelId, HistoryMessage};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Render channel history as a plain-text transcript, oldest message first.
pub(crate) fn render(
    channel_name: &str,
    closed_by: &str,
    closed_at: DateTime<Utc>,
    messages: &[HistoryMessage],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Transcript of #{channel_name}");
    let _ = writeln!(out, "Closed by: {closed_by}");
    let _ = writeln!(out, "Date: {}", closed_at.format("%Y-%m-%d %H:%M UTC"));
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    for message in messages {
        out.push_str(&render_line(message));
        out.push('\n');
    }
    out
}

fn render_line(message: &HistoryMessage) -> String {
    let content = if message.content.is_empty() {
        "(no text)"
    } else {
        message.content.as_str()
    };
    let mut line = format!(
        "[{}] {}: {content}",
        message.timestamp.format("%H:%M"),
        message.author
    );
    if message.has_attachments {
        line.push_str(" [file]");
    }
    line
}

pub(crate) fn file_name(channel: ChannelId) -> String {
    format!("transcript-{channel}.txt")
}

/// Directory of transcript files keyed by channel id.
#[derive(Debug, Clone)]
pub(crate) struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write (or overwrite) the transcript for `channel`.
    pub(crate) async fn write(&self, channel: ChannelId, text: &str) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(channel));
        tokio::fs::write(&path, text).await?;
        Ok(path)
    }
}
