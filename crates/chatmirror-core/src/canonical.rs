//! Canonicalization of inbound events into one normalized message shape,
//! plus derivation of the human-readable display text.

use chrono::{DateTime, Utc};

use crate::events::{ContextInfo, HistoryMessage, LiveMessage, MediaFields, MessageContent};
use crate::models::{MediaDescriptor, MediaKind};

/// Fallback used when a reaction or reply target cannot be resolved.
pub const UNRESOLVED_TARGET: &str = "message";

/// Fallback body of a reply that has no text of its own.
pub const EMPTY_REPLY_BODY: &str = "(message)";

/// One inbound message, independent of how it was delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub chat_jid: String,
    pub id: String,
    pub sender_jid: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub push_name: String,
    pub text: String,
    pub media: Option<MediaDescriptor>,
    /// Label for non-media bodies without text (location, contact cards).
    pub body_label: Option<&'static str>,
    pub reply_to_id: Option<String>,
    pub reply_to_display: Option<String>,
    pub reaction_to_id: Option<String>,
    pub reaction_emoji: Option<String>,
    /// Set when the reaction emoji still has to be decrypted.
    pub reaction_encrypted: bool,
}

impl NormalizedMessage {
    pub fn is_reaction(&self) -> bool {
        self.reaction_to_id.is_some() || self.reaction_emoji.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to_id.is_some() || self.reply_to_display.is_some()
    }

    /// Trimmed text, else the media label, else the body label.
    pub fn base_text(&self) -> String {
        let text = self.text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        if let Some(media) = &self.media {
            return media.kind.label().to_string();
        }
        self.body_label.unwrap_or_default().to_string()
    }
}

/// Normalize a message delivered in real time.
pub fn canonicalize_live(event: &LiveMessage) -> NormalizedMessage {
    let mut msg = NormalizedMessage {
        chat_jid: event.info.chat_jid.clone(),
        id: event.info.id.clone(),
        sender_jid: event.info.sender_jid.trim().to_string(),
        timestamp: event.info.timestamp,
        from_me: event.info.from_me,
        push_name: event.info.push_name.clone(),
        ..NormalizedMessage::default()
    };
    apply_content(&event.content, &mut msg);
    msg
}

/// Normalize one message of a history batch. The sender is the group
/// participant when present, else the remote chat itself.
pub fn canonicalize_history(chat_jid: &str, hist: &HistoryMessage) -> NormalizedMessage {
    let participant = hist.key.participant.trim();
    let sender = if participant.is_empty() {
        hist.key.remote_jid.trim()
    } else {
        participant
    };

    let mut msg = NormalizedMessage {
        chat_jid: chat_jid.trim().to_string(),
        id: hist.key.id.clone(),
        sender_jid: sender.to_string(),
        timestamp: hist.timestamp,
        from_me: hist.key.from_me,
        push_name: hist.push_name.clone(),
        ..NormalizedMessage::default()
    };
    if let Some(content) = &hist.content {
        apply_content(content, &mut msg);
    }
    msg
}

fn apply_content(content: &MessageContent, msg: &mut NormalizedMessage) {
    match content {
        MessageContent::Conversation(text) => msg.text.clone_from(text),
        MessageContent::ExtendedText { text, .. } => msg.text.clone_from(text),
        MessageContent::Image(media) => set_media(msg, MediaKind::Image, media, None),
        MessageContent::Video {
            media,
            gif_playback,
        } => {
            let kind = if *gif_playback {
                MediaKind::Gif
            } else {
                MediaKind::Video
            };
            set_media(msg, kind, media, None);
        }
        MessageContent::Audio(media) => set_media(msg, MediaKind::Audio, media, None),
        MessageContent::Document { media, file_name } => {
            set_media(msg, MediaKind::Document, media, Some(file_name));
        }
        MessageContent::Sticker(media) => set_media(msg, MediaKind::Sticker, media, None),
        MessageContent::Location { .. } => msg.body_label = Some("Sent location"),
        MessageContent::Contact { .. } => msg.body_label = Some("Sent contact"),
        MessageContent::ContactsArray { .. } => msg.body_label = Some("Sent contacts"),
        MessageContent::Reaction { target_id, emoji } => {
            msg.reaction_to_id = non_empty(target_id);
            msg.reaction_emoji = non_empty(emoji);
        }
        MessageContent::EncryptedReaction { target_id, .. } => {
            msg.reaction_to_id = non_empty(target_id);
            msg.reaction_encrypted = true;
        }
        MessageContent::Unsupported => {}
    }

    if let Some(context) = content.context() {
        apply_context(context, msg);
    }
}

fn set_media(
    msg: &mut NormalizedMessage,
    kind: MediaKind,
    fields: &MediaFields,
    file_name: Option<&String>,
) {
    if msg.text.is_empty() {
        msg.text.clone_from(&fields.caption);
    }
    // Byte fields are copied so the record owns its key material.
    msg.media = Some(MediaDescriptor {
        kind,
        caption: non_empty(&fields.caption),
        filename: file_name.and_then(|name| non_empty(name)),
        mime_type: non_empty(&fields.mime_type),
        direct_path: non_empty(&fields.direct_path),
        media_key: fields.media_key.to_vec(),
        file_sha256: fields.file_sha256.to_vec(),
        file_enc_sha256: fields.file_enc_sha256.to_vec(),
        file_length: fields.file_length,
    });
}

fn apply_context(context: &ContextInfo, msg: &mut NormalizedMessage) {
    msg.reply_to_id = context.stanza_id.as_deref().and_then(non_empty);
    msg.reply_to_display = context
        .quoted
        .as_deref()
        .map(quoted_display_text)
        .and_then(|text| non_empty(&text));
}

/// Display text for a quoted body. Media gets a canned label per kind,
/// caption or not. Text bodies quote their trimmed text, anything else
/// quotes as empty.
pub fn quoted_display_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Image(_) => MediaKind::Image.label().to_string(),
        MessageContent::Video {
            gif_playback: true,
            ..
        } => MediaKind::Gif.label().to_string(),
        MessageContent::Video { .. } => MediaKind::Video.label().to_string(),
        MessageContent::Audio(_) => MediaKind::Audio.label().to_string(),
        MessageContent::Document { .. } => MediaKind::Document.label().to_string(),
        MessageContent::Sticker(_) => MediaKind::Sticker.label().to_string(),
        MessageContent::Location { .. } => "Sent location".to_string(),
        MessageContent::Contact { .. } => "Sent contact".to_string(),
        MessageContent::ContactsArray { .. } => "Sent contacts".to_string(),
        MessageContent::Conversation(text) | MessageContent::ExtendedText { text, .. } => {
            text.trim().to_string()
        }
        MessageContent::Reaction { .. }
        | MessageContent::EncryptedReaction { .. }
        | MessageContent::Unsupported => String::new(),
    }
}

/// Compose the stored display text. `target` is the resolved display text
/// of the reacted-to or replied-to message, if any could be found.
pub fn compose_display_text(msg: &NormalizedMessage, target: Option<&str>) -> String {
    let target = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNRESOLVED_TARGET);

    if msg.is_reaction() {
        return match msg.reaction_emoji.as_deref().map(str::trim) {
            Some(emoji) if !emoji.is_empty() => format!("Reacted {emoji} to {target}"),
            _ => format!("Reacted to {target}"),
        };
    }

    let base = msg.base_text();
    if msg.is_reply() {
        let body = if base.is_empty() {
            EMPTY_REPLY_BODY
        } else {
            base.as_str()
        };
        return format!("> {target}\n{body}");
    }

    base
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[path = "canonical_tests.rs"]
mod tests;
