//! Domain models for mirrored chats, contacts, groups and messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of conversation, derived from the chat identifier's server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChatKind {
    #[serde(rename = "dm")]
    Direct,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Direct => "dm",
            ChatKind::Group => "group",
            ChatKind::Broadcast => "broadcast",
            ChatKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ChatKind {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "dm" | "direct" => ChatKind::Direct,
            "group" => ChatKind::Group,
            "broadcast" => ChatKind::Broadcast,
            _ => ChatKind::Unknown,
        }
    }
}

/// Participant role within a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[default]
    Member,
    Admin,
    Superadmin,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Member => "member",
            ParticipantRole::Admin => "admin",
            ParticipantRole::Superadmin => "superadmin",
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ParticipantRole {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "superadmin" => ParticipantRole::Superadmin,
            "admin" => ParticipantRole::Admin,
            _ => ParticipantRole::Member,
        }
    }
}

/// Downloadable media kinds. Stored as the lowercase name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    /// Looping video.
    Gif,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "gif" => Some(MediaKind::Gif),
            "audio" => Some(MediaKind::Audio),
            "document" => Some(MediaKind::Document),
            "sticker" => Some(MediaKind::Sticker),
            _ => None,
        }
    }

    /// Canned display label used when a message has no text of its own.
    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Image => "Sent image",
            MediaKind::Video => "Sent video",
            MediaKind::Gif => "Sent gif",
            MediaKind::Audio => "Sent audio",
            MediaKind::Document => "Sent document",
            MediaKind::Sticker => "Sent sticker",
        }
    }

    /// Fallback file extension when neither filename nor MIME type help.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video | MediaKind::Gif => "mp4",
            MediaKind::Audio => "ogg",
            MediaKind::Document => "bin",
            MediaKind::Sticker => "webp",
        }
    }

    /// Classify an outgoing file by MIME type.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media attached to a message, including the material needed to fetch
/// and decrypt it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub caption: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub direct_path: Option<String>,
    #[serde(default, skip_serializing)]
    pub media_key: Vec<u8>,
    #[serde(default, skip_serializing)]
    pub file_sha256: Vec<u8>,
    #[serde(default, skip_serializing)]
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

impl MediaDescriptor {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            caption: None,
            filename: None,
            mime_type: None,
            direct_path: None,
            media_key: Vec::new(),
            file_sha256: Vec::new(),
            file_enc_sha256: Vec::new(),
            file_length: 0,
        }
    }
}

/// A conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub jid: String,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A contact with the names the remote service knows for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub jid: String,
    pub phone: Option<String>,
    pub push_name: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub business_name: Option<String>,
    pub alias: Option<String>,
    pub tags: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Preferred display name: alias, full name, push name, business name,
    /// first name, in that order.
    pub fn display_name(&self) -> Option<&str> {
        [
            &self.alias,
            &self.full_name,
            &self.push_name,
            &self.business_name,
            &self.first_name,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .map(str::trim)
        .find(|v| !v.is_empty())
    }
}

/// Contact fields as reported by the remote service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub jid: String,
    pub found: bool,
    pub phone: String,
    pub push_name: String,
    pub full_name: String,
    pub first_name: String,
    pub business_name: String,
}

impl ContactInfo {
    /// Best human name for a sender. Placeholder push names ("-") are ignored.
    pub fn best_name(&self) -> Option<String> {
        if !self.found {
            return None;
        }
        [
            self.full_name.trim(),
            self.first_name.trim(),
            self.business_name.trim(),
        ]
        .into_iter()
        .find(|v| !v.is_empty())
        .or_else(|| {
            let push = self.push_name.trim();
            (!push.is_empty() && push != "-").then_some(push)
        })
        .map(ToOwned::to_owned)
    }
}

/// A group conversation's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub jid: String,
    pub name: Option<String>,
    pub owner_jid: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Group metadata as reported by the remote service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    pub jid: String,
    pub name: String,
    pub owner_jid: String,
    pub created_at: Option<DateTime<Utc>>,
    pub participants: Vec<GroupParticipant>,
}

/// Membership of one user in one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupParticipant {
    pub user_jid: String,
    pub role: ParticipantRole,
}

/// A stored message, as returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub chat_jid: String,
    pub chat_name: Option<String>,
    pub msg_id: String,
    pub sender_jid: Option<String>,
    pub sender_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub text: Option<String>,
    pub display_text: Option<String>,
    pub media_type: Option<String>,
    pub media_caption: Option<String>,
    pub filename: Option<String>,
    pub local_path: Option<String>,
    pub reaction_to_id: Option<String>,
    pub reaction_emoji: Option<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_display: Option<String>,
    /// Highlighted excerpt, only set for full-text search hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Message {
    /// Text for presentation: display text, raw text, then media label.
    pub fn render_text(&self) -> String {
        if let Some(display) = non_empty(self.display_text.as_deref()) {
            return display.to_string();
        }
        if let Some(text) = non_empty(self.text.as_deref()) {
            return text.to_string();
        }
        self.media_type
            .as_deref()
            .and_then(MediaKind::parse)
            .map(|kind| kind.label().to_string())
            .unwrap_or_default()
    }
}

/// Parameters for writing one message. Empty strings and empty byte
/// vectors mean "not observed" and never clobber stored values on the
/// fields that keep existing data.
#[derive(Debug, Clone, Default)]
pub struct MessageUpsert {
    pub chat_jid: String,
    pub chat_name: String,
    pub msg_id: String,
    pub sender_jid: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub text: String,
    pub display_text: String,
    pub media: Option<MediaDescriptor>,
    pub reaction_to_id: String,
    pub reaction_emoji: String,
    pub reply_to_id: String,
    pub reply_to_display: String,
}

/// Media state of one message, used by the download workers.
#[derive(Debug, Clone)]
pub struct MediaDownloadInfo {
    pub chat_jid: String,
    pub chat_name: Option<String>,
    pub msg_id: String,
    pub media: Option<MediaDescriptor>,
    pub local_path: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl MediaDownloadInfo {
    /// True when the message carries media that can be fetched and has
    /// not been saved yet.
    pub fn needs_download(&self) -> bool {
        let Some(media) = &self.media else {
            return false;
        };
        let has_locator = media
            .direct_path
            .as_deref()
            .is_some_and(|path| !path.trim().is_empty());
        has_locator && !media.media_key.is_empty() && self.downloaded_at.is_none()
    }
}

/// The oldest stored message of a chat, used as the anchor for
/// on-demand history requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAnchor {
    pub chat_jid: String,
    pub msg_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub sender_jid: Option<String>,
}

/// Row counts across the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub chats: i64,
    pub messages: i64,
    pub contacts: i64,
    pub groups: i64,
    pub media_downloaded: i64,
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
