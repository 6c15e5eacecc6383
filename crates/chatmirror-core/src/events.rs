//! Inbound event shapes delivered by the remote session.
//!
//! These mirror what the wire protocol carries closely enough for the
//! canonicalizer to work on, without tying the core to a particular
//! protocol implementation.

use chrono::{DateTime, Utc};

/// Asynchronous events delivered by a connected session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(Box<LiveMessage>),
    HistorySync(HistorySync),
    Connected,
    Disconnected { reason: Option<String> },
}

/// Envelope metadata of a live message.
#[derive(Debug, Clone, Default)]
pub struct MessageInfo {
    pub chat_jid: String,
    pub id: String,
    pub sender_jid: String,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub push_name: String,
}

/// A message delivered in real time.
#[derive(Debug, Clone)]
pub struct LiveMessage {
    pub info: MessageInfo,
    pub content: MessageContent,
}

/// Key identifying a message inside a history batch.
#[derive(Debug, Clone, Default)]
pub struct MessageKey {
    pub remote_jid: String,
    pub id: String,
    pub from_me: bool,
    /// Sender within a group; empty for direct chats.
    pub participant: String,
}

/// One message inside a history batch.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub key: MessageKey,
    pub timestamp: DateTime<Utc>,
    pub push_name: String,
    pub content: Option<MessageContent>,
}

/// Why the remote side produced a history batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySyncType {
    InitialBootstrap,
    Recent,
    Full,
    PushName,
    OnDemand,
    Other,
}

/// Whether more history remains upstream for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfHistory {
    #[default]
    Unspecified,
    CompleteButMoreOnPrimary,
    CompleteAndNoMoreOnPrimary,
    CompleteOnDemandSyncButMoreOnPrimary,
}

/// Messages of one conversation inside a history batch.
#[derive(Debug, Clone)]
pub struct HistoryConversation {
    pub id: String,
    pub name: Option<String>,
    pub messages: Vec<HistoryMessage>,
    pub end_of_history: EndOfHistory,
}

/// A bulk batch of historical conversations.
#[derive(Debug, Clone)]
pub struct HistorySync {
    pub sync_type: HistorySyncType,
    pub conversations: Vec<HistoryConversation>,
}

/// Reply metadata attached to a message body.
#[derive(Debug, Clone, Default)]
pub struct ContextInfo {
    /// Id of the message being replied to.
    pub stanza_id: Option<String>,
    /// Copy of the quoted body, when the sender included one.
    pub quoted: Option<Box<MessageContent>>,
}

/// Media fields common to all attachment bodies.
#[derive(Debug, Clone, Default)]
pub struct MediaFields {
    pub caption: String,
    pub mime_type: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub context: Option<ContextInfo>,
}

/// Body of a message. Exactly one shape per message.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText {
        text: String,
        context: Option<ContextInfo>,
    },
    Image(MediaFields),
    Video {
        media: MediaFields,
        gif_playback: bool,
    },
    Audio(MediaFields),
    Document {
        media: MediaFields,
        file_name: String,
    },
    Sticker(MediaFields),
    Location {
        name: String,
        context: Option<ContextInfo>,
    },
    Contact {
        display_name: String,
        context: Option<ContextInfo>,
    },
    ContactsArray {
        display_name: String,
        context: Option<ContextInfo>,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    /// Reaction whose emoji has to be decrypted through the session.
    EncryptedReaction {
        target_id: String,
        payload: Vec<u8>,
        iv: Vec<u8>,
    },
    Unsupported,
}

impl MessageContent {
    /// Reply metadata carried by this body, if any.
    pub fn context(&self) -> Option<&ContextInfo> {
        match self {
            MessageContent::ExtendedText { context, .. }
            | MessageContent::Location { context, .. }
            | MessageContent::Contact { context, .. }
            | MessageContent::ContactsArray { context, .. } => context.as_ref(),
            MessageContent::Image(media)
            | MessageContent::Audio(media)
            | MessageContent::Sticker(media)
            | MessageContent::Video { media, .. }
            | MessageContent::Document { media, .. } => media.context.as_ref(),
            MessageContent::Conversation(_)
            | MessageContent::Reaction { .. }
            | MessageContent::EncryptedReaction { .. }
            | MessageContent::Unsupported => None,
        }
    }
}
