//! The remote session capability consumed by the runtime.
//!
//! Connecting, pairing, encryption and transport live behind this trait.
//! The runtime only registers an event sender, issues requests and reads
//! back results.

use std::path::Path;

use async_trait::async_trait;
use chatmirror_core::Result;
use chatmirror_core::events::{LiveMessage, SessionEvent};
use chatmirror_core::models::{
    ContactInfo, GroupInfo, MediaDownloadInfo, MediaKind, MessageAnchor,
};
use tokio::sync::mpsc;

/// Sender the session pushes its events into.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Handle returned when registering an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// Options for connecting a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Allow interactive pairing when the session is not authenticated yet.
    pub allow_qr: bool,
}

/// Remote locator and key material returned by an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

/// A structured attachment payload ready to be sent.
#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub to: String,
    pub kind: MediaKind,
    pub upload: UploadedMedia,
    pub mime_type: String,
    pub filename: String,
    pub caption: String,
}

#[async_trait]
pub trait Session: Send + Sync {
    fn is_authed(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn connect(&self, opts: ConnectOptions) -> Result<()>;

    /// Register a sender for asynchronous events. Dropping the registration
    /// via [`Session::remove_event_handler`] must drop the sender.
    fn add_event_handler(&self, sender: EventSender) -> HandlerId;

    fn remove_event_handler(&self, id: HandlerId);

    /// Send a plain text message; returns the new message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String>;

    /// Send an uploaded attachment; returns the new message id.
    async fn send_media(&self, media: OutgoingMedia) -> Result<String>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia>;

    /// Download and decrypt an attachment into `target`; returns the number
    /// of bytes written.
    async fn download_media(&self, info: &MediaDownloadInfo, target: &Path) -> Result<u64>;

    /// Decrypt the emoji of an encrypted reaction.
    async fn decrypt_reaction(&self, message: &LiveMessage) -> Result<String>;

    /// Ask the primary device for `count` messages older than `anchor`.
    /// Returns the request id; results arrive as an on-demand history batch.
    async fn request_history(&self, anchor: &MessageAnchor, count: u32) -> Result<String>;

    /// Best display name for a chat, given the sender's push name.
    async fn resolve_chat_name(&self, chat_jid: &str, push_name: &str) -> String;

    async fn get_contact(&self, jid: &str) -> Result<ContactInfo>;

    async fn get_all_contacts(&self) -> Result<Vec<ContactInfo>>;

    async fn get_group_info(&self, jid: &str) -> Result<GroupInfo>;

    async fn get_joined_groups(&self) -> Result<Vec<GroupInfo>>;

    async fn logout(&self) -> Result<()>;
}
