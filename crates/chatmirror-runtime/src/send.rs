//! Outbound sends through a live session, echoed into the store.
//!
//! Shared by the IPC gateway and by callers that own their session.

use std::path::Path;
use std::sync::Arc;

use chatmirror_core::models::{MediaDescriptor, MediaKind, MessageUpsert};
use chatmirror_core::{Error, Result, Store, jid};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ingest::SELF_SENDER_NAME;
use crate::session::{OutgoingMedia, Session};

const OCTET_STREAM: &str = "application/octet-stream";
const SNIFF_LEN: usize = 512;

/// One send request, as carried over the gateway socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// `"text"` (default) or `"file"`.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caption: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime: String,
}

impl SendRequest {
    pub fn text(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn file(to: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            kind: "file".to_string(),
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case("file")
    }
}

/// Details of a sent attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentFile {
    pub name: String,
    pub mime_type: String,
    pub media: String,
}

/// Outcome of a send request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<SentFile>,
}

impl SendResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn sent(id: String, to: String, file: Option<SentFile>) -> Self {
        Self {
            success: true,
            id: Some(id),
            to: Some(to),
            error: None,
            file,
        }
    }
}

#[derive(Clone)]
pub struct SendService {
    store: Store,
    session: Arc<dyn Session>,
}

impl SendService {
    pub fn new(store: Store, session: Arc<dyn Session>) -> Self {
        Self { store, session }
    }

    /// Run a request and report the outcome on the wire shape. Each request
    /// is attempted once.
    pub async fn handle(&self, req: SendRequest) -> SendResponse {
        match self.execute(req).await {
            Ok(resp) => resp,
            Err(e) => SendResponse::failure(wire_error(&e)),
        }
    }

    pub async fn execute(&self, req: SendRequest) -> Result<SendResponse> {
        if req.to.trim().is_empty() {
            return Err(Error::InvalidRequest("to is required".to_string()));
        }
        let to = jid::parse_recipient(&req.to)
            .map_err(|e| Error::InvalidRequest(format!("invalid recipient: {}", wire_error(&e))))?;

        if req.is_file() {
            self.send_file(&to, &req).await
        } else {
            if req.message.is_empty() {
                return Err(Error::InvalidRequest(
                    "to and message are required".to_string(),
                ));
            }
            self.send_text(&to, &req.message).await
        }
    }

    /// Send a text message to an already-parsed recipient.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<SendResponse> {
        let id = self
            .session
            .send_text(to, text)
            .await
            .map_err(|e| Error::Session(format!("send failed: {}", wire_error(&e))))?;

        let echo = MessageUpsert {
            text: text.to_string(),
            display_text: text.trim().to_string(),
            ..self.echo(to, &id).await
        };
        self.record(echo).await;

        Ok(SendResponse::sent(id, to.to_string(), None))
    }

    async fn send_file(&self, to: &str, req: &SendRequest) -> Result<SendResponse> {
        if req.file_path.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "file_path is required for file sends".to_string(),
            ));
        }
        let path = Path::new(&req.file_path);
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::InvalidRequest(format!("read file: {e}")))?;

        let name = match req.filename.trim() {
            "" => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| req.file_path.clone()),
            name => name.to_string(),
        };
        let mime_type = resolve_mime(path, req.mime.trim(), &data);
        let kind = MediaKind::from_mime(&mime_type);
        let caption = req.caption.clone();

        let upload = self
            .session
            .upload(data, kind)
            .await
            .map_err(|e| Error::Session(format!("upload failed: {}", wire_error(&e))))?;

        let outgoing = OutgoingMedia {
            to: to.to_string(),
            kind,
            upload: upload.clone(),
            mime_type: mime_type.clone(),
            filename: name.clone(),
            caption: if kind == MediaKind::Audio {
                String::new()
            } else {
                caption.clone()
            },
        };
        let id = self
            .session
            .send_media(outgoing)
            .await
            .map_err(|e| Error::Session(format!("send failed: {}", wire_error(&e))))?;

        let media = MediaDescriptor {
            kind,
            caption: Some(caption.clone()).filter(|c| !c.trim().is_empty()),
            filename: Some(name.clone()),
            mime_type: Some(mime_type.clone()),
            direct_path: Some(upload.direct_path).filter(|p| !p.is_empty()),
            media_key: upload.media_key,
            file_sha256: upload.file_sha256,
            file_enc_sha256: upload.file_enc_sha256,
            file_length: upload.file_length,
        };
        let display_text = match caption.trim() {
            "" => kind.label().to_string(),
            text => text.to_string(),
        };
        let echo = MessageUpsert {
            text: caption,
            display_text,
            media: Some(media),
            ..self.echo(to, &id).await
        };
        self.record(echo).await;

        Ok(SendResponse::sent(
            id,
            to.to_string(),
            Some(SentFile {
                name,
                mime_type,
                media: kind.as_str().to_string(),
            }),
        ))
    }

    async fn echo(&self, to: &str, id: &str) -> MessageUpsert {
        MessageUpsert {
            chat_jid: to.to_string(),
            chat_name: self.session.resolve_chat_name(to, "").await,
            msg_id: id.to_string(),
            sender_name: SELF_SENDER_NAME.to_string(),
            timestamp: Utc::now(),
            from_me: true,
            ..MessageUpsert::default()
        }
    }

    /// Write a sent message back into the store. The send already happened,
    /// so failures are only logged.
    async fn record(&self, msg: MessageUpsert) {
        let kind = jid::chat_kind(&msg.chat_jid);
        if let Err(e) = self
            .store
            .upsert_chat(&msg.chat_jid, kind, &msg.chat_name, msg.timestamp)
            .await
        {
            tracing::warn!(chat = %msg.chat_jid, "Failed to record chat for sent message: {e}");
        }
        if let Err(e) = self.store.upsert_message(&msg).await {
            tracing::warn!(chat = %msg.chat_jid, id = %msg.msg_id, "Failed to record sent message: {e}");
        }
    }
}

/// Message text for the wire, without the error-kind prefix.
pub fn wire_error(err: &Error) -> String {
    match err {
        Error::InvalidRequest(msg) | Error::Session(msg) | Error::Other(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// MIME type of an outgoing file: explicit override, then the extension,
/// then the leading bytes.
pub fn resolve_mime(path: &Path, explicit: &str, data: &[u8]) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    if let Some(guess) = mime_guess::from_path(path).first() {
        return guess.essence_str().to_string();
    }
    sniff_mime(&data[..data.len().min(SNIFF_LEN)]).to_string()
}

/// Content sniffing over magic numbers, falling back to plain text for
/// valid UTF-8 without control bytes.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"\x89PNG\r\n\x1A\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"OggS", "audio/ogg"),
        (b"ID3", "audio/mpeg"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1A\x45\xDF\xA3", "video/webm"),
    ];

    if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return mime;
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        match &data[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wav",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if !data.is_empty()
        && std::str::from_utf8(data).is_ok()
        && !data
            .iter()
            .any(|b| b.is_ascii_control() && !b.is_ascii_whitespace())
    {
        return "text/plain; charset=utf-8";
    }
    OCTET_STREAM
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
