//! Scripted in-memory session shared by the runtime integration tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatmirror_core::events::{
    EndOfHistory, HistoryConversation, HistoryMessage, HistorySync, HistorySyncType, LiveMessage,
    MessageContent, MessageInfo, MessageKey, SessionEvent,
};
use chatmirror_core::models::{
    ContactInfo, GroupInfo, MediaDownloadInfo, MediaKind, MessageAnchor,
};
use chatmirror_core::{Error, Result};
use chatmirror_runtime::session::{
    ConnectOptions, EventSender, HandlerId, OutgoingMedia, Session, UploadedMedia,
};
use chrono::{DateTime, Utc};

pub const ALICE: &str = "15550001@s.whatsapp.net";

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

pub fn live(chat: &str, id: &str, secs: i64, content: MessageContent) -> SessionEvent {
    SessionEvent::Message(Box::new(LiveMessage {
        info: MessageInfo {
            chat_jid: chat.to_string(),
            id: id.to_string(),
            sender_jid: chat.to_string(),
            timestamp: ts(secs),
            from_me: false,
            push_name: "Alice".to_string(),
        },
        content,
    }))
}

pub fn history_message(chat: &str, id: &str, secs: i64, text: &str) -> HistoryMessage {
    HistoryMessage {
        key: MessageKey {
            remote_jid: chat.to_string(),
            id: id.to_string(),
            from_me: false,
            participant: String::new(),
        },
        timestamp: ts(secs),
        push_name: "Alice".to_string(),
        content: Some(MessageContent::Conversation(text.to_string())),
    }
}

pub fn history(
    sync_type: HistorySyncType,
    chat: &str,
    messages: Vec<HistoryMessage>,
    end_of_history: EndOfHistory,
) -> HistorySync {
    HistorySync {
        sync_type,
        conversations: vec![HistoryConversation {
            id: chat.to_string(),
            name: None,
            messages,
            end_of_history,
        }],
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
pub struct FakeSession {
    unauthenticated: AtomicBool,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    hanging_connects: AtomicBool,
    download_delay: Mutex<Duration>,
    downloads_started: AtomicUsize,
    send_delay: Mutex<Duration>,
    sends_started: AtomicUsize,
    next_handler: AtomicU64,
    handlers: Mutex<HashMap<u64, EventSender>>,
    on_connect: Mutex<Vec<SessionEvent>>,
    history_responses: Mutex<VecDeque<HistorySync>>,
    history_requests: Mutex<Vec<(MessageAnchor, u32)>>,
    sent: Mutex<Vec<(String, String)>>,
    contacts: Mutex<HashMap<String, ContactInfo>>,
    media_bytes: Vec<u8>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            media_bytes: b"\xFF\xD8\xFFfake-jpeg".to_vec(),
            ..Self::default()
        }
    }

    pub fn unauthenticated() -> Self {
        let session = Self::new();
        session.unauthenticated.store(true, Ordering::SeqCst);
        session
    }

    /// Events delivered right after the first successful connect.
    pub fn on_connect(&self, events: Vec<SessionEvent>) {
        self.on_connect.lock().expect("lock").extend(events);
    }

    /// Next response to a history request.
    pub fn respond_to_history(&self, batch: HistorySync) {
        self.history_responses.lock().expect("lock").push_back(batch);
    }

    pub fn add_contact(&self, info: ContactInfo) {
        self.contacts
            .lock()
            .expect("lock")
            .insert(info.jid.clone(), info);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make every later connect attempt wait forever.
    pub fn hang_connects(&self) {
        self.hanging_connects.store(true, Ordering::SeqCst);
    }

    pub fn slow_downloads(&self, delay: Duration) {
        *self.download_delay.lock().expect("lock") = delay;
    }

    pub fn slow_sends(&self, delay: Duration) {
        *self.send_delay.lock().expect("lock") = delay;
    }

    pub fn downloads_started(&self) -> usize {
        self.downloads_started.load(Ordering::SeqCst)
    }

    pub fn sends_started(&self) -> usize {
        self.sends_started.load(Ordering::SeqCst)
    }

    /// Drop the connection and report it to every handler.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(&SessionEvent::Disconnected {
            reason: Some("stream closed".to_string()),
        });
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().expect("lock").len()
    }

    pub fn history_requests(&self) -> Vec<(MessageAnchor, u32)> {
        self.history_requests.lock().expect("lock").clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn media_bytes(&self) -> &[u8] {
        &self.media_bytes
    }

    fn emit(&self, event: &SessionEvent) {
        let handlers: Vec<EventSender> = self
            .handlers
            .lock()
            .expect("lock")
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            let _ = handler.send(event.clone());
        }
    }

    async fn pause(&self, delay: &Mutex<Duration>) {
        let delay = *delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_id(&self) -> String {
        format!("SENT-{}", self.sent.lock().expect("lock").len() + 1)
    }
}

#[async_trait]
impl Session for FakeSession {
    fn is_authed(&self) -> bool {
        !self.unauthenticated.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, _opts: ConnectOptions) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.hanging_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(Error::NotConnected);
        }

        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        let events: Vec<SessionEvent> = self.on_connect.lock().expect("lock").drain(..).collect();
        for event in &events {
            self.emit(event);
        }
        Ok(())
    }

    fn add_event_handler(&self, sender: EventSender) -> HandlerId {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().expect("lock").insert(id, sender);
        HandlerId(id)
    }

    fn remove_event_handler(&self, id: HandlerId) {
        self.handlers.lock().expect("lock").remove(&id.0);
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        self.sends_started.fetch_add(1, Ordering::SeqCst);
        self.pause(&self.send_delay).await;
        let id = self.next_id();
        self.sent
            .lock()
            .expect("lock")
            .push((to.to_string(), text.to_string()));
        Ok(id)
    }

    async fn send_media(&self, media: OutgoingMedia) -> Result<String> {
        let id = self.next_id();
        self.sent
            .lock()
            .expect("lock")
            .push((media.to, format!("{}:{}", media.kind, media.filename)));
        Ok(id)
    }

    async fn upload(&self, data: Vec<u8>, _kind: MediaKind) -> Result<UploadedMedia> {
        Ok(UploadedMedia {
            url: "https://media.example/upload".to_string(),
            direct_path: "/v/t62/upload".to_string(),
            media_key: vec![7; 32],
            file_sha256: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_length: data.len() as u64,
        })
    }

    async fn download_media(&self, _info: &MediaDownloadInfo, target: &Path) -> Result<u64> {
        self.downloads_started.fetch_add(1, Ordering::SeqCst);
        self.pause(&self.download_delay).await;
        tokio::fs::write(target, &self.media_bytes).await?;
        Ok(self.media_bytes.len() as u64)
    }

    async fn decrypt_reaction(&self, _message: &LiveMessage) -> Result<String> {
        Ok("🔥".to_string())
    }

    async fn request_history(&self, anchor: &MessageAnchor, count: u32) -> Result<String> {
        self.history_requests
            .lock()
            .expect("lock")
            .push((anchor.clone(), count));
        let response = self.history_responses.lock().expect("lock").pop_front();
        if let Some(batch) = response {
            self.emit(&SessionEvent::HistorySync(batch));
        }
        Ok(format!("REQ-{}", self.history_requests.lock().expect("lock").len()))
    }

    async fn resolve_chat_name(&self, _chat_jid: &str, push_name: &str) -> String {
        push_name.to_string()
    }

    async fn get_contact(&self, jid: &str) -> Result<ContactInfo> {
        Ok(self
            .contacts
            .lock()
            .expect("lock")
            .get(jid)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_all_contacts(&self) -> Result<Vec<ContactInfo>> {
        Ok(self.contacts.lock().expect("lock").values().cloned().collect())
    }

    async fn get_group_info(&self, jid: &str) -> Result<GroupInfo> {
        Err(Error::NotFound(format!("group {jid}")))
    }

    async fn get_joined_groups(&self) -> Result<Vec<GroupInfo>> {
        Ok(Vec::new())
    }

    async fn logout(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
