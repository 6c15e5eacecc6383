//! Storing canonicalized messages: chat row, best-effort contact and group
//! metadata, sender name, display text, then the message itself.

use std::collections::HashSet;
use std::sync::Arc;

use chatmirror_core::Result;
use chatmirror_core::Store;
use chatmirror_core::canonical::{self, NormalizedMessage};
use chatmirror_core::events::{EndOfHistory, HistoryConversation, HistorySyncType, LiveMessage};
use chatmirror_core::jid;
use chatmirror_core::models::{ChatKind, ContactInfo, MessageUpsert};
use tokio::sync::Mutex;

use crate::media::{MediaJob, MediaQueue};
use crate::session::Session;

/// Name stored as the sender of messages sent from this account.
pub const SELF_SENDER_NAME: &str = "me";

/// Summary of one stored history conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBatch {
    pub sync_type: HistorySyncType,
    pub chat_jid: String,
    /// Messages carried by the batch for this conversation.
    pub messages: usize,
    /// Messages that were written to the store.
    pub stored: usize,
    pub end_of_history: EndOfHistory,
}

pub struct Ingestor {
    store: Store,
    session: Arc<dyn Session>,
    media: Option<MediaQueue>,
    groups_seen: Mutex<HashSet<String>>,
}

impl Ingestor {
    pub fn new(store: Store, session: Arc<dyn Session>, media: Option<MediaQueue>) -> Self {
        Self {
            store,
            session,
            media,
            groups_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Store a live message. Encrypted reactions are decrypted first when
    /// the session can do it.
    pub async fn ingest_live(&self, event: &LiveMessage) -> Result<()> {
        let mut msg = canonical::canonicalize_live(event);

        if msg.reaction_encrypted {
            match self.session.decrypt_reaction(event).await {
                Ok(emoji) if !emoji.trim().is_empty() => {
                    msg.reaction_emoji = Some(emoji.trim().to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(id = %msg.id, "Failed to decrypt reaction: {e}");
                }
            }
        }

        self.store_message(&msg, None).await
    }

    /// Store every message of one history conversation. `touch` runs once
    /// for the conversation and once per message.
    pub async fn ingest_conversation(
        &self,
        sync_type: HistorySyncType,
        conv: &HistoryConversation,
        touch: &(dyn Fn() + Send + Sync),
    ) -> HistoryBatch {
        touch();
        let chat_jid = conv.id.trim().to_string();
        let mut batch = HistoryBatch {
            sync_type,
            chat_jid: chat_jid.clone(),
            messages: conv.messages.len(),
            stored: 0,
            end_of_history: conv.end_of_history,
        };
        if chat_jid.is_empty() {
            return batch;
        }

        let conv_name = conv.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        for hist in &conv.messages {
            touch();
            if hist.content.is_none() {
                continue;
            }
            let msg = canonical::canonicalize_history(&chat_jid, hist);
            if msg.id.trim().is_empty() || msg.chat_jid.is_empty() {
                continue;
            }
            match self.store_message(&msg, conv_name).await {
                Ok(()) => batch.stored += 1,
                Err(e) => {
                    tracing::warn!(chat = %chat_jid, id = %msg.id, "Failed to store history message: {e}");
                }
            }
        }
        batch
    }

    async fn store_message(&self, msg: &NormalizedMessage, chat_name: Option<&str>) -> Result<()> {
        let kind = jid::chat_kind(&msg.chat_jid);
        let chat_name = match chat_name {
            Some(name) => name.to_string(),
            None => {
                self.session
                    .resolve_chat_name(&msg.chat_jid, &msg.push_name)
                    .await
            }
        };
        self.store
            .upsert_chat(&msg.chat_jid, kind, &chat_name, msg.timestamp)
            .await?;

        if kind == ChatKind::Direct {
            self.remember_contact(&msg.chat_jid).await;
        }

        let sender_name = self.sender_name(msg).await;

        if kind == ChatKind::Group {
            self.remember_group(&msg.chat_jid).await;
        }

        let target = self.resolve_target(msg).await?;
        let display_text = canonical::compose_display_text(msg, target.as_deref());

        let upsert = MessageUpsert {
            chat_jid: msg.chat_jid.clone(),
            chat_name,
            msg_id: msg.id.clone(),
            sender_jid: msg.sender_jid.clone(),
            sender_name,
            timestamp: msg.timestamp,
            from_me: msg.from_me,
            text: msg.text.clone(),
            display_text,
            media: msg.media.clone(),
            reaction_to_id: msg.reaction_to_id.clone().unwrap_or_default(),
            reaction_emoji: msg.reaction_emoji.clone().unwrap_or_default(),
            reply_to_id: msg.reply_to_id.clone().unwrap_or_default(),
            reply_to_display: msg.reply_to_display.clone().unwrap_or_default(),
        };
        self.store.upsert_message(&upsert).await?;
        tracing::debug!(chat = %msg.chat_jid, id = %msg.id, "Stored message");

        if msg.media.is_some()
            && let Some(queue) = &self.media
        {
            queue.enqueue(MediaJob {
                chat_jid: msg.chat_jid.clone(),
                msg_id: msg.id.clone(),
            });
        }
        Ok(())
    }

    /// "me" for own messages, else the push name, overridden by the best
    /// name the session knows for the sender.
    async fn sender_name(&self, msg: &NormalizedMessage) -> String {
        let mut name = if msg.from_me {
            SELF_SENDER_NAME.to_string()
        } else {
            let push = msg.push_name.trim();
            if push == "-" {
                String::new()
            } else {
                push.to_string()
            }
        };

        if msg.sender_jid.is_empty() {
            return name;
        }
        let sender = jid::to_non_device(&msg.sender_jid);
        if let Some(info) = self.lookup_contact(&sender).await {
            if let Some(best) = info.best_name() {
                name = best;
            }
            self.upsert_contact(&sender, info).await;
        }
        name
    }

    async fn remember_contact(&self, chat_jid: &str) {
        let contact = jid::to_non_device(chat_jid);
        if let Some(info) = self.lookup_contact(&contact).await {
            self.upsert_contact(&contact, info).await;
        }
    }

    async fn lookup_contact(&self, contact_jid: &str) -> Option<ContactInfo> {
        match self.session.get_contact(contact_jid).await {
            Ok(info) if info.found => Some(info),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(jid = contact_jid, "Contact lookup failed: {e}");
                None
            }
        }
    }

    async fn upsert_contact(&self, contact_jid: &str, mut info: ContactInfo) {
        contact_jid.clone_into(&mut info.jid);
        if info.phone.trim().is_empty() {
            info.phone = jid::user(contact_jid).to_string();
        }
        if let Err(e) = self.store.upsert_contact(&info).await {
            tracing::warn!(jid = contact_jid, "Failed to store contact: {e}");
        }
    }

    /// Group metadata is fetched once per ingestor.
    async fn remember_group(&self, group_jid: &str) {
        if !self.groups_seen.lock().await.insert(group_jid.to_string()) {
            return;
        }
        match self.session.get_group_info(group_jid).await {
            Ok(group) => {
                if let Err(e) = store_group(&self.store, &group).await {
                    tracing::warn!(group = group_jid, "Failed to store group: {e}");
                }
            }
            Err(e) => {
                tracing::debug!(group = group_jid, "Group lookup failed: {e}");
            }
        }
    }

    /// Display text of the reacted-to or replied-to message. An inline
    /// quote wins over a store lookup.
    async fn resolve_target(&self, msg: &NormalizedMessage) -> Result<Option<String>> {
        if msg.is_reaction() {
            return match msg.reaction_to_id.as_deref() {
                Some(target) => self.store.resolve_target_text(&msg.chat_jid, target).await,
                None => Ok(None),
            };
        }
        if msg.is_reply() {
            if let Some(quoted) = &msg.reply_to_display {
                return Ok(Some(quoted.clone()));
            }
            if let Some(target) = msg.reply_to_id.as_deref() {
                return self.store.resolve_target_text(&msg.chat_jid, target).await;
            }
        }
        Ok(None)
    }
}

/// Write group metadata and its participant set.
pub async fn store_group(store: &Store, group: &chatmirror_core::models::GroupInfo) -> Result<()> {
    store
        .upsert_group(&group.jid, &group.name, &group.owner_jid, group.created_at)
        .await?;
    store
        .replace_group_participants(&group.jid, &group.participants)
        .await
}
