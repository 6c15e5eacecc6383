//! On-demand history backfill for one chat.
//!
//! Runs inside a single `Once` sync session: each round anchors a history
//! request at the oldest locally stored message and waits for the matching
//! on-demand batch to be stored before deciding whether to continue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chatmirror_core::config::BackfillConfig;
use chatmirror_core::events::{EndOfHistory, HistorySyncType};
use chatmirror_core::{Error, Result};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ingest::HistoryBatch;
use crate::sync::{HookContext, Orchestrator, SyncMode, SyncOptions};

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub chat_jid: String,
    /// Messages requested per round.
    pub count: u32,
    /// Maximum number of rounds.
    pub requests: u32,
    /// How long to wait for each response.
    pub wait: Duration,
    /// Idle-exit window of the surrounding sync session.
    pub idle_exit: Duration,
}

impl BackfillOptions {
    pub fn new(chat_jid: impl Into<String>) -> Self {
        Self::from_config(chat_jid, &BackfillConfig::default())
    }

    pub fn from_config(chat_jid: impl Into<String>, config: &BackfillConfig) -> Self {
        Self {
            chat_jid: chat_jid.into(),
            count: config.count,
            requests: config.requests,
            wait: Duration::from_secs(config.wait_secs),
            idle_exit: Duration::from_secs(config.idle_exit_secs),
        }
    }

    fn normalized(mut self) -> Self {
        let defaults = BackfillConfig::default();
        self.chat_jid = self.chat_jid.trim().to_string();
        if self.count == 0 {
            self.count = defaults.count;
        }
        if self.requests == 0 {
            self.requests = defaults.requests;
        }
        if self.wait.is_zero() {
            self.wait = Duration::from_secs(defaults.wait_secs);
        }
        if self.idle_exit.is_zero() {
            self.idle_exit = Duration::from_secs(defaults.idle_exit_secs);
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillResult {
    pub chat: String,
    pub requests_sent: u32,
    pub responses_seen: u32,
    /// Growth of the chat's stored message count.
    pub messages_added: i64,
    /// Messages stored by the sync session, backfilled or not.
    pub messages_synced: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU32,
    responses: AtomicU32,
}

/// Backfill older history for one chat.
pub async fn backfill(
    orchestrator: &Orchestrator,
    opts: BackfillOptions,
    cancel: CancellationToken,
) -> Result<BackfillResult> {
    let opts = opts.normalized();
    if opts.chat_jid.is_empty() {
        return Err(Error::InvalidRequest("chat is required".to_string()));
    }

    let store = orchestrator.store();
    if store.oldest_message(&opts.chat_jid).await?.is_none() {
        return Err(no_local_messages(&opts.chat_jid));
    }
    let before = store.count_chat_messages(&opts.chat_jid).await?;

    let (observer, batches) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());

    let mut sync_opts = SyncOptions::new(SyncMode::Once);
    sync_opts.idle_exit = opts.idle_exit;
    sync_opts.history_observer = Some(observer);
    let hook_opts = opts.clone();
    let hook_counters = Arc::clone(&counters);
    sync_opts.after_connect = Some(Box::new(move |ctx: HookContext| {
        async move { run_rounds(ctx, hook_opts, batches, hook_counters).await }.boxed()
    }));

    let synced = orchestrator.run(sync_opts, cancel).await?;
    let after = store.count_chat_messages(&opts.chat_jid).await?;

    Ok(BackfillResult {
        chat: opts.chat_jid,
        requests_sent: counters.requests.load(Ordering::Relaxed),
        responses_seen: counters.responses.load(Ordering::Relaxed),
        messages_added: after - before,
        messages_synced: synced.messages_stored,
    })
}

async fn run_rounds(
    ctx: HookContext,
    opts: BackfillOptions,
    mut batches: mpsc::UnboundedReceiver<HistoryBatch>,
    counters: Arc<Counters>,
) -> Result<()> {
    let chat = opts.chat_jid.as_str();

    for round in 1..=opts.requests {
        let oldest = ctx
            .store
            .oldest_message(chat)
            .await?
            .ok_or_else(|| no_local_messages(chat))?;

        // Anything still queued predates this request.
        while batches.try_recv().is_ok() {}

        counters.requests.fetch_add(1, Ordering::Relaxed);
        tracing::info!(chat, round, count = opts.count, "Requesting older messages");
        ctx.session.request_history(&oldest, opts.count).await?;

        let batch = wait_for_batch(&mut batches, chat, opts.wait, &ctx.cancel).await?;
        counters.responses.fetch_add(1, Ordering::Relaxed);
        tracing::info!(chat, messages = batch.messages, "On-demand history received");

        let new_oldest = ctx.store.oldest_message(chat).await?;
        if new_oldest.as_ref().map(|m| m.msg_id.as_str()) == Some(oldest.msg_id.as_str()) {
            tracing::info!(chat, "No older messages were added, stopping");
            break;
        }
        if batch.messages == 0 {
            tracing::info!(chat, "No messages returned, stopping");
            break;
        }
        if batch.end_of_history == EndOfHistory::CompleteAndNoMoreOnPrimary {
            tracing::info!(chat, "Reached start of chat history, stopping");
            break;
        }
    }
    Ok(())
}

/// Wait for the on-demand batch of `chat`. The batch is only published once
/// its messages are stored.
async fn wait_for_batch(
    batches: &mut mpsc::UnboundedReceiver<HistoryBatch>,
    chat: &str,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<HistoryBatch> {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = &mut deadline => {
                return Err(Error::Timeout(format!(
                    "waiting for on-demand history sync response for {chat}"
                )));
            }
            batch = batches.recv() => match batch {
                Some(batch) if batch.sync_type == HistorySyncType::OnDemand && batch.chat_jid == chat => {
                    return Ok(batch);
                }
                Some(_) => {}
                None => return Err(Error::Other("history observer closed".to_string())),
            }
        }
    }
}

fn no_local_messages(chat: &str) -> Error {
    Error::NotFound(format!(
        "no messages for {chat} in local DB; run sync first"
    ))
}
