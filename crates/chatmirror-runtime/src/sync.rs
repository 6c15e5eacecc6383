//! Sync orchestration: connection lifecycle, event ingestion, idle exit
//! and reconnect backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chatmirror_core::config::Config;
use chatmirror_core::events::{HistorySync, SessionEvent};
use chatmirror_core::paths::StoreLayout;
use chatmirror_core::{Error, Result, Store};
use futures::future::BoxFuture;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::gateway::{GatewayTimeouts, SendGateway};
use crate::ingest::{HistoryBatch, Ingestor, store_group};
use crate::media::MediaCoordinator;
use crate::send::SendService;
use crate::session::{ConnectOptions, Session};

const MIN_IDLE_POLL: Duration = Duration::from_millis(10);
const MAX_IDLE_POLL: Duration = Duration::from_secs(1);

/// How long a sync session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// First sync after pairing; interactive pairing allowed, exits when idle.
    Bootstrap,
    /// Catch up and exit when idle.
    Once,
    /// Run until cancelled.
    Follow,
}

impl SyncMode {
    pub fn exits_when_idle(self) -> bool {
        matches!(self, SyncMode::Bootstrap | SyncMode::Once)
    }
}

/// What the after-connect hook gets to work with.
#[derive(Clone)]
pub struct HookContext {
    pub store: Store,
    pub session: Arc<dyn Session>,
    pub cancel: CancellationToken,
}

pub type AfterConnect = Box<dyn FnOnce(HookContext) -> BoxFuture<'static, Result<()>> + Send>;

pub struct SyncOptions {
    pub mode: SyncMode,
    pub allow_qr: bool,
    pub download_media: bool,
    pub refresh_contacts: bool,
    pub refresh_groups: bool,
    pub enable_gateway: bool,
    pub idle_exit: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub media_workers: usize,
    pub media_queue: usize,
    pub gateway_timeouts: GatewayTimeouts,
    /// Runs once after connecting, before the main loop. An error ends the
    /// sync with that error.
    pub after_connect: Option<AfterConnect>,
    /// Receives a summary after each history conversation is stored.
    pub history_observer: Option<mpsc::UnboundedSender<HistoryBatch>>,
}

impl SyncOptions {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            allow_qr: mode == SyncMode::Bootstrap,
            download_media: false,
            refresh_contacts: false,
            refresh_groups: false,
            enable_gateway: false,
            idle_exit: Duration::from_secs(30),
            reconnect_min: Duration::from_secs(2),
            reconnect_max: Duration::from_secs(30),
            media_workers: 4,
            media_queue: 512,
            gateway_timeouts: GatewayTimeouts::default(),
            after_connect: None,
            history_observer: None,
        }
    }

    pub fn from_config(mode: SyncMode, config: &Config) -> Self {
        Self {
            download_media: config.sync.download_media,
            refresh_contacts: config.sync.refresh_contacts,
            refresh_groups: config.sync.refresh_groups,
            enable_gateway: mode == SyncMode::Follow && config.gateway.enabled,
            idle_exit: config.sync.idle_exit(),
            reconnect_min: config.sync.reconnect_min(),
            reconnect_max: config.sync.reconnect_max(),
            media_workers: config.media.workers,
            media_queue: config.media.queue_capacity,
            gateway_timeouts: GatewayTimeouts::from(&config.gateway),
            ..Self::new(mode)
        }
    }

    fn idle_poll(&self) -> Duration {
        (self.idle_exit / 4).clamp(MIN_IDLE_POLL, MAX_IDLE_POLL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub messages_stored: u64,
}

/// Time since the last qualifying event.
#[derive(Debug)]
pub struct IdleClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl IdleClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for IdleClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    store: Store,
    session: Arc<dyn Session>,
    layout: StoreLayout,
}

impl Orchestrator {
    pub fn new(store: Store, session: Arc<dyn Session>, layout: StoreLayout) -> Self {
        Self {
            store,
            session,
            layout,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> Arc<dyn Session> {
        Arc::clone(&self.session)
    }

    /// Run one sync session. Cancellation ends it cleanly with the result so
    /// far.
    pub async fn run(&self, mut opts: SyncOptions, cancel: CancellationToken) -> Result<SyncResult> {
        if !opts.allow_qr && !self.session.is_authed() {
            return Err(Error::NotAuthenticated);
        }

        let clock = Arc::new(IdleClock::new());
        let stored = Arc::new(AtomicU64::new(0));
        let disconnected = Arc::new(Notify::new());
        let run_token = cancel.child_token();

        let media = opts.download_media.then(|| {
            MediaCoordinator::start(
                self.store.clone(),
                Arc::clone(&self.session),
                self.layout.media_dir(),
                opts.media_workers,
                opts.media_queue,
                cancel.clone(),
            )
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = self.session.add_event_handler(tx);
        let ingest_stop = CancellationToken::new();
        let ingestor = Arc::new(Ingestor::new(
            self.store.clone(),
            Arc::clone(&self.session),
            media.as_ref().map(MediaCoordinator::queue),
        ));
        let ingest_task = spawn_ingest(
            rx,
            ingestor,
            Arc::clone(&clock),
            Arc::clone(&stored),
            Arc::clone(&disconnected),
            opts.history_observer.take(),
            ingest_stop.clone(),
        );

        let mut gateway_task: Option<JoinHandle<()>> = None;
        let outcome = self
            .drive(&mut opts, &clock, &disconnected, &run_token, &mut gateway_task)
            .await;

        self.session.remove_event_handler(handler);
        ingest_stop.cancel();
        if let Err(e) = ingest_task.await {
            tracing::warn!("Ingestion task ended abnormally: {e}");
        }

        if let Some(media) = media {
            media.shutdown().await;
        }
        run_token.cancel();
        if let Some(task) = gateway_task
            && let Err(e) = task.await
        {
            tracing::warn!("Gateway task ended abnormally: {e}");
        }

        let result = SyncResult {
            messages_stored: stored.load(Ordering::Relaxed),
        };
        tracing::info!(messages = result.messages_stored, "Sync finished");
        outcome.map(|()| result)
    }

    async fn drive(
        &self,
        opts: &mut SyncOptions,
        clock: &IdleClock,
        disconnected: &Notify,
        cancel: &CancellationToken,
        gateway_task: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        let connect = ConnectOptions {
            allow_qr: opts.allow_qr,
        };
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            res = self.session.connect(connect) => res?,
        }
        tracing::info!(mode = ?opts.mode, "Connected");
        clock.touch();

        if opts.refresh_contacts {
            self.refresh_contacts().await;
        }
        if opts.refresh_groups {
            self.refresh_groups().await;
        }

        if opts.enable_gateway {
            let service = SendService::new(self.store.clone(), Arc::clone(&self.session));
            match SendGateway::bind(&self.layout.send_socket(), service, opts.gateway_timeouts).await {
                Ok(gateway) => {
                    let token = cancel.child_token();
                    *gateway_task = Some(tokio::spawn(gateway.serve(token)));
                }
                Err(e) => tracing::warn!("Send gateway unavailable: {e}"),
            }
        }

        if let Some(hook) = opts.after_connect.take() {
            let ctx = HookContext {
                store: self.store.clone(),
                session: Arc::clone(&self.session),
                cancel: cancel.clone(),
            };
            hook(ctx).await?;
            clock.touch();
        }

        let idle_exit = opts.mode.exits_when_idle();
        let poll = opts.idle_poll();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Stopping sync");
                    return Ok(());
                }
                () = disconnected.notified() => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    tracing::info!("Disconnected, reconnecting");
                    match reconnect_with_backoff(
                        self.session.as_ref(),
                        connect,
                        opts.reconnect_min,
                        opts.reconnect_max,
                        cancel,
                    )
                    .await
                    {
                        Ok(()) => clock.touch(),
                        Err(Error::Cancelled) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                () = tokio::time::sleep(poll), if idle_exit => {
                    if clock.idle_for() >= opts.idle_exit {
                        tracing::info!(idle = ?opts.idle_exit, "Idle, exiting");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Import every contact the session knows. Failures are logged.
    pub async fn refresh_contacts(&self) {
        match self.session.get_all_contacts().await {
            Ok(contacts) => {
                for contact in &contacts {
                    if let Err(e) = self.store.upsert_contact(contact).await {
                        tracing::warn!(jid = %contact.jid, "Failed to store contact: {e}");
                    }
                }
                tracing::debug!(count = contacts.len(), "Refreshed contacts");
            }
            Err(e) => tracing::warn!("Contact refresh failed: {e}"),
        }
    }

    /// Import metadata of every joined group. Failures are logged.
    pub async fn refresh_groups(&self) {
        match self.session.get_joined_groups().await {
            Ok(groups) => {
                for group in &groups {
                    if let Err(e) = store_group(&self.store, group).await {
                        tracing::warn!(group = %group.jid, "Failed to store group: {e}");
                    }
                }
                tracing::debug!(count = groups.len(), "Refreshed groups");
            }
            Err(e) => tracing::warn!("Group refresh failed: {e}"),
        }
    }
}

fn spawn_ingest(
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    ingestor: Arc<Ingestor>,
    clock: Arc<IdleClock>,
    stored: Arc<AtomicU64>,
    disconnected: Arc<Notify>,
    observer: Option<mpsc::UnboundedSender<HistoryBatch>>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let handle = |event: SessionEvent| {
            let ingestor = Arc::clone(&ingestor);
            let clock = Arc::clone(&clock);
            let stored = Arc::clone(&stored);
            let disconnected = Arc::clone(&disconnected);
            let observer = observer.clone();
            async move {
                clock.touch();
                match event {
                    SessionEvent::Message(msg) => match ingestor.ingest_live(&msg).await {
                        Ok(()) => {
                            stored.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(chat = %msg.info.chat_jid, id = %msg.info.id, "Failed to store message: {e}");
                        }
                    },
                    SessionEvent::HistorySync(batch) => {
                        ingest_history(&ingestor, &batch, &clock, &stored, observer.as_ref()).await;
                    }
                    SessionEvent::Connected => tracing::debug!("Session connected"),
                    SessionEvent::Disconnected { reason } => {
                        tracing::debug!(reason = reason.as_deref().unwrap_or(""), "Session disconnected");
                        disconnected.notify_one();
                    }
                }
            }
        };

        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => handle(event).await,
                    None => break,
                },
                () = stop.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        handle(event).await;
                    }
                    break;
                }
            }
        }
    })
}

async fn ingest_history(
    ingestor: &Ingestor,
    batch: &HistorySync,
    clock: &IdleClock,
    stored: &AtomicU64,
    observer: Option<&mpsc::UnboundedSender<HistoryBatch>>,
) {
    tracing::debug!(
        sync_type = ?batch.sync_type,
        conversations = batch.conversations.len(),
        "Processing history sync"
    );
    let touch = || clock.touch();
    for conv in &batch.conversations {
        let summary = ingestor
            .ingest_conversation(batch.sync_type, conv, &touch)
            .await;
        stored.fetch_add(summary.stored as u64, Ordering::Relaxed);
        if let Some(observer) = observer
            && !summary.chat_jid.is_empty()
        {
            // A closed observer only means nobody is waiting any more.
            let _ = observer.send(summary);
        }
    }
}

/// Reconnect until connected, doubling the wait from `min` up to `max`.
/// Returns [`Error::Cancelled`] when cancelled during an attempt or a wait.
pub async fn reconnect_with_backoff(
    session: &dyn Session,
    opts: ConnectOptions,
    min: Duration,
    max: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut delay = min;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if session.is_connected() {
            return Ok(());
        }
        let attempt = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            res = session.connect(opts) => res,
        };
        match attempt {
            Ok(()) => {
                tracing::info!("Reconnected");
                return Ok(());
            }
            Err(e) => tracing::warn!(retry_in = ?delay, "Reconnect failed: {e}"),
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max);
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
