//! Reconciliation engine: the polling loops that keep the local cache
//! converging toward the wallet server.
//!
//! Every loop has the same shape: wait for the transport, wait for the
//! server gate, fetch, merge, notify, sleep. Loops never stop on a remote
//! failure; the next tick simply tries again.

use super::client::params;
use super::events::{EventHub, Presentation, SessionEvent, Surface};
use super::models::{
    BalancesReport, BookRecord, ContactRecord, IdentityBalanceReport, IdentityReport, MessageRecord,
    MiningStats, StatusReport, TransactionRecord,
};
use super::reconcile::{
    merge_book, merge_read_messages, merge_roster, merge_transactions, merge_unread_messages,
};
use super::version::check_version;
use super::{RequestClient, Result, SyncError};
use crate::config::{LoopIntervals, WalletConfig};
use crate::crypto::RequestParams;
use crate::database::{Credential, Database, Inbox, Message, Roster, TxCategory};
use crate::tor::TorBootstrap;
use crate::units::format_balance;
use crate::DatabaseError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const OFFLINE_NOTICE: &str = "Server is offline, retrying in 30 seconds";

/// Characters of a message body shown in its notification.
const PREVIEW_CHARS: usize = 50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The `serverStatus` flag every non-status loop waits on.
#[derive(Clone)]
pub struct ServerGate {
    online: Arc<watch::Sender<bool>>,
}

impl ServerGate {
    pub fn new() -> Self {
        let (online, _) = watch::channel(false);
        Self {
            online: Arc::new(online),
        }
    }

    /// Set the flag. Returns true if the value changed.
    pub fn set(&self, online: bool) -> bool {
        self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Resolve once the server is online. Returns false if cancelled first.
    pub async fn wait_online(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.online.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            result = rx.wait_for(|online| *online) => result.is_ok(),
        }
    }
}

impl Default for ServerGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Status,
    Balance,
    Transactions,
    Book,
    Contacts,
    Messages,
    IdentityBalance,
    Mining,
}

impl LoopKind {
    /// Loops started as soon as the session is provisioned.
    pub const CORE: [LoopKind; 5] = [
        LoopKind::Status,
        LoopKind::Balance,
        LoopKind::Transactions,
        LoopKind::Book,
        LoopKind::Contacts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LoopKind::Status => "status",
            LoopKind::Balance => "balance",
            LoopKind::Transactions => "transactions",
            LoopKind::Book => "book",
            LoopKind::Contacts => "contacts",
            LoopKind::Messages => "messages",
            LoopKind::IdentityBalance => "identity-balance",
            LoopKind::Mining => "mining",
        }
    }

    pub fn interval(&self, intervals: &LoopIntervals) -> Duration {
        let secs = match self {
            LoopKind::Status => intervals.status_secs,
            LoopKind::Balance => intervals.balance_secs,
            LoopKind::Transactions => intervals.transactions_secs,
            LoopKind::Book => intervals.book_secs,
            LoopKind::Contacts => intervals.contacts_secs,
            LoopKind::Messages => intervals.messages_secs,
            LoopKind::IdentityBalance => intervals.identity_balance_secs,
            LoopKind::Mining => intervals.mining_secs,
        };
        Duration::from_secs(secs)
    }

    /// Surface whose first activation starts this loop, if any.
    pub fn surface(&self) -> Option<Surface> {
        match self {
            LoopKind::Messages | LoopKind::IdentityBalance => Some(Surface::Messages),
            LoopKind::Mining => Some(Surface::Mining),
            _ => None,
        }
    }

    /// Loops started when `surface` is first shown.
    pub fn for_surface(surface: Surface) -> Vec<LoopKind> {
        [LoopKind::Messages, LoopKind::IdentityBalance, LoopKind::Mining]
            .into_iter()
            .filter(|kind| kind.surface() == Some(surface))
            .collect()
    }

    /// Everything but the status loop waits for the server gate.
    fn waits_for_server(&self) -> bool {
        !matches!(self, LoopKind::Status)
    }
}

/// What the status loop last learned about the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerStatus {
    pub online: bool,
    pub version_compatible: bool,
    pub last_height: Option<i64>,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            online: false,
            version_compatible: true,
            last_height: None,
        }
    }
}

/// Fetch `/status` and apply the protocol version floor.
pub async fn fetch_status(
    client: &RequestClient,
    credential: &Credential,
    min_version: &str,
) -> Result<StatusReport> {
    let report: StatusReport = client
        .request_as(credential, "/status", &RequestParams::new())
        .await?;
    check_version(report.version.as_deref(), min_version)?;
    Ok(report)
}

/// Everything a loop tick needs. Shared by all loops of a session.
pub struct SyncContext {
    db: Arc<Mutex<Database>>,
    client: RequestClient,
    credential: Credential,
    hub: Arc<EventHub>,
    presentation: Arc<dyn Presentation>,
    bootstrap: Arc<TorBootstrap>,
    config: WalletConfig,
    gate: ServerGate,
    status: Mutex<ServerStatus>,
    /// Last online value reported through `StatusChanged`.
    reported: Mutex<Option<bool>>,
    messages_primed: AtomicBool,
}

impl SyncContext {
    pub fn new(
        db: Arc<Mutex<Database>>,
        client: RequestClient,
        credential: Credential,
        hub: Arc<EventHub>,
        presentation: Arc<dyn Presentation>,
        bootstrap: Arc<TorBootstrap>,
        config: WalletConfig,
    ) -> Self {
        Self {
            db,
            client,
            credential,
            hub,
            presentation,
            bootstrap,
            config,
            gate: ServerGate::new(),
            status: Mutex::new(ServerStatus::default()),
            reported: Mutex::new(None),
            messages_primed: AtomicBool::new(false),
        }
    }

    pub fn gate(&self) -> &ServerGate {
        &self.gate
    }

    pub fn bootstrap(&self) -> &Arc<TorBootstrap> {
        &self.bootstrap
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn client(&self) -> &RequestClient {
        &self.client
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn server_status(&self) -> ServerStatus {
        *lock(&self.status)
    }

    /// Run `f` against the cache. The lock is never held across an await.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> crate::database::Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("sync cache".to_string()))?;
        Ok(f(&db)?)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &RequestParams,
    ) -> Result<T> {
        self.client
            .request_as(&self.credential, path, params)
            .await
    }

    /// Run one iteration of a loop.
    pub async fn tick(&self, kind: LoopKind) -> Result<()> {
        if !self.bootstrap.is_ready() {
            return Err(SyncError::TransportNotReady);
        }
        debug!("Tick {}", kind.name());
        match kind {
            LoopKind::Status => self.sync_status().await,
            LoopKind::Balance => self.sync_balances().await,
            LoopKind::Transactions => self.sync_transactions().await,
            LoopKind::Book => self.sync_book().await,
            LoopKind::Contacts => self.sync_contacts().await,
            LoopKind::Messages => {
                if self.messages_primed.load(Ordering::Acquire) {
                    self.update_messages().await
                } else {
                    self.initial_message_sync().await
                }
            }
            LoopKind::IdentityBalance => self.sync_identity_balance().await,
            LoopKind::Mining => self.sync_mining().await,
        }
    }

    async fn sync_status(&self) -> Result<()> {
        let min_version = &self.config.min_server_version;
        match fetch_status(&self.client, &self.credential, min_version).await {
            Ok(report) => {
                let info = report.chain_info();
                self.with_db(|db| db.save_chain_info(&info))?;
                *lock(&self.status) = ServerStatus {
                    online: true,
                    version_compatible: true,
                    last_height: Some(info.height),
                };
                if self.gate.set(true) {
                    info!("Wallet server online at height {}", info.height);
                }
                self.report_online(true, None);
                Ok(())
            }
            Err(e) => {
                {
                    let mut status = lock(&self.status);
                    status.online = false;
                    status.version_compatible =
                        !matches!(e, SyncError::IncompatibleVersion { .. });
                }
                if self.gate.set(false) {
                    warn!("Wallet server offline: {}", e);
                }
                self.report_online(false, Some(e.to_string()));
                self.hub.emit(SessionEvent::Notice(OFFLINE_NOTICE.to_string()));
                Err(e)
            }
        }
    }

    fn report_online(&self, online: bool, reason: Option<String>) {
        let mut reported = lock(&self.reported);
        if *reported != Some(online) {
            *reported = Some(online);
            drop(reported);
            self.hub.emit(SessionEvent::StatusChanged { online, reason });
        }
    }

    async fn sync_balances(&self) -> Result<()> {
        let report: BalancesReport = self.fetch("/balances", &RequestParams::new()).await?;
        let changed = self.with_db(|db| {
            let previous = db.load_addresses()?;
            if !db.update_balances(report.transparent, report.shielded)? {
                return Ok(false);
            }
            Ok(previous.map_or(true, |pair| {
                pair.transparent_balance != report.transparent
                    || pair.shielded_balance != report.shielded
            }))
        })?;
        if changed {
            self.hub.emit(SessionEvent::BalanceChanged {
                transparent: report.transparent,
                shielded: report.shielded,
            });
        }
        Ok(())
    }

    async fn sync_transactions(&self) -> Result<()> {
        let records: Vec<TransactionRecord> =
            self.fetch("/transactions", &RequestParams::new()).await?;
        let batch = records.into_iter().map(Into::into).collect();

        let merge = self.with_db(|db| {
            let height = db.load_chain_info()?.map(|info| info.height);
            merge_transactions(db, batch, height)
        })?;
        if merge.newly_confirmed > 0 {
            debug!("{} transaction(s) reached confirmed depth", merge.newly_confirmed);
        }

        for tx in merge.inserted {
            if tx.category == TxCategory::Receive {
                let body = format!("{} BTCZ", format_balance(tx.amount));
                self.hub.emit(SessionEvent::TransactionObserved(tx));
                self.hub.emit(SessionEvent::notify("Receive", body));
            } else {
                self.hub.emit(SessionEvent::TransactionObserved(tx));
            }
        }
        Ok(())
    }

    async fn sync_book(&self) -> Result<()> {
        let records: Vec<BookRecord> = self.fetch("/book", &RequestParams::new()).await?;
        let entries = records.into_iter().map(Into::into).collect();
        let merge = self.with_db(|db| merge_book(db, entries))?;
        if merge.changed() {
            debug!(
                "Address book: {} added, {} removed",
                merge.added.len(),
                merge.removed.len()
            );
        }
        Ok(())
    }

    async fn sync_contacts(&self) -> Result<()> {
        let contacts: Vec<ContactRecord> = self
            .fetch("/contacts", &params([("get", "contacts")]))
            .await?;
        let pending: Vec<ContactRecord> = self
            .fetch("/contacts", &params([("get", "pending")]))
            .await?;

        let contacts = contacts.into_iter().map(Into::into).collect();
        let pending = pending.into_iter().map(Into::into).collect();
        let (contacts, pending) = self.with_db(|db| {
            Ok((
                merge_roster(db, Roster::Contacts, contacts)?,
                merge_roster(db, Roster::Pending, pending)?,
            ))
        })?;

        for request in &pending.added {
            self.hub.emit(SessionEvent::notify(
                "New Request",
                format!("{} wants to add you as a contact", request.username),
            ));
        }
        if contacts.changed() || pending.changed() {
            self.hub.emit(SessionEvent::ContactRosterChanged);
        }
        Ok(())
    }

    async fn fetch_messages(&self, which: &str) -> Result<Vec<Message>> {
        let records: Vec<MessageRecord> = self.fetch("/messages", &params([("get", which)])).await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    /// The stored messaging identity. While none is stored, ask the server
    /// and keep what it returns.
    pub async fn ensure_identity(&self) -> Result<Option<String>> {
        if let Some(identity) = self.with_db(|db| db.load_identity())? {
            return Ok(Some(identity));
        }
        let report: IdentityReport = self
            .fetch("/contacts", &params([("get", "identity")]))
            .await?;
        match report.address.filter(|address| !address.is_empty()) {
            Some(address) => {
                self.with_db(|db| db.save_identity(&address))?;
                info!("Messaging identity provisioned");
                Ok(Some(address))
            }
            None => {
                debug!("Server has no messaging identity");
                Ok(None)
            }
        }
    }

    /// Load the read history, then stage unread messages, raising one
    /// summary notification.
    pub async fn initial_message_sync(&self) -> Result<()> {
        if self.ensure_identity().await?.is_none() {
            debug!("No messaging identity yet, skipping message sync");
            return Ok(());
        }

        let read = self.fetch_messages("read").await?;
        let stored = self.with_db(|db| merge_read_messages(db, read))?;
        debug!("Loaded {} read message(s)", stored);

        let unread = self.fetch_messages("unread").await?;
        let arrivals = self.with_db(|db| merge_unread_messages(db, unread, None))?;
        if !arrivals.is_empty() {
            self.hub.emit(SessionEvent::notify(
                "New Message(s)",
                format!("{} New Message(s)", arrivals.len()),
            ));
        }

        self.messages_primed.store(true, Ordering::Release);
        info!("Message sync complete");
        Ok(())
    }

    async fn update_messages(&self) -> Result<()> {
        if self.ensure_identity().await?.is_none() {
            return Ok(());
        }

        let read = self.fetch_messages("read").await?;
        self.with_db(|db| merge_read_messages(db, read))?;

        let unread = self.fetch_messages("unread").await?;
        let foreground = self.presentation.current_foreground_contact_id();
        let arrivals =
            self.with_db(|db| merge_unread_messages(db, unread, foreground.as_deref()))?;

        let messages_visible = self.presentation.is_surface_visible(Surface::Messages);
        for arrival in arrivals {
            let message = arrival.message;
            let preview: String = message.body.chars().take(PREVIEW_CHARS).collect();
            let notify = arrival.inbox == Inbox::Unread || !messages_visible;
            if notify {
                self.hub.emit(SessionEvent::notify(
                    "New Message",
                    format!("{}: {}", message.author, preview),
                ));
            }
            self.hub.emit(SessionEvent::MessageArrived {
                contact_id: message.contact_id,
                preview,
            });
        }
        Ok(())
    }

    async fn sync_identity_balance(&self) -> Result<()> {
        if !self.presentation.is_surface_visible(Surface::Messages) {
            return Ok(());
        }
        let identity = match self.with_db(|db| db.load_identity())? {
            Some(identity) => identity,
            None => return Ok(()),
        };
        let report: IdentityBalanceReport = self
            .fetch("/balance", &params([("address", identity)]))
            .await?;
        self.hub.emit(SessionEvent::IdentityBalance(report.balance));
        Ok(())
    }

    async fn sync_mining(&self) -> Result<()> {
        match self.fetch::<MiningStats>("/mining", &RequestParams::new()).await {
            Ok(stats) => {
                self.hub.emit(SessionEvent::MiningStats(Some(stats)));
                Ok(())
            }
            Err(e) => {
                self.hub.emit(SessionEvent::MiningStats(None));
                Err(e)
            }
        }
    }
}

fn sleep_duration(kind: LoopKind, intervals: &LoopIntervals) -> Duration {
    let base = kind.interval(intervals);
    if intervals.jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=intervals.jitter_ms))
}

fn log_failure(kind: LoopKind, e: &SyncError) {
    match e {
        SyncError::ServerError(message) => warn!("{} loop: server error: {}", kind.name(), message),
        SyncError::Database(e) => error!("{} loop: local storage failure: {}", kind.name(), e),
        e if e.is_retryable() => debug!("{} loop: {}, retrying next tick", kind.name(), e),
        e => warn!("{} loop: {}", kind.name(), e),
    }
}

async fn run_loop(ctx: Arc<SyncContext>, kind: LoopKind, cancel: CancellationToken) {
    if !ctx.bootstrap.wait_ready(&cancel).await {
        return;
    }
    info!("Started {} loop", kind.name());

    loop {
        if kind.waits_for_server() && !ctx.gate.wait_online(&cancel).await {
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = ctx.tick(kind) => result,
        };
        if let Err(e) = result {
            log_failure(kind, &e);
        }

        let delay = sleep_duration(kind, &ctx.config.intervals);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("Stopped {} loop", kind.name());
}

/// Owns the spawned loop tasks of one session.
pub struct ReconciliationEngine {
    ctx: Arc<SyncContext>,
    cancel: CancellationToken,
    loops: Mutex<HashMap<LoopKind, JoinHandle<()>>>,
}

impl ReconciliationEngine {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            cancel: CancellationToken::new(),
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Start a loop. Returns false if it is already running or the engine
    /// has been stopped.
    pub fn spawn(&self, kind: LoopKind) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut loops = lock(&self.loops);
        if loops.get(&kind).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let handle = tokio::spawn(run_loop(self.ctx.clone(), kind, self.cancel.child_token()));
        loops.insert(kind, handle);
        true
    }

    pub fn is_running(&self, kind: LoopKind) -> bool {
        lock(&self.loops)
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = lock(&self.loops).drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Reconciliation loops stopped");
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
