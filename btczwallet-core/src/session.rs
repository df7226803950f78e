//! Session controller.
//!
//! Owns startup sequencing (transport, provisioning, loops), surface
//! activation and teardown. Surface loops start on first activation and
//! keep running after the surface is hidden; only their notifications
//! depend on visibility.

use crate::config::WalletConfig;
use crate::database::{ChainInfo, Credential, Database};
use crate::platform;
use crate::sync::engine::fetch_status;
use crate::sync::models::AddressesReport;
use crate::sync::{
    EventHub, HttpTransport, LoopKind, Presentation, ReconciliationEngine, ReqwestTransport,
    RequestClient, StreamClient, Surface, SyncContext, SyncError, WalletActions,
};
use crate::tor::{BootstrapState, ControlChannel, TorBootstrap, TorControlPort};
use crate::{DatabaseError, Result, WalletError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between first-run provisioning attempts.
const PROVISION_RETRY: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Snapshot of transport and server state for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatus {
    pub transport_progress: u8,
    pub transport_ready: bool,
    pub online: bool,
    pub version_compatible: bool,
    pub last_height: Option<i64>,
}

pub struct Session {
    db: Arc<Mutex<Database>>,
    config: WalletConfig,
    client: RequestClient,
    bootstrap: Arc<TorBootstrap>,
    hub: Arc<EventHub>,
    presentation: Arc<dyn Presentation>,
    context: Mutex<Option<Arc<SyncContext>>>,
    engine: Mutex<Option<Arc<ReconciliationEngine>>>,
    surfaces: Mutex<HashSet<Surface>>,
    stream: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Session {
    /// Build a session over explicit collaborators.
    pub fn new(
        config: WalletConfig,
        db: Database,
        transport: Arc<dyn HttpTransport>,
        control: Arc<dyn ControlChannel>,
        hub: EventHub,
        presentation: Arc<dyn Presentation>,
    ) -> Result<Self> {
        db.ensure_all()?;
        let bootstrap = Arc::new(TorBootstrap::new(control, config.bootstrap_poll_interval()));
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            client: RequestClient::new(transport),
            bootstrap,
            hub: Arc::new(hub),
            presentation,
            config,
            context: Mutex::new(None),
            engine: Mutex::new(None),
            surfaces: Mutex::new(HashSet::new()),
            stream: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Build a session that talks to the local Tor client and opens the
    /// configured database.
    pub fn open(
        config: WalletConfig,
        hub: EventHub,
        presentation: Arc<dyn Presentation>,
    ) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if parent == platform::get_data_dir() {
                platform::ensure_data_dir()?;
            } else if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::open(&config.database_path)?;
        let transport = ReqwestTransport::new(&config.socks_proxy, config.request_timeout())?;
        let control = TorControlPort::new(
            &config.tor_control_addr,
            config.tor_control_password.clone(),
        );
        info!("Opened wallet cache at {}", config.database_path.display());
        Self::new(
            config,
            db,
            Arc::new(transport),
            Arc::new(control),
            hub,
            presentation,
        )
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn bootstrap(&self) -> &Arc<TorBootstrap> {
        &self.bootstrap
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> crate::database::Result<T>) -> Result<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("session cache".to_string()))?;
        Ok(f(&db)?)
    }

    /// Start the Tor bootstrap and wait for it. Returns false if the
    /// session was shut down first.
    pub async fn connect_transport(&self) -> bool {
        self.bootstrap.start();
        self.bootstrap.wait_ready(&self.cancel).await
    }

    /// Pair with a wallet server. The credential is stored only after the
    /// server answered `/status` with a compatible version, and replaces
    /// any previous one. Re-pairing is refused while the loops run.
    pub async fn pair(&self, host: &str, api_key: &str, secret_key: &str) -> Result<ChainInfo> {
        if !self.bootstrap.is_ready() {
            return Err(SyncError::TransportNotReady.into());
        }
        if lock(&self.engine).is_some() {
            return Err(SyncError::InvalidInput(
                "Stop the running session before pairing again".to_string(),
            )
            .into());
        }
        let credential = Credential::new(host, api_key, secret_key);
        if credential.host.is_empty() || credential.api_key.is_empty() {
            return Err(SyncError::InvalidInput("Host and API key are required".to_string()).into());
        }

        let report =
            fetch_status(&self.client, &credential, &self.config.min_server_version).await?;
        let info = report.chain_info();
        self.with_db(|db| {
            db.save_chain_info(&info)?;
            db.save_credential(&credential)
        })?;
        *lock(&self.context) = None;
        info!("Paired with wallet server at height {}", info.height);
        Ok(info)
    }

    pub fn is_paired(&self) -> Result<bool> {
        Ok(self.with_db(|db| db.load_credential())?.is_some())
    }

    /// Shared loop context, built on first use from the stored credential.
    fn context(&self) -> Result<Arc<SyncContext>> {
        let mut context = lock(&self.context);
        if let Some(ctx) = context.as_ref() {
            return Ok(ctx.clone());
        }
        let credential = self
            .with_db(|db| db.load_credential())?
            .ok_or(WalletError::NotPaired)?;
        let ctx = Arc::new(SyncContext::new(
            self.db.clone(),
            self.client.clone(),
            credential,
            self.hub.clone(),
            self.presentation.clone(),
            self.bootstrap.clone(),
            self.config.clone(),
        ));
        *context = Some(ctx.clone());
        Ok(ctx)
    }

    /// Foreground actions bound to the stored credential.
    pub fn actions(&self) -> Result<WalletActions> {
        Ok(WalletActions::new(self.context()?))
    }

    /// Bring the session up: transport, first-run provisioning, loops.
    ///
    /// Calling it again after a successful start is a no-op.
    pub async fn start(&self) -> Result<()> {
        if lock(&self.engine).is_some() {
            return Ok(());
        }
        let ctx = self.context()?;

        if !self.connect_transport().await {
            return Ok(());
        }
        info!("Transport ready");

        if !self.provision_addresses(&ctx).await? {
            return Ok(());
        }
        self.provision_identity(&ctx).await;

        let engine = Arc::new(ReconciliationEngine::new(ctx.clone()));
        for kind in LoopKind::CORE {
            engine.spawn(kind);
        }
        let pending: Vec<Surface> = lock(&self.surfaces).iter().copied().collect();
        for surface in pending {
            for kind in LoopKind::for_surface(surface) {
                engine.spawn(kind);
            }
        }
        *lock(&self.engine) = Some(engine);

        if self.config.stream_enabled {
            let client = StreamClient::new(ctx);
            let cancel = self.cancel.child_token();
            *lock(&self.stream) = Some(tokio::spawn(async move { client.run(cancel).await }));
        }
        info!("Session started");
        Ok(())
    }

    /// Fetch the address pair once, retrying transient failures. Returns
    /// false if cancelled first.
    async fn provision_addresses(&self, ctx: &SyncContext) -> Result<bool> {
        if self.with_db(|db| db.load_addresses())?.is_some() {
            return Ok(true);
        }
        loop {
            let result = ctx
                .client()
                .request_as::<AddressesReport>(ctx.credential(), "/addresses", &Default::default())
                .await;
            match result {
                Ok(report) => {
                    let pair = report.into_pair();
                    self.with_db(|db| db.insert_addresses(&pair))?;
                    info!("Provisioned wallet addresses");
                    return Ok(true);
                }
                Err(e) if e.is_retryable() => {
                    debug!("Address provisioning failed: {}, retrying", e);
                }
                Err(e) => return Err(e.into()),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(PROVISION_RETRY) => {}
            }
        }
    }

    /// Store the messaging identity if the server has one. A failed
    /// lookup is retried by the message loop.
    async fn provision_identity(&self, ctx: &SyncContext) {
        if let Err(e) = ctx.ensure_identity().await {
            warn!("Identity lookup failed: {}", e);
        }
    }

    /// Mark a surface as shown. Its loops start the first time; returns
    /// true only then.
    pub fn activate_surface(&self, surface: Surface) -> bool {
        if !lock(&self.surfaces).insert(surface) {
            return false;
        }
        if let Some(engine) = lock(&self.engine).as_ref() {
            for kind in LoopKind::for_surface(surface) {
                engine.spawn(kind);
            }
        }
        debug!("Activated {:?} surface", surface);
        true
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.bootstrap.state();
        let server = lock(&self.context)
            .as_ref()
            .map(|ctx| ctx.server_status())
            .unwrap_or_default();
        SessionStatus {
            transport_progress: state.progress(),
            transport_ready: state == BootstrapState::Ready,
            online: server.online,
            version_compatible: server.version_compatible,
            last_height: server.last_height,
        }
    }

    /// Cancel every loop and stop the transport bootstrap.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let engine = lock(&self.engine).take();
        if let Some(engine) = engine {
            engine.stop().await;
        }
        let stream = lock(&self.stream).take();
        if let Some(stream) = stream {
            let _ = stream.await;
        }
        self.bootstrap.stop();
        info!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::SurfaceState;
    use crate::sync::test_support::{finished_channel, test_credential, FakeServer, Reply};
    use crate::sync::SessionEvent;
    use serde_json::json;

    fn session(server: Arc<FakeServer>) -> Session {
        Session::new(
            WalletConfig::default(),
            Database::in_memory().unwrap(),
            server,
            finished_channel(),
            EventHub::default(),
            Arc::new(SurfaceState::new()),
        )
        .unwrap()
    }

    fn status_reply(version: &str) -> Reply {
        Reply::Data(json!({"version": version, "height": 250, "currency": "usd", "price": 0.0001}))
    }

    fn script_first_run(server: &FakeServer) {
        server.route("/status", None, status_reply("1.5.0"));
        server.route(
            "/addresses",
            None,
            Reply::Plain(json!({"transparent": "t1self", "shielded": "zs1self"})),
        );
        server.route(
            "/contacts",
            Some("identity"),
            Reply::Data(json!({"address": "identity-addr"})),
        );
    }

    #[tokio::test]
    async fn test_pair_requires_transport() {
        let session = session(FakeServer::new());
        let err = session
            .pair("wallet.onion", "api-key", &test_credential().secret_key)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Sync(SyncError::TransportNotReady)));
    }

    #[tokio::test]
    async fn test_pair_stores_credential_after_compatible_status() {
        let server = FakeServer::new();
        server.route("/status", None, status_reply("1.4.9"));
        let session = session(server);
        assert!(session.connect_transport().await);

        let info = session
            .pair("wallet.onion", "api-key", &test_credential().secret_key)
            .await
            .unwrap();
        assert_eq!(info.height, 250);
        assert!(session.is_paired().unwrap());
    }

    #[tokio::test]
    async fn test_incompatible_server_is_not_paired() {
        let server = FakeServer::new();
        server.route("/status", None, status_reply("1.4.5"));
        let session = session(server);
        session.connect_transport().await;

        let err = session
            .pair("wallet.onion", "api-key", &test_credential().secret_key)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::Sync(SyncError::IncompatibleVersion { .. })
        ));
        assert!(!session.is_paired().unwrap());
    }

    #[tokio::test]
    async fn test_repair_replaces_credential_in_use() {
        let server = FakeServer::new();
        server.route("/status", None, status_reply("1.4.9"));
        let session = session(server);
        session.connect_transport().await;
        let secret = test_credential().secret_key.clone();

        session.pair("old.onion", "api-key", &secret).await.unwrap();
        assert_eq!(session.context().unwrap().credential().host, "old.onion");
        let _actions = session.actions().unwrap();

        session.pair("new.onion", "api-key", &secret).await.unwrap();
        let stored = session.with_db(|db| db.load_credential()).unwrap().unwrap();
        assert_eq!(stored.host, "new.onion");
        assert_eq!(session.context().unwrap().credential().host, "new.onion");
    }

    #[tokio::test]
    async fn test_pair_refused_while_running() {
        let server = FakeServer::new();
        script_first_run(&server);
        let session = session(server);
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();
        session.start().await.unwrap();

        let err = session
            .pair("other.onion", "api-key", &test_credential().secret_key)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Sync(SyncError::InvalidInput(_))));
        let stored = session.with_db(|db| db.load_credential()).unwrap().unwrap();
        assert_eq!(stored.host, test_credential().host);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_sync_recovers_from_failed_identity_lookup() {
        let server = FakeServer::new();
        script_first_run(&server);
        server.route("/contacts", Some("identity"), Reply::Unreachable);
        server.push(
            "/contacts",
            Some("identity"),
            Reply::Data(json!({"address": "identity-addr"})),
        );
        server.route("/messages", None, Reply::Data(json!([])));
        let session = session(server.clone());
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();
        session.activate_surface(Surface::Messages);

        session.start().await.unwrap();
        assert!(session.with_db(|db| db.load_identity()).unwrap().is_none());

        for _ in 0..600 {
            if server.calls("/messages") > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert_eq!(
            session.with_db(|db| db.load_identity()).unwrap().as_deref(),
            Some("identity-addr")
        );
        assert!(server.calls("/messages") > 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_requires_pairing() {
        let session = session(FakeServer::new());
        assert!(matches!(session.start().await, Err(WalletError::NotPaired)));
    }

    #[tokio::test]
    async fn test_start_provisions_once() {
        let server = FakeServer::new();
        script_first_run(&server);
        let session = session(server.clone());
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();

        session.start().await.unwrap();
        session.start().await.unwrap();

        assert_eq!(server.calls("/addresses"), 1);
        let pair = session.with_db(|db| db.load_addresses()).unwrap().unwrap();
        assert_eq!(pair.transparent_address, "t1self");
        assert_eq!(
            session.with_db(|db| db.load_identity()).unwrap().as_deref(),
            Some("identity-addr")
        );
        assert!(session.status().transport_ready);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_loop_brings_session_online() {
        let server = FakeServer::new();
        script_first_run(&server);
        server.route("/balances", None, Reply::Data(json!({"transparent": 1, "shielded": 0})));
        server.route("/transactions", None, Reply::Data(json!([])));
        server.route("/book", None, Reply::Data(json!([])));
        server.route("/contacts", None, Reply::Data(json!([])));
        let session = session(server.clone());
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();
        let mut events = session.hub().subscribe();

        session.start().await.unwrap();
        loop {
            if let SessionEvent::StatusChanged { online, .. } = events.recv().await.unwrap() {
                assert!(online);
                break;
            }
        }

        let status = session.status();
        assert!(status.online);
        assert!(status.version_compatible);
        assert_eq!(status.last_height, Some(250));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_surface_activates_once() {
        let server = FakeServer::new();
        script_first_run(&server);
        let session = session(server);
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();
        session.start().await.unwrap();

        assert!(session.activate_surface(Surface::Messages));
        assert!(!session.activate_surface(Surface::Messages));
        {
            let engine = lock(&session.engine);
            let engine = engine.as_ref().unwrap();
            assert!(engine.is_running(LoopKind::Messages));
            assert!(engine.is_running(LoopKind::IdentityBalance));
            assert!(!engine.is_running(LoopKind::Mining));
        }
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_returns_transport_to_idle() {
        let server = FakeServer::new();
        script_first_run(&server);
        let session = session(server);
        session.with_db(|db| db.save_credential(&test_credential())).unwrap();
        session.start().await.unwrap();

        session.shutdown().await;

        let status = session.status();
        assert_eq!(status.transport_progress, 0);
        assert!(!status.transport_ready);
        assert!(lock(&session.engine).is_none());
    }
}
