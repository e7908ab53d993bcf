//! Accepts connections and wires the shared services together.
//! Mirrors `BrokerRuntime::new`'s tiered startup (spawn the session
//! registry and doc engine first, then hand both into the
//! per-connection router context) and its single `shutdown` entry
//! point.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use noted_proto::SessionId;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::crypto::ServerKeyPair;
use crate::error::Result;
use crate::external::{CalendarAdapter, Exporter, OcrEngine, Summarizer, Unconfigured};
use crate::router::RouterContext;
use crate::services::doc_engine::DocEngineService;
use crate::services::sessions::SessionService;
use crate::session::handle_connection;
use crate::store::Store;

/// Everything needed to bring a server instance up.
pub struct SupervisorConfig {
    pub bind_port: u16,
    pub rsa_key_path: PathBuf,
    pub pepper: Vec<u8>,
}

/// Owns the listening socket and the services every connection shares.
pub struct Supervisor {
    listener: TcpListener,
    server_key: Arc<ServerKeyPair>,
    ctx: Arc<RouterContext>,
    next_session_id: AtomicU64,
}

impl Supervisor {
    /// Binds the listening socket and spawns the session registry and
    /// doc engine actors.
    pub async fn bind(config: SupervisorConfig, store: Arc<dyn Store>) -> Result<Self> {
        Self::bind_with_adapters(
            config,
            store,
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
            Arc::new(Unconfigured),
        )
        .await
    }

    /// Same as [`Self::bind`], but with real external adapters plugged
    /// into the seams `noted-core` only specifies as traits.
    pub async fn bind_with_adapters(
        config: SupervisorConfig,
        store: Arc<dyn Store>,
        ocr: Arc<dyn OcrEngine>,
        summarizer: Arc<dyn Summarizer>,
        exporter: Arc<dyn Exporter>,
        gcal: Arc<dyn CalendarAdapter>,
    ) -> Result<Self> {
        let server_key = Arc::new(ServerKeyPair::load_or_create(&config.rsa_key_path)?);
        let sessions = SessionService::start();
        let doc_engine = DocEngineService::start(store.clone(), sessions.clone());

        let ctx = Arc::new(RouterContext::new(
            store,
            doc_engine,
            sessions,
            config.pepper,
            ocr,
            summarizer,
            exporter,
            gcal,
        ));

        let listener = TcpListener::bind(("0.0.0.0", config.bind_port)).await?;
        info!(port = config.bind_port, "supervisor listening");

        Ok(Self {
            listener,
            server_key,
            ctx,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Runs the accept loop until the listener errors or the process
    /// is signaled to shut down.
    pub async fn run(&self) -> Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
            let server_key = self.server_key.clone();
            let ctx = self.ctx.clone();
            info!(?session_id, %peer, "accepted connection");

            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, server_key, ctx, session_id).await {
                    error!(?session_id, %err, "session ended with error");
                }
            });
        }
    }
}
