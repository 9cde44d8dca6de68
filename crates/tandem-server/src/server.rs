//! Core server: accepts connections and dispatches their events.
//!
//! Owns the connection hub, the session registry and the connection rate
//! limiter. Each WebSocket runs in its own task; its events are decoded
//! and dispatched to the registry, whose replies flow back through the
//! hub's per-connection queue.

use crate::auth::ConnectionRateLimiter;
use crate::config::ServerConfig;
use crate::session::{liveness, SessionRegistry};
use crate::transport::websocket::{self, WsSink, WsStream};
use crate::transport::{ConnectionHub, Transport};
use futures_util::{FutureExt, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::messages::{Notice, SessionRef};
use tandem_core::{
    decode_event, encode_event, ClientEvent, ConnectionId, ServerEvent, TandemError, TandemResult,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long open sockets get to flush their last events on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The tandem server instance.
pub struct TandemServer {
    config: ServerConfig,
    /// Per-connection queues and session channels.
    hub: Arc<ConnectionHub>,
    registry: Arc<SessionRegistry>,
    rate_limiter: Arc<Mutex<ConnectionRateLimiter>>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl TandemServer {
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(ConnectionHub::default());
        let registry = Arc::new(SessionRegistry::new(
            config.registry_config(),
            hub.clone(),
        ));
        let rate_limiter = ConnectionRateLimiter::new(config.connections_per_window, config.rate_window);

        Self {
            config,
            hub,
            registry,
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Accept connections until `shutdown` resolves, then disconnect
    /// everyone and clear all session state.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> TandemResult<()> {
        let server = Arc::new(self);
        let mut ws_rx = websocket::start_listener(server.config.listen_addr).await?;

        let liveness_task = liveness::spawn_sweep(
            server.registry.clone(),
            server.config.liveness_sweep_interval,
        );
        let housekeeping_task = server.spawn_housekeeping();

        info!(
            addr = %server.config.listen_addr,
            join_policy = ?server.config.join_policy,
            max_clients = server.config.max_clients,
            grace_secs = server.config.grace_period.as_secs(),
            "tandem-server ready"
        );

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
                Some(ws_conn) = ws_rx.recv() => {
                    let srv = server.clone();
                    connections.spawn(async move {
                        if let Err(e) = srv.handle_websocket(ws_conn).await {
                            warn!(error = %e, "WebSocket connection error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        liveness_task.abort();
        housekeeping_task.abort();

        info!(connections = server.hub.count(), "disconnecting clients");
        server.registry.shutdown().await;
        server.hub.close_all();
        let _ = server.shutdown_tx.send(());

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "connections did not close in time, aborting");
            connections.abort_all();
        }

        info!("tandem-server stopped");
        Ok(())
    }

    /// Session age sweep and rate-limiter GC.
    fn spawn_housekeeping(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(server.config.session_sweep_interval);
            loop {
                interval.tick().await;

                let expired = server.registry.sweep_expired().await;
                if !expired.is_empty() {
                    info!(count = expired.len(), "removed expired sessions");
                }

                server.rate_limiter.lock().await.gc(Instant::now());

                let status = server.registry.status().await;
                debug!(
                    sessions = status.active_sessions,
                    connections = server.hub.count(),
                    "housekeeping pass"
                );
            }
        })
    }

    async fn handle_websocket(
        self: Arc<Self>,
        conn: websocket::WebSocketConnection,
    ) -> TandemResult<()> {
        let remote = conn.remote_addr;
        let (mut sink, mut stream) = conn.ws_stream.split();

        let admitted = self
            .rate_limiter
            .lock()
            .await
            .check_and_record(remote.ip(), Instant::now());
        if !admitted {
            warn!(remote = %remote, "connection rate limited");
            let refusal = ServerEvent::RateLimited(Notice::new(
                "too many connection attempts, try again later",
            ));
            if let Ok(text) = encode_event(&refusal) {
                let _ = websocket::ws_send_text(&mut sink, text).await;
            }
            websocket::ws_close(&mut sink).await;
            return Err(TandemError::RateLimited);
        }

        let (conn_id, outbound) = self.hub.register();
        self.registry.connect(&conn_id).await;
        info!(conn_id = %conn_id, remote = %remote, "connection opened");

        let result = self
            .connection_loop(&conn_id, &mut sink, &mut stream, outbound)
            .await;

        self.hub.unregister(&conn_id);
        self.registry.disconnect(&conn_id).await;
        info!(conn_id = %conn_id, remote = %remote, "connection closed");
        result
    }

    async fn connection_loop(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        sink: &mut WsSink,
        stream: &mut WsStream,
        mut outbound: mpsc::Receiver<ServerEvent>,
    ) -> TandemResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                biased;

                event = outbound.recv() => match event {
                    Some(event) => deliver(sink, conn_id, &event).await?,
                    None => {
                        // The hub dropped our queue: forced close.
                        debug!(conn_id = %conn_id, "connection closed by server");
                        websocket::ws_close(sink).await;
                        break;
                    }
                },

                _ = shutdown_rx.recv() => {
                    while let Ok(event) = outbound.try_recv() {
                        deliver(sink, conn_id, &event).await?;
                    }
                    websocket::ws_close(sink).await;
                    break;
                }

                frame = websocket::ws_recv_text(stream, self.config.max_frame_bytes) => match frame {
                    Ok(Some(text)) => self.handle_frame(conn_id, &text).await,
                    Ok(None) => {
                        debug!(conn_id = %conn_id, "peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "dropping connection");
                        websocket::ws_close(sink).await;
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Decode and dispatch one inbound frame. Failures are reported to the
    /// sender; the connection stays open.
    async fn handle_frame(self: &Arc<Self>, conn_id: &ConnectionId, text: &str) {
        let event = match decode_event(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "undecodable frame");
                self.hub
                    .send(conn_id, ServerEvent::Error(Notice::new(e.to_string())));
                return;
            }
        };

        let is_join = matches!(event, ClientEvent::Join(_));
        match AssertUnwindSafe(self.dispatch(conn_id, event))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "event refused");
                self.hub.send(conn_id, refusal(&e, is_join));
            }
            Err(_) => {
                error!(conn_id = %conn_id, "event handler panicked");
                self.hub
                    .send(conn_id, ServerEvent::Error(Notice::new("internal error")));
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, conn_id: &ConnectionId, event: ClientEvent) -> TandemResult<()> {
        if let Some((kind, payload)) = event.as_command() {
            self.registry
                .relay_command(conn_id, kind, payload.clone())
                .await?;
            return Ok(());
        }

        match event {
            ClientEvent::Join(request) => {
                self.registry.join(conn_id, &request).await?;
            }
            ClientEvent::Heartbeat(_) => self.registry.heartbeat(conn_id).await,
            ClientEvent::AudioUpload(payload) => {
                self.registry.upload_audio(conn_id, payload).await?;
            }
            ClientEvent::MicStatus(status) => {
                self.registry.mic_status(conn_id, status.is_muted).await?;
            }
            ClientEvent::MuteClient(target) => {
                self.registry.mute_client(conn_id, &target.client_id).await?;
            }
            ClientEvent::DisconnectClient(target) => {
                self.registry
                    .disconnect_client(conn_id, &target.client_id)
                    .await?;
            }
            ClientEvent::ClientReady(_) => self.registry.mark_ready(conn_id).await?,
            ClientEvent::ClientNotReady(_) => self.registry.mark_not_ready(conn_id).await?,
            ClientEvent::Status(_) => {
                let report = self.registry.status().await;
                self.hub.send(conn_id, ServerEvent::Status(report));
            }
            ClientEvent::PlayCommand(_)
            | ClientEvent::PauseCommand(_)
            | ClientEvent::SeekCommand(_)
            | ClientEvent::VolumeCommand(_)
            | ClientEvent::SyncAllCommand(_) => {}
        }
        Ok(())
    }
}

/// Encode and write one outbound event. An event that fails to encode is
/// logged and skipped.
async fn deliver(sink: &mut WsSink, conn_id: &ConnectionId, event: &ServerEvent) -> TandemResult<()> {
    match encode_event(event) {
        Ok(text) => websocket::ws_send_text(sink, text).await,
        Err(e) => {
            error!(conn_id = %conn_id, event = event.name(), error = %e, "failed to encode event");
            Ok(())
        }
    }
}

/// The outbound event that reports a refused request.
fn refusal(err: &TandemError, is_join: bool) -> ServerEvent {
    match err {
        TandemError::SessionNotFound(code) => ServerEvent::SessionNotFound(SessionRef {
            session_code: code.clone(),
        }),
        TandemError::SessionFull(code) => ServerEvent::SessionFull(SessionRef {
            session_code: code.clone(),
        }),
        TandemError::InvalidInput(_) if is_join => {
            ServerEvent::JoinError(Notice::new(err.to_string()))
        }
        TandemError::PayloadTooLarge { .. } | TandemError::PayloadWrongType(_) => {
            ServerEvent::AudioUploadError(Notice::new(err.to_string()))
        }
        TandemError::RateLimited => ServerEvent::RateLimited(Notice::new(err.to_string())),
        _ => ServerEvent::Error(Notice::new(err.to_string())),
    }
}
