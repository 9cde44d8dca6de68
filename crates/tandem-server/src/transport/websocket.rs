//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, completes the WebSocket handshake and hands the
//! stream to the server. Frames are JSON text; binary frames are ignored.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tandem_core::{TandemError, TandemResult};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

pub type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
pub type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> TandemResult<mpsc::Receiver<WebSocketConnection>> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TandemError::Transport(format!("WS bind failed: {e}")))?;

    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

/// Send one text frame.
pub async fn ws_send_text(sink: &mut WsSink, text: String) -> TandemResult<()> {
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| TandemError::Transport(format!("WS send failed: {e}")))
}

/// Send a close frame, ignoring failures (the peer may already be gone).
pub async fn ws_close(sink: &mut WsSink) {
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// Receive the next text frame.
///
/// Returns `None` once the peer closes. Binary frames are skipped; text
/// frames over `max_frame_bytes` are an error.
pub async fn ws_recv_text(
    stream: &mut WsStream,
    max_frame_bytes: usize,
) -> TandemResult<Option<String>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.len() > max_frame_bytes {
                    return Err(TandemError::InvalidInput(format!(
                        "WS frame too large: {} bytes (max {})",
                        text.len(),
                        max_frame_bytes
                    )));
                }
                return Ok(Some(text.to_string()));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(TandemError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}
