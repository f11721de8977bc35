//! WebSocket transport for the live tutor.
//!
//! [`open`] performs the handshake under a timeout. [`Link`] owns the two
//! per-connection tasks: a receive loop that forwards text frames in arrival
//! order and a send loop that drains the outbound queue in submission order.
//! Both report back to the owner through a channel, tagged with the connection
//! generation so the owner can discard events from superseded connections.

use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError, UrlError};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, Result, TransportErrorKind};

/// An open client WebSocket.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket to `url`, giving up after `timeout`.
///
/// # Errors
///
/// Returns `ClientError::Transport` classified by [`classify`], or with kind
/// `Timeout` if the handshake does not finish in time.
pub async fn open(url: &Url, timeout: Duration) -> Result<WsStream> {
    debug!(url = %url, timeout_ms = timeout.as_millis(), "Opening WebSocket");

    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, response))) => {
            debug!(status = %response.status(), "WebSocket handshake complete");
            Ok(stream)
        }
        Ok(Err(e)) => Err(transport_error(&e)),
        Err(_) => Err(ClientError::transport(
            TransportErrorKind::Timeout,
            format!("handshake with {url} did not complete within {timeout:?}"),
        )),
    }
}

/// Converts a WebSocket error into a classified client error.
#[must_use]
pub fn transport_error(error: &WsError) -> ClientError {
    ClientError::transport(classify(error), error.to_string())
}

/// Maps a WebSocket error onto the transport error taxonomy.
#[must_use]
pub fn classify(error: &WsError) -> TransportErrorKind {
    match error {
        WsError::Io(e) => classify_io(e),
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportErrorKind::ConnectionLost
        }
        WsError::Url(UrlError::UnableToConnect(_)) => TransportErrorKind::HostUnreachable,
        WsError::Url(_) => TransportErrorKind::InvalidUrl,
        WsError::Http(_) | WsError::HttpFormat(_) | WsError::Tls(_) => {
            TransportErrorKind::Handshake
        }
        _ => TransportErrorKind::Protocol,
    }
}

fn classify_io(error: &io::Error) -> TransportErrorKind {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => TransportErrorKind::HostUnreachable,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => TransportErrorKind::ConnectionLost,
        io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
        io::ErrorKind::AddrNotAvailable => TransportErrorKind::NoConnectivity,
        _ => classify_io_message(&error.to_string()),
    }
}

/// Resolver and routing failures surface as uncategorized I/O errors.
fn classify_io_message(message: &str) -> TransportErrorKind {
    let message = message.to_ascii_lowercase();
    if ["lookup", "resolve", "name or service not known", "nodename nor servname", "no such host"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        TransportErrorKind::DnsFailure
    } else if message.contains("network is unreachable") || message.contains("no route to host") {
        TransportErrorKind::NoConnectivity
    } else if message.contains("host is unreachable") {
        TransportErrorKind::HostUnreachable
    } else {
        TransportErrorKind::ConnectionLost
    }
}

// ============================================================================
// Link
// ============================================================================

/// Something for the send loop to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded client message.
    Text(String),
    /// A liveness ping.
    Ping,
}

/// What the per-connection tasks report to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Frame {
        /// Connection generation.
        generation: u64,
        /// Frame contents.
        text: String,
    },
    /// The connection ended.
    Closed {
        /// Connection generation.
        generation: u64,
        /// `true` if the peer closed with a normal close code.
        normal: bool,
        /// The failure, for abnormal closes.
        error: Option<ClientError>,
    },
}

/// The receive and send loops of one open connection.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Splits `stream` and spawns its receive and send loops.
    ///
    /// Each loop reports at most one `Closed` event before exiting.
    pub fn spawn<E>(stream: WsStream, generation: u64, events: mpsc::UnboundedSender<E>) -> Self
    where
        E: From<LinkEvent> + Send + 'static,
    {
        let (sink, source) = stream.split();
        let (outbound, queue) = mpsc::unbounded_channel();

        let reader = tokio::spawn(receive_loop(source, generation, events.clone()));
        let writer = tokio::spawn(send_loop(sink, queue, generation, events));

        Self {
            outbound,
            reader,
            writer,
        }
    }

    /// Queues an item for the send loop. Returns `false` if the loop has exited.
    pub fn send(&self, item: Outbound) -> bool {
        self.outbound.send(item).is_ok()
    }

    /// Closes the connection gracefully.
    ///
    /// The send loop flushes what is queued, sends a close frame, and exits on its own.
    pub fn close(self) {
        self.reader.abort();
        drop(self.outbound);
    }

    /// Stops both loops immediately.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn receive_loop<S, E>(mut source: S, generation: u64, events: mpsc::UnboundedSender<E>)
where
    S: futures::Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    E: From<LinkEvent>,
{
    let closed = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                if events.send(LinkEvent::Frame { generation, text }.into()).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if events.send(LinkEvent::Frame { generation, text }.into()).is_err() {
                        return;
                    }
                }
                Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                let normal = frame
                    .as_ref()
                    .is_some_and(|f| matches!(f.code, CloseCode::Normal | CloseCode::Away));
                debug!(?frame, normal, "Peer closed the connection");
                let error = (!normal).then(|| {
                    let detail = frame.map_or_else(
                        || "peer closed without a status code".to_string(),
                        |f| format!("peer closed with code {}: {}", u16::from(f.code), f.reason),
                    );
                    ClientError::transport(TransportErrorKind::ConnectionLost, detail)
                });
                break LinkEvent::Closed {
                    generation,
                    normal,
                    error,
                };
            }
            // Ping, Pong, and raw frames are handled by the protocol layer.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket receive failed");
                break LinkEvent::Closed {
                    generation,
                    normal: false,
                    error: Some(transport_error(&e)),
                };
            }
            None => {
                break LinkEvent::Closed {
                    generation,
                    normal: false,
                    error: Some(ClientError::transport(
                        TransportErrorKind::ConnectionLost,
                        "connection ended without a close frame",
                    )),
                };
            }
        }
    };

    let _ = events.send(closed.into());
}

async fn send_loop<K, E>(
    mut sink: K,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    generation: u64,
    events: mpsc::UnboundedSender<E>,
) where
    K: futures::Sink<Message, Error = WsError> + Unpin,
    E: From<LinkEvent>,
{
    while let Some(item) = queue.recv().await {
        let message = match item {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping => Message::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "WebSocket send failed");
            let closed = LinkEvent::Closed {
                generation,
                normal: false,
                error: Some(transport_error(&e)),
            };
            let _ = events.send(closed.into());
            return;
        }
    }

    // Owner dropped the queue: say goodbye.
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close handshake did not complete");
    }
}

// ============================================================================
// Tests
// ============================================================================
