//! WebSocket link to the gateway
//!
//! One writer task drains the outbound queue into the socket; one reader task
//! feeds every text frame to the [`MessageDispatcher`]. Neither ever waits on
//! negotiation. When the link goes away the reader posts
//! [`BridgeMessage::TransportClosed`].

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeMessage, BridgeSender};
use crate::dispatcher::MessageDispatcher;
use crate::error::{ClientError, Result};

/// Subprotocol the gateway's WebSocket transport expects
pub const JANUS_SUBPROTOCOL: &str = "janus-protocol";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Open the gateway link and start the reader and writer tasks.
    ///
    /// Failing to open the link is a startup error.
    pub async fn connect(
        url: &str,
        dispatcher: MessageDispatcher,
        bridge: BridgeSender,
    ) -> Result<Self> {
        info!("Connecting to gateway: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Startup(format!("invalid gateway url {url}: {e}")))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(JANUS_SUBPROTOCOL),
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ClientError::Startup(e.to_string()))?;
        info!("Connected to gateway");

        let (write, read) = ws_stream.split();
        let (outbound, rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer_task(write, rx));
        let reader = tokio::spawn(reader_task(read, dispatcher, bridge));

        Ok(Self {
            outbound,
            writer,
            reader,
        })
    }

    /// Queue for serialized outbound frames
    pub fn outbound(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// Stop both tasks. Queued frames not yet written are dropped.
    pub fn close(self) {
        self.reader.abort();
        self.writer.abort();
        debug!("Transport closed");
    }
}

/// Sends frames from the outbound queue until every sender is gone
async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = write.send(Message::Text(text)).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
    }

    // Best effort, the link may already be gone
    let _ = write.send(Message::Close(None)).await;
    debug!("Writer task terminated");
}

/// Dispatches inbound text frames until the link closes
async fn reader_task(
    mut read: SplitStream<WsStream>,
    dispatcher: MessageDispatcher,
    bridge: BridgeSender,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match dispatcher.dispatch(&text) {
                Err(e) if !e.is_recoverable() => break e.to_string(),
                // Logged by the dispatcher
                _ => {}
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Gateway closed the connection");
                break "closed by gateway".to_string();
            }
            Some(Ok(other)) => debug!("Ignoring non-text frame ({} bytes)", other.len()),
            Some(Err(e)) => {
                warn!("WebSocket error: {}", e);
                break ClientError::from(e).to_string();
            }
            None => break "connection ended".to_string(),
        }
    };

    bridge.post(BridgeMessage::TransportClosed { reason });
    debug!("Reader task terminated");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use super::*;
    use crate::bridge::bridge;
    use crate::model::TxContext;
    use crate::transaction::{ResponseKind, TransactionRegistry};

    #[tokio::test]
    async fn test_round_trip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let gateway = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(
                stream,
                |req: &Request, mut resp: Response| {
                    let protocol = req.headers().get("Sec-WebSocket-Protocol").cloned();
                    assert_eq!(protocol, Some(HeaderValue::from_static(JANUS_SUBPROTOCOL)));
                    resp.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(JANUS_SUBPROTOCOL),
                    );
                    Ok::<_, ErrorResponse>(resp)
                },
            )
            .await
            .unwrap();

            let Some(Ok(Message::Text(text))) = ws.next().await else {
                panic!("expected a text frame");
            };
            let request: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(request["janus"], "create");

            let reply = json!({
                "janus": "success",
                "transaction": request["transaction"],
                "data": { "id": 7 }
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let transactions = Arc::new(TransactionRegistry::new(Duration::from_secs(10)));
        transactions.begin("abc", TxContext::CreateSession);
        let (tx, mut rx) = bridge();
        let dispatcher = MessageDispatcher::new(Arc::clone(&transactions), tx.clone());

        let transport = Transport::connect(&format!("ws://{addr}"), dispatcher, tx)
            .await
            .unwrap();
        transport
            .outbound()
            .send(json!({ "janus": "create", "transaction": "abc" }).to_string())
            .unwrap();

        match rx.recv().await {
            Some(BridgeMessage::Resolved(resolved)) => {
                assert_eq!(resolved.kind, ResponseKind::Success);
                assert_eq!(resolved.frame.data_id(), Some(7));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(matches!(
            rx.recv().await,
            Some(BridgeMessage::TransportClosed { .. })
        ));

        gateway.await.unwrap();
        transport.close();
    }

    #[tokio::test]
    async fn test_connect_failure_is_startup_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transactions = Arc::new(TransactionRegistry::new(Duration::from_secs(10)));
        let (tx, _rx) = bridge();
        let dispatcher = MessageDispatcher::new(transactions, tx.clone());

        let result = Transport::connect(&format!("ws://{addr}"), dispatcher, tx).await;
        assert!(matches!(result, Err(ClientError::Startup(_))));
    }
}
