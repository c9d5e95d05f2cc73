use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parkbeat_relay_types::RelayResult;
use parkbeat_relay_types::errors::RelayError;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// One live connection as a pair of text-frame channels. Dropping the
/// inbound sender on the wire side is how the manager learns the transport
/// is gone.
pub struct TransportPair {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// How the manager obtains connections; reconnects call this repeatedly.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> RelayResult<TransportPair>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn connect(&self) -> RelayResult<TransportPair> {
        (**self).connect().await
    }
}

/// WebSocket connector over tokio-tungstenite.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> RelayResult<TransportPair> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::TransportError(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<String>(64);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Text(text) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(TransportPair {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// The wire side of one in-process connection, for tests and local harnesses.
pub struct TestRemote {
    pub from_client: mpsc::Receiver<String>,
    pub to_client: mpsc::Sender<String>,
}

/// In-process connector twin of [`WsConnector`]. Each successful `connect`
/// hands the test side a [`TestRemote`]; failures can be scripted to exercise
/// the reconnect path.
pub struct MemoryConnector {
    failures: Mutex<VecDeque<()>>,
    remotes: mpsc::UnboundedSender<TestRemote>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TestRemote>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        (
            Self {
                failures: Mutex::new(VecDeque::new()),
                remotes,
            },
            remote_rx,
        )
    }

    /// The next `count` connect calls fail before one succeeds.
    pub async fn fail_next(&self, count: usize) {
        let mut failures = self.failures.lock().await;
        for _ in 0..count {
            failures.push_back(());
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> RelayResult<TransportPair> {
        if self.failures.lock().await.pop_front().is_some() {
            return Err(RelayError::TransportError("scripted connect failure".into()));
        }
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        self.remotes
            .send(TestRemote {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| RelayError::TransportError("remote receiver dropped".into()))?;
        Ok(TransportPair {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
