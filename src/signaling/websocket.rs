//! WebSocket client for a relay speaking the JSON wire form

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::signaling::{Inbox, SignalingChannel, SignalingMessage};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type SharedInbox = Arc<Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>>;

pub struct WsSignaling {
    url: String,
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbox: SharedInbox,
}

impl WsSignaling {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: Mutex::new(None),
            reader: Mutex::new(None),
            inbox: Arc::new(Mutex::new(None)),
        }
    }

    /// Client for `config.signaling_url`
    pub fn from_config(config: &CallConfig) -> Result<Self> {
        match config.signaling_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Self::new(url)),
            _ => Err(CallError::Config("signaling_url is not set".into())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn deliver(inbox: &SharedInbox, message: SignalingMessage) {
    let guard = inbox.lock().await;
    match guard.as_ref() {
        Some(tx) if tx.send(message.clone()).is_ok() => {}
        _ => debug!("No subscriber for {}, dropped", message.event_name()),
    }
}

#[async_trait]
impl SignalingChannel for WsSignaling {
    async fn connect(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        if sink.is_some() {
            return Ok(());
        }

        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| CallError::Signaling(format!("Failed to connect to {}: {}", self.url, e)))?;
        info!("Connected to signaling server {}", self.url);

        let (write, mut read) = stream.split();
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                        Ok(message) => deliver(&inbox, message).await,
                        Err(e) => warn!("Malformed signaling frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Signaling server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                }
            }
        });

        *sink = Some(write);
        *self.reader.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("Signaling close failed: {}", e);
            }
            info!("Disconnected from signaling server {}", self.url);
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    async fn emit(&self, message: SignalingMessage) -> Result<()> {
        let text = message.to_json()?;
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| CallError::Signaling("not connected".into()))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| CallError::Signaling(format!("Failed to send {}: {}", message.event_name(), e)))
    }

    async fn subscribe(&self) -> Result<Inbox> {
        let mut inbox = self.inbox.lock().await;
        if inbox.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(CallError::Signaling("already subscribed".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *inbox = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        *self.inbox.lock().await = None;
    }
}
