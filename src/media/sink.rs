use std::sync::Arc;

use tokio::sync::watch;

/// Video surface handle the rendering layer binds to
///
/// Holds the id of the stream currently shown, or `None` when blank.
#[derive(Clone)]
pub struct VideoSink {
    name: &'static str,
    tx: Arc<watch::Sender<Option<String>>>,
}

impl VideoSink {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bind(&self, stream_id: impl Into<String>) {
        let stream_id = stream_id.into();
        tracing::debug!("{} sink bound to stream {}", self.name, stream_id);
        self.tx.send_replace(Some(stream_id));
    }

    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::debug!("{} sink cleared", self.name);
        }
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for VideoSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSink")
            .field("name", &self.name)
            .field("current", &self.current())
            .finish()
    }
}
