use std::sync::Arc;
use tokio::sync::mpsc;
use super::types::UploadEvent;

/// Receives upload events on the manager loop. Must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &UploadEvent);
}

impl<F> EventListener for F
where
    F: Fn(&UploadEvent) + Send + Sync,
{
    fn on_event(&self, event: &UploadEvent) {
        self(event)
    }
}

/// Forwards events into a channel
#[derive(Debug, Clone)]
pub struct ChannelListener(mpsc::UnboundedSender<UploadEvent>);

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &UploadEvent) {
        let _ = self.0.send(event.clone());
    }
}

/// Holds the single attached listener
#[derive(Default)]
pub struct EventEmitter {
    listener: Option<Arc<dyn EventListener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn EventListener>>) {
        self.listener = listener;
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns false when nobody is listening
    pub fn emit(&self, event: &UploadEvent) -> bool {
        match &self.listener {
            Some(listener) => {
                listener.on_event(event);
                true
            }
            None => false,
        }
    }
}
