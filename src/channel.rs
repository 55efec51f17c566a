use crate::protocol::{OutboundMessage, OutputEvent};
use tokio::sync::mpsc;
use tracing::debug;

/// One-way sender of worker messages to the host.
///
/// Sends never block and never fail from the caller's point of view: once the
/// host side is gone, messages are dropped.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutputChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.send(message) {
            debug!("host gone, dropping {:?}", e.0);
        }
    }

    pub fn ready(&self) {
        self.emit(OutboundMessage::Ready);
    }

    pub fn output(&self, event: OutputEvent) {
        self.emit(OutboundMessage::Output(event));
    }

    pub fn done(&self) {
        self.emit(OutboundMessage::Done);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(OutboundMessage::error(message));
    }
}
