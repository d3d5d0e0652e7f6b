use log::info;
use tokio::sync::mpsc;

/// Receives user-facing progress and failure text ("Sending message...",
/// "Error: ...").
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Writes status lines to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn report(&self, message: &str) {
        info!("status: {}", message);
    }
}

/// Forwards status lines to a front end over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelStatusSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn report(&self, message: &str) {
        // A closed receiver means nobody displays status anymore.
        let _ = self.tx.send(message.to_string());
    }
}
