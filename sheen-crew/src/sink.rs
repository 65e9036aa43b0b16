//! Destinations for emitted messages.

use serde_json::Value;
use tokio::sync::mpsc;

/// Receives every message a dispatch emits, in order.
pub trait EmissionSink: Send {
    fn deliver(&mut self, message: &Value);
}

impl EmissionSink for Vec<Value> {
    fn deliver(&mut self, message: &Value) {
        self.push(message.clone());
    }
}

/// Forwards emissions to a channel, typically a transport task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EmissionSink for ChannelSink {
    fn deliver(&mut self, message: &Value) {
        if self.tx.send(message.clone()).is_err() {
            tracing::debug!("emission receiver closed, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vec_sink() {
        let mut sink = Vec::new();
        sink.deliver(&json!(1));
        sink.deliver(&json!({"did": "x"}));
        assert_eq!(sink, vec![json!(1), json!({"did": "x"})]);
    }

    #[test]
    fn test_channel_sink() {
        let (mut sink, mut rx) = ChannelSink::channel();
        sink.deliver(&json!("hello"));
        assert_eq!(rx.try_recv().unwrap(), json!("hello"));

        drop(rx);
        sink.deliver(&json!("nobody listening"));
    }
}
