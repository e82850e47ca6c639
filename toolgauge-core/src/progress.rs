//! Progress reporting from the engine to whatever transport hosts it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::EvaluationResult;

/// Messages emitted while an evaluation runs. `Result` and `Error` are
/// terminal and emitted at most once; `Log` and `KeepAlive` repeat freely.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressMessage {
    Log { message: String },
    KeepAlive,
    Result { result: EvaluationResult },
    Error { message: String },
}

/// Sending half of the progress stream.
///
/// Terminal delivery consumes the channel, so a second terminal message is
/// unrepresentable, and dropping the channel ends the stream for the
/// receiver on every path.
pub struct ProgressChannel {
    sender: mpsc::UnboundedSender<ProgressMessage>,
    keepalive: Option<JoinHandle<()>>,
}

impl ProgressChannel {
    /// Creates a channel and its receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                keepalive: None,
            },
            receiver,
        )
    }

    /// Creates a channel that emits keep-alive ticks during idle periods so
    /// long remote calls do not starve the transport.
    pub fn with_keepalive(
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ProgressMessage>) {
        let (mut channel, receiver) = Self::new();
        let sender = channel.sender.clone();
        channel.keepalive = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sender.send(ProgressMessage::KeepAlive).is_err() {
                    break;
                }
            }
        }));
        (channel, receiver)
    }

    /// Emits a log line; safe to call at any point before terminal delivery.
    pub fn log(&self, message: impl Into<String>) {
        let _ = self.sender.send(ProgressMessage::Log {
            message: message.into(),
        });
    }

    /// Delivers the terminal result and closes the stream.
    pub fn deliver_result(self, result: EvaluationResult) {
        let _ = self.sender.send(ProgressMessage::Result { result });
    }

    /// Delivers the terminal error and closes the stream.
    pub fn deliver_error(self, message: impl Into<String>) {
        let _ = self.sender.send(ProgressMessage::Error {
            message: message.into(),
        });
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}
