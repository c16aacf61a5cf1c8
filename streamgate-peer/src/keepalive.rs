//! Application-level keepalive over the data channel
//!
//! The remote engine does not notice a vanished peer from transport
//! teardown alone, so an open channel carries a `ping` every interval.
//! The task stops on cancellation, on the first failed send, and when the
//! handle is dropped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;

use crate::error::{PeerError, Result};

pub const KEEPALIVE_MESSAGE: &str = "ping";

/// Anything a keepalive can be sent over
#[async_trait]
pub trait KeepaliveChannel: Send + Sync {
    fn label(&self) -> String;

    async fn send_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
impl KeepaliveChannel for RTCDataChannel {
    fn label(&self) -> String {
        RTCDataChannel::label(self).to_string()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        RTCDataChannel::send_text(self, text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| PeerError::Channel(e.to_string()))
    }
}

/// Running keepalive task
pub struct Keepalive {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Keepalive {
    /// Start sending pings; the first one goes out after one full interval
    pub fn start(
        channel: Arc<dyn KeepaliveChannel>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let label = channel.label();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = task_token.cancelled() => {
                        debug!(channel = %label, "Keepalive cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = channel.send_text(KEEPALIVE_MESSAGE).await {
                            warn!(channel = %label, error = %e, "Keepalive send failed, stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
