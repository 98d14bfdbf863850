//! Long-lived subscription to the install progress channel.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use shared::protocol::InstallProgressEvent;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::gateway::GatewayError;

/// Raw frames as delivered by the channel transport, one JSON record each.
pub type FrameStream = BoxStream<'static, Result<String, GatewayError>>;

#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn open(&self, channel: &str) -> Result<FrameStream, GatewayError>;
}

pub struct SubscriptionManager {
    source: Arc<dyn ProgressSource>,
    channel: String,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn ProgressSource>, channel: impl Into<String>) -> Self {
        Self {
            source,
            channel: channel.into(),
            next_id: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscriptions neither unsubscribed nor closed by the channel.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Invokes `handler` once per decoded event, in receipt order. Frames that
    /// fail to decode are skipped and the subscription stays open.
    pub async fn subscribe<F>(&self, handler: F) -> Result<SubscriptionHandle, GatewayError>
    where
        F: FnMut(InstallProgressEvent) + Send + 'static,
    {
        self.subscribe_until_closed(handler, |_| {}).await
    }

    /// Like [`subscribe`](Self::subscribe), and additionally calls `on_closed`
    /// once if the channel fails or the backend ends it. Not called after an
    /// explicit unsubscribe.
    pub async fn subscribe_until_closed<F, C>(
        &self,
        mut handler: F,
        on_closed: C,
    ) -> Result<SubscriptionHandle, GatewayError>
    where
        F: FnMut(InstallProgressEvent) + Send + 'static,
        C: FnOnce(GatewayError) + Send + 'static,
    {
        let mut frames = self.source.open(&self.channel).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let live = Arc::new(AtomicBool::new(true));
        let delivery = Arc::new(Mutex::new(()));
        let task_live = Arc::clone(&live);
        let task_delivery = Arc::clone(&delivery);
        let task_active = Arc::clone(&self.active);
        let channel = self.channel.clone();

        // Counted before the task can observe a closed channel and decrement.
        self.active.fetch_add(1, Ordering::AcqRel);

        let task = tokio::spawn(async move {
            let failure = loop {
                let Some(frame) = frames.next().await else {
                    break GatewayError::Unreachable(format!(
                        "progress channel `{channel}` closed by the backend"
                    ));
                };
                match frame {
                    Ok(raw) => match decode_event(&raw) {
                        Ok(event) => {
                            let _gate =
                                task_delivery.lock().unwrap_or_else(PoisonError::into_inner);
                            if !task_live.load(Ordering::Acquire) {
                                return;
                            }
                            handler(event);
                        }
                        Err(reason) => warn!(
                            channel = %channel,
                            subscription = id,
                            %reason,
                            "skipping malformed progress event"
                        ),
                    },
                    Err(err) => break err,
                }
            };

            if task_live.swap(false, Ordering::AcqRel) {
                task_active.fetch_sub(1, Ordering::AcqRel);
                warn!(channel = %channel, subscription = id, error = %failure, "progress channel lost");
                on_closed(failure);
            }
        });

        info!(channel = %self.channel, subscription = id, "subscribed to progress channel");

        Ok(SubscriptionHandle {
            id,
            channel: self.channel.clone(),
            live,
            delivery,
            task: task.abort_handle(),
            active: Arc::clone(&self.active),
        })
    }
}

fn decode_event(raw: &str) -> Result<InstallProgressEvent, String> {
    let event: InstallProgressEvent = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    if event.distro_id.as_str().is_empty() || event.version.is_empty() {
        return Err("progress event without distro_id or version".to_string());
    }
    Ok(event)
}

/// Owner of one subscription. Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
    live: Arc<AtomicBool>,
    /// Held while the handler runs; unsubscribe waits on it.
    delivery: Arc<Mutex<()>>,
    task: AbortHandle,
    active: Arc<AtomicUsize>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stops delivery. Once this returns the handler is not running and will
    /// not be invoked again, on any runtime flavor. Returns `true` only for the
    /// call that tore the subscription down; later calls are no-ops, as are
    /// calls after the channel closed on its own. Must not be called from
    /// inside the handler.
    pub fn unsubscribe(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        drop(self.delivery.lock().unwrap_or_else(PoisonError::into_inner));
        self.task.abort();
        self.active.fetch_sub(1, Ordering::AcqRel);
        debug!(channel = %self.channel, subscription = self.id, "unsubscribed from progress channel");
        true
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
