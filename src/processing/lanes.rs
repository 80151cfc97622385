//! Per-sender processing lanes
//!
//! Each sender gets its own queue and worker task, so one sender's messages are
//! handled strictly in arrival order while different senders proceed in
//! parallel. A worker retires after sitting idle; the emptiness check and the
//! map removal happen under the same lock that submitters enqueue under, so no
//! message is stranded in a retiring lane.

use super::pipeline::MessagePipeline;
use crate::protocol::IncomingMessage;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;

type LaneMap = HashMap<String, mpsc::UnboundedSender<IncomingMessage>>;

pub struct SenderLanes<T: Transport> {
    pipeline: Arc<MessagePipeline<T>>,
    lanes: Arc<Mutex<LaneMap>>,
    tracker: TaskTracker,
    idle_timeout: Duration,
}

fn lock(lanes: &Mutex<LaneMap>) -> MutexGuard<'_, LaneMap> {
    lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> SenderLanes<T>
where
    T: Transport + 'static,
{
    pub fn new(pipeline: Arc<MessagePipeline<T>>, idle_timeout: Duration) -> Self {
        Self {
            pipeline,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            idle_timeout,
        }
    }

    /// Queue a message on its sender's lane, starting the lane if needed
    pub fn submit(&self, message: IncomingMessage) {
        let key = message.sender.user.clone();
        let mut lanes = lock(&self.lanes);

        let message = match lanes.get(&key) {
            Some(sender) => match sender.send(message) {
                Ok(()) => return,
                // Worker already gone; start a fresh lane below
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // A freshly created receiver is open, so this cannot fail
        let _ = sender.send(message);
        lanes.insert(key.clone(), sender);
        debug!(sender = %key, "Started sender lane");

        self.tracker.spawn(run_lane(
            key,
            receiver,
            Arc::clone(&self.lanes),
            Arc::clone(&self.pipeline),
            self.idle_timeout,
        ));
    }

    /// Number of live lanes
    pub fn active_lanes(&self) -> usize {
        lock(&self.lanes).len()
    }

    /// Wait until every lane has drained and retired
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn run_lane<T>(
    key: String,
    mut receiver: mpsc::UnboundedReceiver<IncomingMessage>,
    lanes: Arc<Mutex<LaneMap>>,
    pipeline: Arc<MessagePipeline<T>>,
    idle_timeout: Duration,
) where
    T: Transport + 'static,
{
    loop {
        let next = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(message)) => Some(message),
            Ok(None) => None,
            Err(_) => {
                let mut map = lock(&lanes);
                match receiver.try_recv() {
                    Ok(message) => Some(message),
                    Err(_) => {
                        map.remove(&key);
                        None
                    }
                }
            }
        };

        match next {
            Some(message) => {
                pipeline.handle_message(message).await;
            }
            None => break,
        }
    }
    debug!(sender = %key, "Sender lane retired");
}
