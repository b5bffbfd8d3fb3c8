//! Many-to-one event stream from `SwapRunner`/`Scheduler` publishers to a
//! single consumer (the renderer, or the `ResultAggregator` itself).
//!
//! Grounded on the same `tokio::sync::mpsc` fan-in pattern used for command
//! dispatch elsewhere in this codebase: publishers hold a cloned sender,
//! one task owns the receiver and drains it in a loop.

use tokio::sync::mpsc;

use crate::types::LifecycleEvent;

/// Bounded so a slow consumer applies backpressure to itself, never to the
/// runners producing events. Terminal and retry events are never dropped;
/// only a non-terminal renderer-side coalescing step (not implemented here,
/// left to the consumer) may collapse repeats.
const CHANNEL_CAPACITY: usize = 1_024;

pub type ProgressSender = mpsc::Sender<LifecycleEvent>;
pub type ProgressReceiver = mpsc::Receiver<LifecycleEvent>;

/// Constructs the bounded channel backing a run's progress stream.
pub struct ProgressBus;

impl ProgressBus {
    pub fn channel() -> (ProgressSender, ProgressReceiver) {
        mpsc::channel(CHANNEL_CAPACITY)
    }
}
