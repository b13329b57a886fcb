//! Named, cancellable one-shot timers.
//!
//! Firing is delivered as the alarm name on a channel, the way the
//! browser's alarm API posts `onAlarm` events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub trait Alarms: Send + Sync {
    /// Schedule `name` to fire after `delay`, replacing any alarm with the
    /// same name.
    fn create(&self, name: &str, delay: Duration);

    /// Cancel `name`. Returns whether an alarm was pending.
    fn clear(&self, name: &str) -> bool;
}

/// Alarms backed by sleeping tokio tasks.
#[derive(Debug)]
pub struct TokioAlarms {
    tx: mpsc::UnboundedSender<String>,
    tasks: Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>,
    generation: AtomicU64,
}

impl TokioAlarms {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tasks: Default::default(),
                generation: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Alarms for TokioAlarms {
    fn create(&self, name: &str, delay: Duration) {
        let deadline = tokio::time::Instant::now() + delay;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let tasks = self.tasks.clone();
        let alarm = name.to_string();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut pending = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut pending = tasks.lock();
                if pending.get(&alarm).map(|(g, _)| *g) != Some(generation) {
                    return;
                }
                pending.remove(&alarm);
            }
            tracing::debug!(alarm = %alarm, "alarm fired");
            let _ = tx.send(alarm);
        });
        if let Some((_, previous)) = pending.insert(name.to_string(), (generation, handle)) {
            previous.abort();
        }
    }

    fn clear(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}
