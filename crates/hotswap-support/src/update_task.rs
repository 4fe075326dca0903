//! Periodic ticking of registered entries.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Something driven by an [`UpdateTask`].
pub trait Tickable: Send + Sync {
    fn on_tick(&self, tick: u64);

    /// Called once when the driving task is cancelled.
    fn close(&self);
}

/// A set of tickable entries with identity semantics: the same `Arc` is
/// held at most once, equal values in different allocations are distinct.
#[derive(Default)]
pub struct UpdateTask {
    entries: DashMap<usize, Arc<dyn Tickable>>,
}

fn identity(entry: &Arc<dyn Tickable>) -> usize {
    Arc::as_ptr(entry) as *const () as usize
}

impl UpdateTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entry`. Returns `false` if it was already present.
    pub fn add(&self, entry: Arc<dyn Tickable>) -> bool {
        match self.entries.entry(identity(&entry)) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn remove(&self, entry: &Arc<dyn Tickable>) -> bool {
        self.entries.remove(&identity(entry)).is_some()
    }

    pub fn contains(&self, entry: &Arc<dyn Tickable>) -> bool {
        self.entries.contains_key(&identity(entry))
    }

    /// Snapshot of the registered entries.
    pub fn entries(&self) -> Vec<Arc<dyn Tickable>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tick every entry. Entries may add or remove entries while ticking.
    pub fn on_run(&self, tick: u64) {
        for entry in self.entries() {
            entry.on_tick(tick);
        }
    }

    /// Close every entry registered at the time of the call.
    pub fn on_cancel(&self) {
        for entry in self.entries() {
            entry.close();
        }
    }

    /// Drive the task on the current tokio runtime, one tick per `period`.
    ///
    /// The first tick happens immediately.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> UpdateTaskHandle {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let task = self.clone();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => {
                        task.on_run(tick);
                        tick = tick.wrapping_add(1);
                    }
                }
            }

            task.on_cancel();
            tracing::debug!("Update task stopped after {} ticks", tick);
        });

        UpdateTaskHandle {
            cancel: Some(cancel_tx),
            join,
        }
    }
}

/// Handle to a spawned [`UpdateTask`].
pub struct UpdateTaskHandle {
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl UpdateTaskHandle {
    /// Stop ticking and wait for every entry to be closed.
    pub async fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Err(e) = (&mut self.join).await {
            tracing::error!("Update task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
