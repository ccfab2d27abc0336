//! Keyed ownership of background tasks

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Holds spawned tasks by key. Inserting under an existing key aborts the
/// previous task, and dropping the bag aborts everything it holds.
#[derive(Debug, Default)]
pub struct DisposableBag {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DisposableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, task: JoinHandle<()>) {
        if let Some(previous) = self.tasks.lock().insert(key.into(), task) {
            previous.abort();
        }
    }

    /// Abort and forget the task stored under `key`
    pub fn remove(&self, key: &str) -> bool {
        match self.tasks.lock().remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .get(key)
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn remove_all(&self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Drop for DisposableBag {
    fn drop(&mut self) {
        self.remove_all();
    }
}
