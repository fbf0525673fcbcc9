//! Deferred destruction of render resources.
//!
//! Textures belong to the thread that imported them. A binding can be
//! dropped on any thread (a commit on the dispatch thread, a frame queue
//! flushed by a render worker), so destruction is queued for the owning
//! thread and run at its next safe point.

use std::collections::HashMap;
use std::thread::ThreadId;

use parking_lot::Mutex;

use super::renderer::Renderer;

/// A cleanup task, run with the renderer on the owning thread
pub type CleanupTask = Box<dyn FnOnce(&mut dyn Renderer) + Send>;

/// Per-thread queue of deferred cleanup tasks
#[derive(Default)]
pub struct CleanupQueue {
    tasks: Mutex<HashMap<ThreadId, Vec<CleanupTask>>>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for the thread that owns the resource
    pub fn push(&self, owner: ThreadId, task: CleanupTask) {
        self.tasks.lock().entry(owner).or_default().push(task);
    }

    /// Take all tasks queued for the calling thread
    pub fn take_current(&self) -> Vec<CleanupTask> {
        let id = std::thread::current().id();
        self.tasks.lock().remove(&id).unwrap_or_default()
    }

    /// Run every task queued for the calling thread. Returns how many ran.
    pub fn run_current(&self, renderer: &mut dyn Renderer) -> usize {
        let tasks = self.take_current();
        let count = tasks.len();
        for task in tasks {
            task(renderer);
        }
        count
    }

    /// Check if there are pending tasks for `owner`
    pub fn has_tasks(&self, owner: ThreadId) -> bool {
        self.tasks.lock().get(&owner).is_some_and(|t| !t.is_empty())
    }

    /// Get number of pending tasks across all threads
    pub fn len(&self) -> usize {
        self.tasks.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::renderer::HeadlessRenderer;

    #[test]
    fn test_cleanup_runs_only_on_owner_thread() {
        let queue = std::sync::Arc::new(CleanupQueue::new());
        let here = std::thread::current().id();
        queue.push(here, Box::new(|_r| {}));

        let remote = queue.clone();
        let ran_remote = std::thread::spawn(move || {
            let mut renderer = HeadlessRenderer::new();
            remote.run_current(&mut renderer)
        })
        .join()
        .unwrap();
        assert_eq!(ran_remote, 0);
        assert!(queue.has_tasks(here));

        let mut renderer = HeadlessRenderer::new();
        assert_eq!(queue.run_current(&mut renderer), 1);
        assert!(queue.is_empty());
    }
}
