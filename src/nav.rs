//! Navigation: the routing facility seam and the deferred redirector the
//! access guard uses to leave a page it may not render.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use crate::tprintln;

/// Routing facility of the host environment.
pub trait Navigator: Send + Sync {
    /// Current location, path plus optional query string.
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

/// In-process history stack. The current location is published on a watch
/// channel so guards can re-evaluate on path changes.
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
    location: watch::Sender<String>,
}

impl MemoryNavigator {
    pub fn new(start: &str) -> Self {
        let (location, _rx) = watch::channel(start.to_string());
        Self { history: Mutex::new(vec![start.to_string()]), location }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> { self.location.subscribe() }

    pub fn history(&self) -> Vec<String> { self.history.lock().clone() }

    /// Pop the current entry. Returns the new location, or None at the root.
    pub fn back(&self) -> Option<String> {
        let mut h = self.history.lock();
        if h.len() < 2 { return None; }
        h.pop();
        let cur = h.last().cloned()?;
        self.location.send_replace(cur.clone());
        Some(cur)
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String { self.location.borrow().clone() }

    fn navigate(&self, path: &str) {
        let mut h = self.history.lock();
        h.push(path.to_string());
        self.location.send_replace(path.to_string());
        tracing::debug!(target: "tripdesk::nav", "navigate -> {}", path);
    }
}

/// Performs route changes requested during a render pass. `redirect` only
/// queues; navigation state changes in `commit`, after the pass is over.
pub struct Redirector {
    navigator: Arc<dyn Navigator>,
    pending: Mutex<VecDeque<String>>,
    wake: Notify,
}

impl Redirector {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator, pending: Mutex::new(VecDeque::new()), wake: Notify::new() }
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> { &self.navigator }

    pub fn redirect(&self, target: &str) {
        self.pending.lock().push_back(target.to_string());
        self.wake.notify_one();
    }

    pub fn pending(&self) -> usize { self.pending.lock().len() }

    /// Apply queued redirects in order. A redirect to the location we are
    /// already at is dropped. Returns how many navigations happened.
    pub fn commit(&self) -> usize {
        let queued: Vec<String> = self.pending.lock().drain(..).collect();
        let mut done = 0usize;
        for target in queued {
            if self.navigator.current_path() == target { continue; }
            tracing::info!(target: "tripdesk::nav", "redirect -> {}", target);
            self.navigator.navigate(&target);
            done += 1;
        }
        if done > 0 { tprintln!("redirector.commit navigations={}", done); }
        done
    }

    /// Commit loop for hosts that render on a separate task. Runs until the
    /// task is aborted.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            // let the render pass that queued the redirect finish first
            tokio::task::yield_now().await;
            self.commit();
        }
    }
}
