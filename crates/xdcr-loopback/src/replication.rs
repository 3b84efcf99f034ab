//! One-directional replication stream between the two clusters.
//!
//! Each committed change is queued with a release time `lag` in the future.
//! A dedicated thread pops released changes in commit order and applies them
//! to the receiving cluster.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;
use xdcr_types::ReplicatedTable;

use crate::cluster::LoopbackCluster;
use crate::state::Change;

#[derive(Debug)]
pub(crate) struct Replicated {
    pub table: ReplicatedTable,
    pub change: Change,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<(Instant, Replicated)>,
    applying: bool,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct ChangeQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
    lag: Duration,
}

impl ChangeQueue {
    pub fn new(lag: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
            lag,
        }
    }

    pub fn push(&self, table: ReplicatedTable, change: Change) {
        let release_at = Instant::now() + self.lag;
        let mut state = self.state.lock();
        state.pending.push_back((release_at, Replicated { table, change }));
        self.cv.notify_all();
    }

    /// Block until the next change is released. `None` once closed.
    fn next(&self) -> Option<Replicated> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            match state.pending.front().map(|(release_at, _)| *release_at) {
                Some(release_at) if release_at <= Instant::now() => {
                    let (_, replicated) = state.pending.pop_front()?;
                    state.applying = true;
                    return Some(replicated);
                }
                Some(release_at) => {
                    let _ = self.cv.wait_until(&mut state, release_at);
                }
                None => self.cv.wait(&mut state),
            }
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.applying = false;
        self.cv.notify_all();
    }

    /// Wait until nothing is queued or being applied. Returns `false` if the
    /// queue did not drain before `timeout`.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.closed && (state.applying || !state.pending.is_empty()) {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                return state.pending.is_empty() && !state.applying;
            }
        }
        true
    }

    pub fn backlog(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + usize::from(state.applying)
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cv.notify_all();
    }
}

/// Start the thread draining `queue` into `target`.
pub(crate) fn spawn_replicator(
    name: String,
    queue: Arc<ChangeQueue>,
    target: Arc<LoopbackCluster>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || {
        while let Some(replicated) = queue.next() {
            target.apply_remote(replicated);
            queue.finish();
        }
        debug!(cluster_id = target.id(), "replication stream closed");
    })
}
