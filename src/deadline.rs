// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background watcher that cancels contexts when their deadline passes.
//!
//! One thread serves the whole process. It is spawned the first time a
//! deadline is registered and sleeps on its channel until either a message
//! arrives or the earliest pending deadline is reached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use wasm_safe_mutex::mpsc;

use crate::cancel::{CancelState, ContextError};
use crate::sys::{Duration, Instant};

struct Pending {
    deadline: Instant,
    state: Weak<CancelState>,
}

enum Message {
    Register(u64, Pending),
    Complete(u64),
}

static CHANNEL: OnceLock<mpsc::Sender<Message>> = OnceLock::new();
static WATCH_ID: AtomicU64 = AtomicU64::new(1);

fn channel() -> mpsc::Sender<Message> {
    CHANNEL
        .get_or_init(|| {
            let (tx, rx) = mpsc::channel();
            spawn_watcher(rx);
            tx
        })
        .clone()
}

/// Reserves an id to pass to [`CancelState::new`] before calling [`register`].
pub(crate) fn next_watch_id() -> u64 {
    WATCH_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn register(id: u64, deadline: Instant, state: &Arc<CancelState>) {
    let pending = Pending {
        deadline,
        state: Arc::downgrade(state),
    };
    // Ignore send failures so registration stays cheap even during shutdown.
    let _ = channel().send_sync(Message::Register(id, pending));
}

/// Tells the watcher that `id` was cancelled some other way.
pub(crate) fn complete(id: u64) {
    if let Some(sender) = CHANNEL.get() {
        let _ = sender.send_sync(Message::Complete(id));
    }
}

fn spawn_watcher(receiver: mpsc::Receiver<Message>) {
    #[cfg(not(target_arch = "wasm32"))]
    let _ = std::thread::Builder::new()
        .name("localwise-deadline".to_string())
        .spawn(move || watch_loop(receiver));

    #[cfg(target_arch = "wasm32")]
    let _ = wasm_thread::spawn(move || watch_loop(receiver));
}

/// Deadlines the watcher is waiting on.
#[derive(Default)]
struct Watchlist {
    pending: HashMap<u64, Pending>,
}

impl Watchlist {
    fn apply(&mut self, message: Message) {
        match message {
            Message::Register(id, p) => {
                // a state cancelled before its registration arrived already sent Complete
                if is_live(&p) {
                    self.pending.insert(id, p);
                }
            }
            Message::Complete(id) => {
                self.pending.remove(&id);
            }
        }
    }

    /// When the watcher should next wake up.
    fn next_deadline(&self, now: Instant) -> Instant {
        self.pending
            .values()
            .map(|p| p.deadline)
            .min()
            .unwrap_or_else(|| now + Duration::from_millis(250))
    }

    /// Cancels everything due at `now` and forgets entries nobody can observe anymore.
    fn fire_expired(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.pending.retain(|id, p| {
            if !is_live(p) {
                return false;
            }
            if now >= p.deadline {
                expired.push((*id, p.state.clone()));
                return false;
            }
            true
        });
        for (id, state) in expired {
            if let Some(state) = state.upgrade() {
                logwise::debuginternal_sync!("deadline {id} expired", id = id);
                state.cancel(ContextError::DeadlineExceeded);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

fn is_live(p: &Pending) -> bool {
    p.state.upgrade().is_some_and(|s| s.err().is_none())
}

fn watch_loop(receiver: mpsc::Receiver<Message>) {
    let mut watchlist = Watchlist::default();
    loop {
        match receiver.recv_sync_timeout(watchlist.next_deadline(Instant::now())) {
            Ok(message) => watchlist.apply(message),
            Err(mpsc::RecvTimeoutError::Timeout) => { /* fall through to deadline check */ }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        watchlist.fire_expired(Instant::now());
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn wait_for(state: &CancelState, limit: Duration) -> Option<ContextError> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if let Some(err) = state.err() {
                return Some(err);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        state.err()
    }

    fn pending(deadline: Instant, state: &Arc<CancelState>) -> Pending {
        Pending {
            deadline,
            state: Arc::downgrade(state),
        }
    }

    #[test]
    fn dropped_states_are_forgotten() {
        let mut watchlist = Watchlist::default();
        let far = Instant::now() + Duration::from_secs(3600);
        let states: Vec<_> = (0..16)
            .map(|_| Arc::new(CancelState::new(Some(far), None)))
            .collect();
        for (id, state) in states.iter().enumerate() {
            watchlist.apply(Message::Register(id as u64, pending(far, state)));
        }
        let kept = Arc::new(CancelState::new(Some(far), None));
        watchlist.apply(Message::Register(100, pending(far, &kept)));
        assert_eq!(watchlist.len(), 17);

        drop(states);
        watchlist.fire_expired(Instant::now());
        assert_eq!(watchlist.len(), 1);
        assert_eq!(kept.err(), None);
    }

    #[test]
    fn registration_after_cancel_is_skipped() {
        let mut watchlist = Watchlist::default();
        let far = Instant::now() + Duration::from_secs(3600);
        let state = Arc::new(CancelState::new(Some(far), None));
        state.cancel(ContextError::Canceled);
        // Complete overtook Register on the channel
        watchlist.apply(Message::Complete(7));
        watchlist.apply(Message::Register(7, pending(far, &state)));
        assert_eq!(watchlist.len(), 0);
    }

    #[test]
    fn complete_removes_and_expiry_fires() {
        let mut watchlist = Watchlist::default();
        let now = Instant::now();
        let soon = now + Duration::from_millis(10);
        let a = Arc::new(CancelState::new(Some(soon), None));
        let b = Arc::new(CancelState::new(Some(soon), None));
        watchlist.apply(Message::Register(1, pending(soon, &a)));
        watchlist.apply(Message::Register(2, pending(soon, &b)));
        assert_eq!(watchlist.next_deadline(now), soon);

        watchlist.apply(Message::Complete(1));
        watchlist.fire_expired(soon);
        assert_eq!(watchlist.len(), 0);
        assert_eq!(a.err(), None);
        assert_eq!(b.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn fires_registered_deadline() {
        let id = next_watch_id();
        let deadline = Instant::now() + Duration::from_millis(20);
        let state = Arc::new(CancelState::new(Some(deadline), Some(id)));
        register(id, deadline, &state);
        assert_eq!(
            wait_for(&state, Duration::from_secs(5)),
            Some(ContextError::DeadlineExceeded)
        );
    }

    #[test]
    fn earlier_cancel_wins() {
        let id = next_watch_id();
        let deadline = Instant::now() + Duration::from_millis(30);
        let state = Arc::new(CancelState::new(Some(deadline), Some(id)));
        register(id, deadline, &state);
        state.cancel(ContextError::Canceled);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(state.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn dropped_state_is_ignored() {
        let id = next_watch_id();
        let deadline = Instant::now() + Duration::from_millis(5);
        let state = Arc::new(CancelState::new(Some(deadline), Some(id)));
        register(id, deadline, &state);
        drop(state);
        // the watcher must survive a dead registration and keep serving others
        let id = next_watch_id();
        let deadline = Instant::now() + Duration::from_millis(20);
        let live = Arc::new(CancelState::new(Some(deadline), Some(id)));
        register(id, deadline, &live);
        assert_eq!(
            wait_for(&live, Duration::from_secs(5)),
            Some(ContextError::DeadlineExceeded)
        );
    }
}
