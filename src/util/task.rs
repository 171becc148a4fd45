use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::host::Status;

/// Creates a single-use rendezvous between a waiting thread and the thread
/// that completes its operation. The waiter blocks until the notifier
/// releases it with a [`Status`] and a value, or until the timeout expires.
/// Both halves are consumed by use, so each slot resolves at most once.
pub(crate) fn task_slot<T: Send>() -> (TaskWaiter<T>, TaskNotifier<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(State::Pending),
        cv: Condvar::new(),
    });
    (
        TaskWaiter(Arc::clone(&slot)),
        TaskNotifier(Some(slot)),
    )
}

#[derive(Debug)]
struct Slot<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

#[derive(Debug)]
enum State<T> {
    /// Neither side has resolved the slot yet.
    Pending,
    /// The notifier released the waiter.
    Released(Status, T),
    /// The waiter timed out. A late release is discarded.
    Abandoned,
}

/// Blocking half of a rendezvous slot ([`task_slot`]).
#[derive(Debug)]
#[must_use]
pub(crate) struct TaskWaiter<T>(Arc<Slot<T>>);

impl<T: Send> TaskWaiter<T> {
    /// Blocks until the slot is released or `timeout` expires. Returns
    /// [`None`] on timeout, in which case the slot is marked abandoned and
    /// any later release is discarded.
    pub fn wait(self, timeout: Duration) -> Option<(Status, T)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock();
        loop {
            match *state {
                State::Released(..) => {
                    let State::Released(st, v) =
                        std::mem::replace(&mut *state, State::Abandoned)
                    else {
                        unreachable!()
                    };
                    return Some((st, v));
                }
                // The notifier was dropped without resolving the slot.
                State::Abandoned => return None,
                State::Pending => {}
            }
            if self.0.cv.wait_until(&mut state, deadline).timed_out() {
                // The notifier may have fired between the timeout and lock
                // reacquisition.
                if let State::Released(st, v) =
                    std::mem::replace(&mut *state, State::Abandoned)
                {
                    return Some((st, v));
                }
                *state = State::Abandoned;
                return None;
            }
        }
    }
}

/// Releasing half of a rendezvous slot ([`task_slot`]).
#[derive(Debug)]
#[must_use]
pub(crate) struct TaskNotifier<T>(Option<Arc<Slot<T>>>);

impl<T: Send> TaskNotifier<T> {
    /// Releases the waiter with `st` and `v`. A release after the waiter
    /// timed out is a no-op.
    pub fn notify(mut self, st: Status, v: T) {
        let Some(slot) = self.0.take() else { return };
        let mut state = slot.state.lock();
        match *state {
            State::Pending => {
                *state = State::Released(st, v);
                drop(state);
                slot.cv.notify_one();
            }
            State::Abandoned => debug!("Discarding late release ({st:?})"),
            State::Released(..) => unreachable!("slot released twice"),
        }
    }
}

impl<T> Drop for TaskNotifier<T> {
    /// Releases the waiter with a failure status if the notifier is dropped
    /// without being used, so that the waiter never blocks for the full
    /// timeout on an operation that can no longer complete.
    fn drop(&mut self) {
        let Some(slot) = self.0.take() else { return };
        let mut state = slot.state.lock();
        if let State::Pending = *state {
            debug!("Notifier dropped while pending");
            *state = State::Abandoned;
            drop(state);
            slot.cv.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::att::ErrorCode;

    #[test]
    fn release_before_wait() {
        let (w, n) = task_slot();
        n.notify(Status::Ok, 42_u32);
        assert_eq!(w.wait(Duration::from_millis(10)), Some((Status::Ok, 42)));
    }

    #[test]
    fn release_from_other_thread() {
        let (w, n) = task_slot();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            n.notify(Status::Att(ErrorCode::ReadNotPermitted), "done");
        });
        assert_eq!(
            w.wait(Duration::from_secs(5)),
            Some((Status::Att(ErrorCode::ReadNotPermitted), "done"))
        );
        t.join().unwrap();
    }

    #[test]
    fn timeout_discards_late_release() {
        let (w, n) = task_slot();
        assert_eq!(w.wait(Duration::from_millis(10)), None);
        n.notify(Status::Ok, ()); // No-op
    }

    #[test]
    fn dropped_notifier_unblocks_waiter() {
        let (w, n) = task_slot::<()>();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(n);
        });
        assert_eq!(w.wait(Duration::from_secs(5)), None);
        t.join().unwrap();
    }
}
