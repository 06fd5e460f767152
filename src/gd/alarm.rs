//! Single-fire alarms.
//!
//! Streams never trust an alarm to be cancelled: every callback receives its
//! own handle and checks it against the handle the stream currently expects,
//! under the stream lock, before acting.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmHandle(u64);

impl AlarmHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

pub type AlarmCallback = Box<dyn FnOnce(AlarmHandle) + Send + 'static>;

/// Schedule-after-delay facility, plus the clock streams read timestamps from.
pub trait AlarmManager: Send + Sync {
    /// Milliseconds since the Unix epoch, on this facility's clock.
    fn now_ms(&self) -> u64;

    /// Run `callback` once, on an arbitrary thread, after `delay`.
    fn schedule(&self, delay: Duration, callback: AlarmCallback) -> AlarmHandle;

    /// Best effort; the callback may still run.
    fn cancel(&self, handle: AlarmHandle);
}

enum Command {
    Schedule {
        handle: AlarmHandle,
        due: Instant,
        callback: AlarmCallback,
    },
    Cancel(AlarmHandle),
    Shutdown,
}

/// Alarms driven by one background thread.
pub struct ThreadAlarms {
    next_id: AtomicU64,
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    worker_id: Option<ThreadId>,
}

impl ThreadAlarms {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        let worker = std::thread::Builder::new()
            .name("gd-alarms".to_string())
            .spawn(move || run_alarms(rx));
        let (worker, worker_id) = match worker {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(err) => {
                tracing::error!("failed to spawn alarm thread, alarms will not fire: {err}");
                (None, None)
            }
        };
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            tx,
            worker,
            worker_id,
        })
    }
}

impl AlarmManager for ThreadAlarms {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn schedule(&self, delay: Duration, callback: AlarmCallback) -> AlarmHandle {
        let handle = AlarmHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cmd = Command::Schedule {
            handle,
            due: Instant::now() + delay,
            callback,
        };
        if self.tx.send(cmd).is_err() {
            tracing::warn!(alarm = handle.0, "alarm thread gone, alarm dropped");
        }
        handle
    }

    fn cancel(&self, handle: AlarmHandle) {
        // A closed channel means nothing will fire anyway.
        let _ = self.tx.send(Command::Cancel(handle));
    }
}

impl Drop for ThreadAlarms {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        // The last reference can be released from inside a callback.
        if self.worker_id == Some(std::thread::current().id()) {
            return;
        }
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("alarm thread panicked");
        }
    }
}

fn run_alarms(rx: Receiver<Command>) {
    let mut queue: BinaryHeap<Reverse<(Instant, AlarmHandle)>> = BinaryHeap::new();
    let mut callbacks: HashMap<AlarmHandle, AlarmCallback> = HashMap::new();
    loop {
        let now = Instant::now();
        while let Some(Reverse((due, handle))) = queue.peek().copied() {
            if due > now {
                break;
            }
            queue.pop();
            if let Some(callback) = callbacks.remove(&handle) {
                callback(handle);
            }
        }

        let cmd = match queue.peek() {
            Some(Reverse((due, _))) => {
                match rx.recv_timeout(due.saturating_duration_since(Instant::now())) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => return,
            },
        };
        match cmd {
            Command::Schedule {
                handle,
                due,
                callback,
            } => {
                queue.push(Reverse((due, handle)));
                callbacks.insert(handle, callback);
            }
            Command::Cancel(handle) => {
                callbacks.remove(&handle);
            }
            Command::Shutdown => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam::channel;

    #[test]
    fn fires_in_deadline_order() {
        let alarms = ThreadAlarms::new();
        let (tx, rx) = channel::unbounded();
        let late = tx.clone();
        alarms.schedule(
            Duration::from_millis(40),
            Box::new(move |_| {
                let _ = late.send("late");
            }),
        );
        alarms.schedule(
            Duration::from_millis(5),
            Box::new(move |_| {
                let _ = tx.send("early");
            }),
        );
        let first = rx.recv_timeout(Duration::from_secs(2)).expect("first alarm");
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("second alarm");
        assert_eq!((first, second), ("early", "late"));
    }

    #[test]
    fn cancelled_alarm_does_not_fire() {
        let alarms = ThreadAlarms::new();
        let (tx, rx) = channel::unbounded();
        let handle = alarms.schedule(
            Duration::from_millis(50),
            Box::new(move |h| {
                let _ = tx.send(h);
            }),
        );
        alarms.cancel(handle);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn callback_receives_its_handle() {
        let alarms = ThreadAlarms::new();
        let (tx, rx) = channel::unbounded();
        let handle = alarms.schedule(
            Duration::ZERO,
            Box::new(move |h| {
                let _ = tx.send(h);
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).expect("alarm"), handle);
    }
}
