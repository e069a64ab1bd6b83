use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::frame::FrameSample;

/// Result of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Queue saturated (or its lock contended past the budget). Transient.
    Full,
    /// Queue closed; the session is ending.
    Closed,
}

struct QueueState {
    frames: VecDeque<FrameSample>,
    closed: bool,
}

/// Bounded FIFO between the capture thread and the encoder writer.
///
/// Unlike `RingBuffer`, a full queue rejects the *new* frame: frames already
/// queued are older and must reach the encoder first.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    capacity: usize,
    lock_budget: Duration,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_lock_budget(capacity, Duration::from_millis(2))
    }

    /// `lock_budget` bounds how long `try_push` may wait for the lock.
    pub fn with_lock_budget(capacity: usize, lock_budget: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            lock_budget,
        }
    }

    /// Enqueues without waiting on the consumer.
    pub fn try_push(&self, frame: FrameSample) -> PushOutcome {
        let Some(mut state) = self.state.try_lock_for(self.lock_budget) else {
            return PushOutcome::Full;
        };
        if state.closed {
            return PushOutcome::Closed;
        }
        if state.frames.len() >= self.capacity {
            return PushOutcome::Full;
        }
        state.frames.push_back(frame);
        drop(state);
        self.not_empty.notify_one();
        PushOutcome::Accepted
    }

    /// Blocks until a frame is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop_blocking(&self) -> Option<FrameSample> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Stops accepting frames; queued frames are still delivered.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Stops accepting frames and discards the queued ones.
    /// Returns the number discarded.
    pub fn abort(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            let n = state.frames.len();
            state.frames.clear();
            n
        };
        self.not_empty.notify_all();
        discarded
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
