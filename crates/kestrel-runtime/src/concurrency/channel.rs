//! Channel primitive for message passing between tasks
//!
//! A FIFO queue with three capacity modes:
//! - unbuffered: a send blocks until a receiver has taken the value
//! - bounded(n): a send blocks only while `n` values are waiting
//! - unbounded: a send never blocks (host API only)
//!
//! Closing wakes every blocked party. Receivers drain what is still buffered,
//! then get `Null` forever.

use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Send on a closed channel
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("send on closed channel")]
pub struct ChannelClosed;

#[derive(Debug, Default)]
struct ChannelState {
    buffer: VecDeque<Value>,
    closed: bool,
    /// Values ever enqueued
    sent: u64,
    /// Values ever dequeued
    received: u64,
}

pub struct Channel {
    /// `None` for unbounded, `Some(0)` for rendezvous
    capacity: Option<usize>,
    state: Mutex<ChannelState>,
    /// Signaled when a value is enqueued or the channel closes
    readable: Condvar,
    /// Signaled when a value is dequeued or the channel closes
    writable: Condvar,
}

impl Channel {
    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            state: Mutex::new(ChannelState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Zero-buffer channel: every send waits for its receiver
    pub fn unbuffered() -> Self {
        Self::with_capacity(Some(0))
    }

    /// Channel holding up to `capacity` values (0 means unbuffered)
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn capacity_label(&self) -> String {
        match self.capacity {
            Some(0) => "unbuffered".to_string(),
            Some(n) => format!("buffered({})", n),
            None => "unbounded".to_string(),
        }
    }

    /// Enqueue `value`, blocking according to the capacity mode
    pub fn send(&self, value: Value) -> Result<(), ChannelClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelClosed);
        }

        match self.capacity {
            Some(0) => {
                state.buffer.push_back(value);
                state.sent += 1;
                let ticket = state.sent;
                self.readable.notify_one();
                // FIFO delivery: our value is taken once `received` reaches our ticket
                while state.received < ticket && !state.closed {
                    self.writable.wait(&mut state);
                }
                Ok(())
            }
            Some(capacity) => {
                while state.buffer.len() >= capacity && !state.closed {
                    self.writable.wait(&mut state);
                }
                if state.closed {
                    return Err(ChannelClosed);
                }
                state.buffer.push_back(value);
                state.sent += 1;
                self.readable.notify_one();
                Ok(())
            }
            None => {
                state.buffer.push_back(value);
                state.sent += 1;
                self.readable.notify_one();
                Ok(())
            }
        }
    }

    /// Dequeue the oldest value, blocking until one arrives or the channel closes
    pub fn recv(&self) -> Value {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.buffer.pop_front() {
                state.received += 1;
                self.writable.notify_all();
                return value;
            }
            if state.closed {
                return Value::Null;
            }
            self.readable.wait(&mut state);
        }
    }

    /// Dequeue without blocking; `None` if nothing is buffered
    pub fn try_recv(&self) -> Option<Value> {
        let mut state = self.state.lock();
        let value = state.buffer.pop_front()?;
        state.received += 1;
        self.writable.notify_all();
        Some(value)
    }

    /// Close the channel and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Values currently buffered
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.capacity)
            .field("buffered", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_buffered_fifo_without_receiver() {
        let ch = Channel::bounded(3);
        for i in 1..=3 {
            ch.send(Value::Integer(i)).unwrap();
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.recv(), Value::Integer(1));
        assert_eq!(ch.recv(), Value::Integer(2));
        assert_eq!(ch.recv(), Value::Integer(3));
    }

    #[test]
    fn test_unbuffered_send_waits_for_receiver() {
        let ch = Arc::new(Channel::unbuffered());
        let delivered = Arc::new(AtomicBool::new(false));

        let sender = {
            let ch = Arc::clone(&ch);
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                ch.send(Value::string("ping")).unwrap();
                delivered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!delivered.load(Ordering::SeqCst), "send returned before receive");

        assert_eq!(ch.recv(), Value::string("ping"));
        sender.join().unwrap();
        assert!(delivered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_full_buffer_blocks_sender() {
        let ch = Arc::new(Channel::bounded(1));
        ch.send(Value::Integer(1)).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let sender = {
            let ch = Arc::clone(&ch);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                ch.send(Value::Integer(2)).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(ch.recv(), Value::Integer(1));
        sender.join().unwrap();
        assert_eq!(ch.recv(), Value::Integer(2));
    }

    #[test]
    fn test_close_drains_then_yields_null() {
        let ch = Channel::bounded(2);
        ch.send(Value::Integer(7)).unwrap();
        ch.close();
        assert_eq!(ch.send(Value::Integer(8)), Err(ChannelClosed));
        assert_eq!(ch.recv(), Value::Integer(7));
        assert_eq!(ch.recv(), Value::Null);
        assert_eq!(ch.recv(), Value::Null);
    }

    #[test]
    fn test_close_wakes_blocked_receiver() {
        let ch = Arc::new(Channel::unbuffered());
        let receiver = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.recv())
        };
        thread::sleep(Duration::from_millis(20));
        ch.close();
        assert_eq!(receiver.join().unwrap(), Value::Null);
    }

    #[test]
    fn test_unbounded_never_blocks() {
        let ch = Channel::unbounded();
        for i in 0..1000 {
            ch.send(Value::Integer(i)).unwrap();
        }
        assert_eq!(ch.try_recv(), Some(Value::Integer(0)));
        assert_eq!(ch.len(), 999);
    }
}
