//! Single-slot handoff between a frame producer and the render loop.
//!
//! The slot cycles through `Empty -> Full -> InFlight -> Empty`. A producer
//! can only deposit into an empty slot, and the slot only empties when the
//! consumer drops its [`MailboxLease`], i.e. after the frame has been
//! rendered. This bounds the pipeline to one frame in flight. A producer that
//! is faster than the GPU blocks in [`FrameMailbox::send`] or has its frame
//! handed back by [`FrameMailbox::try_send`].

use std::{ops::Deref, sync::Arc};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// The mailbox was closed; the frame is handed back.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("frame mailbox is closed")]
pub struct SendError<T>(pub T);

#[derive(Debug, PartialEq, Eq, Error)]
pub enum TrySendError<T> {
    /// A frame is queued or being rendered.
    #[error("frame mailbox is occupied")]
    Full(T),
    #[error("frame mailbox is closed")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(frame) | TrySendError::Closed(frame) => frame,
        }
    }
}

enum Slot<T> {
    Empty,
    Full(T),
    InFlight,
}

struct State<T> {
    slot: Slot<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

/// Cloneable handle to a single-slot mailbox.
pub struct FrameMailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FrameMailbox<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for FrameMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameMailbox<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    slot: Slot::Empty,
                    closed: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Deposits `frame`, blocking while the previous frame is queued or in
    /// flight. There is no timeout.
    pub fn send(&self, frame: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(SendError(frame));
            }
            if matches!(state.slot, Slot::Empty) {
                state.slot = Slot::Full(frame);
                self.shared.changed.notify_all();
                return Ok(());
            }
            self.shared.changed.wait(&mut state);
        }
    }

    /// Deposits `frame` only if the slot is empty.
    pub fn try_send(&self, frame: T) -> Result<(), TrySendError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TrySendError::Closed(frame));
        }
        if !matches!(state.slot, Slot::Empty) {
            return Err(TrySendError::Full(frame));
        }
        state.slot = Slot::Full(frame);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Takes the queued frame, blocking until one arrives.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub fn recv(&self) -> Option<MailboxLease<T>> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut state.slot, Slot::Empty) {
                Slot::Full(frame) => {
                    state.slot = Slot::InFlight;
                    return Some(MailboxLease {
                        frame,
                        shared: Arc::clone(&self.shared),
                    });
                }
                other => state.slot = other,
            }
            if state.closed {
                return None;
            }
            self.shared.changed.wait(&mut state);
        }
    }

    /// Wakes every waiter. Later sends fail; a queued frame can still be
    /// received.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// `true` when no frame is queued or in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.shared.state.lock().slot, Slot::Empty)
    }
}

/// A received frame. The slot frees when the lease is dropped.
pub struct MailboxLease<T> {
    frame: T,
    shared: Arc<Shared<T>>,
}

impl<T> Deref for MailboxLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.frame
    }
}

impl<T> Drop for MailboxLease<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if matches!(state.slot, Slot::InFlight) {
            state.slot = Slot::Empty;
        }
        drop(state);
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn delivers_a_single_frame() {
        let mailbox = FrameMailbox::new();
        mailbox.send(7).expect("open mailbox");
        let lease = mailbox.recv().expect("frame queued");
        assert_eq!(*lease, 7);
    }

    #[test]
    fn slot_stays_occupied_while_in_flight() {
        let mailbox = FrameMailbox::new();
        mailbox.try_send(1).expect("empty slot");
        assert_eq!(mailbox.try_send(2), Err(TrySendError::Full(2)));

        let lease = mailbox.recv().expect("frame queued");
        assert!(!mailbox.is_idle());
        assert_eq!(mailbox.try_send(3), Err(TrySendError::Full(3)));

        drop(lease);
        assert!(mailbox.is_idle());
        assert_eq!(mailbox.try_send(4), Ok(()));
    }

    #[test]
    fn send_blocks_until_lease_is_dropped() {
        let mailbox = FrameMailbox::new();
        let second_sent = Arc::new(AtomicBool::new(false));

        let producer = {
            let mailbox = mailbox.clone();
            let second_sent = Arc::clone(&second_sent);
            thread::spawn(move || {
                mailbox.send(1).expect("open mailbox");
                mailbox.send(2).expect("open mailbox");
                second_sent.store(true, Ordering::SeqCst);
            })
        };

        let first = mailbox.recv().expect("first frame");
        assert_eq!(*first, 1);
        thread::sleep(Duration::from_millis(50));
        assert!(!second_sent.load(Ordering::SeqCst));

        drop(first);
        let second = mailbox.recv().expect("second frame");
        assert_eq!(*second, 2);
        drop(second);
        producer.join().expect("producer thread");
        assert!(second_sent.load(Ordering::SeqCst));
    }

    #[test]
    fn close_wakes_receiver_and_rejects_sends() {
        let mailbox = FrameMailbox::<u32>::new();
        let consumer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.recv().map(|lease| *lease))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();

        assert_eq!(consumer.join().expect("consumer thread"), None);
        assert_eq!(mailbox.send(5), Err(SendError(5)));
        assert_eq!(
            mailbox.try_send(6).map_err(TrySendError::into_inner),
            Err(6)
        );
    }

    #[test]
    fn queued_frame_survives_close() {
        let mailbox = FrameMailbox::new();
        mailbox.send("last").expect("open mailbox");
        mailbox.close();
        assert_eq!(mailbox.recv().map(|lease| *lease), Some("last"));
        assert!(mailbox.recv().is_none());
    }

    #[test]
    fn close_unblocks_waiting_producer() {
        let mailbox = FrameMailbox::new();
        mailbox.send(1).expect("open mailbox");
        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.send(2))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert_eq!(producer.join().expect("producer thread"), Err(SendError(2)));
    }
}
