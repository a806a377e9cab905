//! Three-point lock rendezvous between the capture manager and a running
//! capture engine (spec.md §4.5, §5). The manager must never touch a ring
//! buffer the engine might still be writing into, and the engine must never
//! block indefinitely waiting for the manager to show up.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The engine did not answer the lock/unlock request within the timeout
    /// (spec.md §7: treated as the engine being wedged).
    Timeout,
    /// The engine's channel endpoint was dropped — the engine has exited.
    EngineGone,
}

/// Manager-side handle. One per running capture engine.
pub struct LockHandle {
    lock_tx: Sender<()>,
    locked_rx: Receiver<()>,
    unlock_tx: Sender<()>,
    unlocked_rx: Receiver<()>,
    timeout: Duration,
}

/// Engine-side counterpart, polled from inside the hot loop.
pub struct LockParticipant {
    lock_rx: Receiver<()>,
    locked_tx: Sender<()>,
    unlock_rx: Receiver<()>,
    unlocked_tx: Sender<()>,
}

/// Builds a connected (handle, participant) pair. All four channels are
/// rendezvous channels (`bounded(0)`) — a send only completes once the other
/// side is ready to receive, which is the actual synchronization primitive
/// here, not the message payload.
pub fn three_point_lock(timeout: Duration) -> (LockHandle, LockParticipant) {
    let (lock_tx, lock_rx) = crossbeam_channel::bounded(0);
    let (locked_tx, locked_rx) = crossbeam_channel::bounded(0);
    let (unlock_tx, unlock_rx) = crossbeam_channel::bounded(0);
    let (unlocked_tx, unlocked_rx) = crossbeam_channel::bounded(0);
    (
        LockHandle {
            lock_tx,
            locked_rx,
            unlock_tx,
            unlocked_rx,
            timeout,
        },
        LockParticipant {
            lock_rx,
            locked_tx,
            unlock_rx,
            unlocked_tx,
        },
    )
}

impl LockHandle {
    /// Point 1 & 2: request the lock, wait for the engine's confirmation
    /// that it has stopped writing to the ring buffer.
    pub fn acquire(&self) -> Result<(), LockError> {
        self.lock_tx
            .send_timeout((), self.timeout)
            .map_err(|_| LockError::EngineGone)?;
        match self.locked_rx.recv_timeout(self.timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(LockError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(LockError::EngineGone),
        }
    }

    /// Point 3: release the lock and wait for the engine to resume.
    pub fn release(&self) -> Result<(), LockError> {
        self.unlock_tx
            .send_timeout((), self.timeout)
            .map_err(|_| LockError::EngineGone)?;
        match self.unlocked_rx.recv_timeout(self.timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(LockError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(LockError::EngineGone),
        }
    }
}

impl LockParticipant {
    /// Non-blocking poll from the hot loop: `true` means a rotation is being
    /// requested and the engine must finish its current packet, send
    /// `confirm_locked`, then switch into buffering mode and start polling
    /// `poll_unlock_request`.
    pub fn poll_lock_request(&self) -> bool {
        self.lock_rx.try_recv().is_ok()
    }

    pub fn confirm_locked(&self) {
        let _ = self.locked_tx.send(());
    }

    /// Non-blocking poll from inside buffering mode: `true` means the
    /// manager is done with the flow table and the engine should drain its
    /// parked buffer and call `confirm_unlocked`. Packets must keep being
    /// read and parked between polls — never block here (spec.md §4.5 main
    /// loop, point 5).
    pub fn poll_unlock_request(&self) -> bool {
        self.unlock_rx.try_recv().is_ok()
    }

    pub fn confirm_unlocked(&self) {
        let _ = self.unlocked_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn full_round_trip() {
        let (handle, participant) = three_point_lock(Duration::from_millis(500));
        let worker = thread::spawn(move || {
            loop {
                if participant.poll_lock_request() {
                    participant.confirm_locked();
                    loop {
                        if participant.poll_unlock_request() {
                            participant.confirm_unlocked();
                            return;
                        }
                        thread::yield_now();
                    }
                }
                thread::yield_now();
            }
        });
        handle.acquire().expect("acquire");
        handle.release().expect("release");
        worker.join().unwrap();
    }

    #[test]
    fn acquire_times_out_if_engine_never_polls() {
        let (handle, _participant) = three_point_lock(Duration::from_millis(50));
        assert_eq!(handle.acquire(), Err(LockError::Timeout));
    }

    #[test]
    fn acquire_fails_if_engine_gone() {
        let (handle, participant) = three_point_lock(Duration::from_millis(50));
        drop(participant);
        assert_eq!(handle.acquire(), Err(LockError::EngineGone));
    }
}
