//! Per-file transaction ownership
//!
//! A file has at most one active transaction or batch. The thread that
//! began it owns the file until commit or abort: its own operations see
//! the pending work, other threads' operations wait, and any second
//! `begin` fails at once.

use chaindb_core::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    thread: ThreadId,
    /// Handle object that began the transaction
    holder: u64,
}

pub(crate) struct SlotState<P> {
    owner: Option<Owner>,
    pending: Option<P>,
}

/// Transaction slot shared by every handle object on one file
pub(crate) struct TxnSlot<P> {
    state: Mutex<SlotState<P>>,
    idle: Condvar,
}

/// Exclusive access to a slot not owned by another thread
pub(crate) struct SlotGuard<'a, P> {
    state: MutexGuard<'a, SlotState<P>>,
}

impl<'a, P> SlotGuard<'a, P> {
    /// The calling thread's pending work, if it has an active transaction
    pub(crate) fn pending(&mut self) -> Option<&mut P> {
        self.state.pending.as_mut()
    }
}

impl<P> TxnSlot<P> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                owner: None,
                pending: None,
            }),
            idle: Condvar::new(),
        }
    }

    /// Wait until no other thread owns a transaction, then hold the slot
    pub(crate) fn enter(&self) -> SlotGuard<'_, P> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while matches!(state.owner, Some(owner) if owner.thread != me) {
            self.idle.wait(&mut state);
        }
        SlotGuard { state }
    }

    /// Start a transaction owned by the calling thread
    pub(crate) fn begin(&self, holder: u64, start: impl FnOnce() -> Result<P>) -> Result<()> {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            return Err(Error::TransactionState(
                "a transaction is already active on this file".into(),
            ));
        }
        state.pending = Some(start()?);
        state.owner = Some(Owner {
            thread: thread::current().id(),
            holder,
        });
        Ok(())
    }

    /// Hand the calling thread's pending work to `f` and free the slot.
    ///
    /// The slot is held while `f` runs and is free afterwards whatever `f`
    /// returns.
    pub(crate) fn finish<R>(&self, f: impl FnOnce(P) -> Result<R>) -> Result<R> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if !matches!(state.owner, Some(owner) if owner.thread == me) {
            return Err(Error::TransactionState(
                "no transaction is active on this thread".into(),
            ));
        }
        let result = match state.pending.take() {
            Some(pending) => f(pending),
            None => Err(Error::TransactionState("transaction has no pending work".into())),
        };
        state.owner = None;
        drop(state);
        self.idle.notify_all();
        result
    }

    /// Free the slot if `holder` began the active transaction, returning
    /// the work it left behind
    pub(crate) fn release(&self, holder: u64) -> Option<P> {
        let mut state = self.state.lock();
        if !matches!(state.owner, Some(owner) if owner.holder == holder) {
            return None;
        }
        state.owner = None;
        let pending = state.pending.take();
        drop(state);
        self.idle.notify_all();
        pending
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_second_begin_fails() {
        let slot: TxnSlot<Vec<u8>> = TxnSlot::new();
        slot.begin(1, || Ok(Vec::new())).unwrap();
        assert!(matches!(
            slot.begin(2, || Ok(Vec::new())),
            Err(Error::TransactionState(_))
        ));
        assert!(slot.is_active());
    }

    #[test]
    fn test_finish_without_begin() {
        let slot: TxnSlot<()> = TxnSlot::new();
        assert!(matches!(
            slot.finish(|_| Ok(())),
            Err(Error::TransactionState(_))
        ));
    }

    #[test]
    fn test_owner_sees_pending_work() {
        let slot: TxnSlot<Vec<u8>> = TxnSlot::new();
        slot.begin(1, || Ok(vec![1])).unwrap();
        slot.enter().pending().unwrap().push(2);

        let pending = slot.finish(Ok).unwrap();
        assert_eq!(pending, vec![1, 2]);
        assert!(!slot.is_active());
        assert!(slot.enter().pending().is_none());
    }

    #[test]
    fn test_failed_finish_frees_slot() {
        let slot: TxnSlot<()> = TxnSlot::new();
        slot.begin(1, || Ok(())).unwrap();
        let result: Result<()> = slot.finish(|_| Err(Error::Backend("disk full".into())));
        assert!(result.is_err());
        assert!(!slot.is_active());
    }

    #[test]
    fn test_release_only_by_holder() {
        let slot: TxnSlot<u32> = TxnSlot::new();
        slot.begin(7, || Ok(42)).unwrap();
        assert_eq!(slot.release(8), None);
        assert_eq!(slot.release(7), Some(42));
        assert!(!slot.is_active());
    }

    #[test]
    fn test_other_threads_wait_for_commit() {
        let slot: Arc<TxnSlot<()>> = Arc::new(TxnSlot::new());
        slot.begin(1, || Ok(())).unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                let mut guard = slot.enter();
                // Only reachable once the owner finished
                guard.pending().is_none()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        slot.finish(|_| Ok(())).unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_begin_from_other_thread_fails_immediately() {
        let slot: Arc<TxnSlot<()>> = Arc::new(TxnSlot::new());
        slot.begin(1, || Ok(())).unwrap();

        let other = Arc::clone(&slot);
        let result = std::thread::spawn(move || other.begin(2, || Ok(()))).join().unwrap();
        assert!(matches!(result, Err(Error::TransactionState(_))));
    }
}
