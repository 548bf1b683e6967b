//! The cooperative thread state machine.
//!
//! Threads running JITted code park themselves at safepoints (every
//! allocation and every back-edge). A suspend request ORs the SUSPEND bit
//! onto the running state; the next safepoint transitions Running to
//! Preempted, and only the requester may CAS Preempted back to Waiting to
//! take ownership of resuming the thread.

use cilantro_utils::sync::{AtomicU32, Ordering};
use std::sync::{Barrier, atomic::AtomicU64};

pub const IDLE: u32 = 0;
pub const RUNNABLE: u32 = 1;
pub const RUNNING: u32 = 2;
pub const WAITING: u32 = 3;
pub const PREEMPTED: u32 = 4;
pub const DEAD: u32 = 5;
/// Request bit OR-ed onto the running state.
pub const SUSPEND: u32 = 0x1000;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// The current thread's runtime identifier; per-thread GC data is keyed off
/// this.
pub fn current_thread_id() -> u64 {
    CURRENT_THREAD_ID.with(|id| *id)
}

#[derive(Debug)]
pub struct RuntimeThread {
    pub id: u64,
    status: AtomicU32,
}

impl RuntimeThread {
    pub fn new() -> Self {
        Self {
            id: current_thread_id(),
            status: AtomicU32::new(IDLE),
        }
    }

    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn make_runnable(&self) {
        self.status.store(RUNNABLE, Ordering::Release);
    }

    /// Runnable -> Running; returns false when the transition does not apply.
    pub fn start_running(&self) -> bool {
        self.status
            .compare_exchange(RUNNABLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_dead(&self) {
        self.status.store(DEAD, Ordering::Release);
    }

    /// Ask the thread to stop at its next safepoint. Returns false when the
    /// thread is not running user code.
    pub fn request_suspend(&self) -> bool {
        self.status
            .compare_exchange(
                RUNNING,
                RUNNING | SUSPEND,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Called by the running thread at every safepoint. Parks until resumed
    /// when a suspend was requested.
    pub fn safepoint(&self) {
        if self.status.load(Ordering::Acquire) & SUSPEND == 0 {
            return;
        }
        self.status.store(PREEMPTED, Ordering::Release);
        loop {
            match self.status.load(Ordering::Acquire) {
                PREEMPTED | WAITING => std::hint::spin_loop(),
                _ => break,
            }
        }
    }

    /// The requester takes ownership of a preempted thread. Only the caller
    /// that wins this CAS may later resume it.
    pub fn acknowledge_preempted(&self) -> bool {
        self.status
            .compare_exchange(PREEMPTED, WAITING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Let a waiting thread continue; it re-enters Running from its
    /// safepoint loop.
    pub fn resume(&self) {
        let _ = self.status.compare_exchange(
            WAITING,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Default for RuntimeThread {
    fn default() -> Self {
        Self::new()
    }
}

/// The barrier used at thread creation so the spawner observes the new
/// thread's registration before scheduling continues.
pub struct StartupGate {
    barrier: Barrier,
}

impl StartupGate {
    pub fn new(parties: usize) -> Self {
        Self {
            barrier: Barrier::new(parties),
        }
    }

    pub fn arrive(&self) {
        self.barrier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lifecycle_transitions() {
        let t = RuntimeThread::new();
        assert_eq!(t.status(), IDLE);
        t.make_runnable();
        assert!(t.start_running());
        assert_eq!(t.status(), RUNNING);
        assert!(!t.start_running());
    }

    #[test]
    fn suspend_round_trip() {
        let t = Arc::new(RuntimeThread::new());
        t.make_runnable();
        assert!(t.start_running());
        assert!(t.request_suspend());

        let worker = {
            let t = t.clone();
            std::thread::spawn(move || t.safepoint())
        };

        // wait for the worker to park, take ownership, resume it
        while t.status() != PREEMPTED {
            std::hint::spin_loop();
        }
        assert!(t.acknowledge_preempted());
        assert!(!t.acknowledge_preempted());
        t.resume();
        worker.join().unwrap();
        assert_eq!(t.status(), RUNNING);
    }

    #[test]
    fn safepoint_without_request_is_free() {
        let t = RuntimeThread::new();
        t.make_runnable();
        t.start_running();
        t.safepoint();
        assert_eq!(t.status(), RUNNING);
    }
}
