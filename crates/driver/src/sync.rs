//! Interruptible blocking primitives
//!
//! Every wait a caller can get stuck in (the I/O mutex, write admission, the
//! read-completion wait) goes through a [`Monitor`] and can be abandoned by
//! raising the caller's [`Interrupt`]. Interrupted waits return a distinct
//! result instead of retrying silently.
//!
//! Completion context only ever uses the non-waiting half of these types
//! (`lock`, `notify_all`, `Semaphore::release`), whose critical sections are
//! a handful of field updates.

use crate::error::DriverError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of a wait abandoned because its interrupt was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl From<Interrupted> for DriverError {
    fn from(_: Interrupted) -> Self {
        DriverError::Interrupted
    }
}

/// Something a raised interrupt must wake up
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// Cancellation signal for blocking driver calls
///
/// Cloning yields another handle to the same signal. Once raised, every
/// current and future interruptible wait observing it fails with
/// [`DriverError::Interrupted`] until [`clear`](Interrupt::clear) is called.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Default)]
struct InterruptInner {
    raised: AtomicBool,
    next_watch: AtomicU64,
    watchers: Mutex<Vec<(u64, Arc<dyn Wake>)>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every wait currently watching it
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        // Snapshot so no watcher lock is held while waking
        let watchers: Vec<Arc<dyn Wake>> = lock(&self.inner.watchers)
            .iter()
            .map(|(_, watcher)| Arc::clone(watcher))
            .collect();
        for watcher in watchers {
            watcher.wake();
        }
    }

    pub fn clear(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    fn watch(&self, target: Arc<dyn Wake>) -> Watch<'_> {
        let id = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.watchers).push((id, target));
        Watch {
            interrupt: self,
            id,
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

/// Registration of a wait with an interrupt; removed on drop
struct Watch<'a> {
    interrupt: &'a Interrupt,
    id: u64,
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        lock(&self.interrupt.inner.watchers).retain(|(id, _)| *id != self.id);
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mutex paired with a condition variable
pub(crate) struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        lock(&self.state)
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Wait, without interruption, until `ready` holds
    pub(crate) fn wait_until_ready<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        self.cond
            .wait_while(guard, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for `ready` to hold
    ///
    /// Returns the guard and whether `ready` held when the wait ended.
    pub(crate) fn wait_timeout_until<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'a, T>, bool) {
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner);
        let done = ready(&mut guard);
        (guard, done)
    }
}

impl<T: Send + 'static> Monitor<T> {
    /// Wait until `ready` holds or `interrupt` is raised
    ///
    /// A wait whose condition already holds succeeds even if the interrupt
    /// is raised.
    pub(crate) fn wait_until<'a>(
        self: &'a Arc<Self>,
        mut guard: MutexGuard<'a, T>,
        interrupt: &Interrupt,
        mut ready: impl FnMut(&mut T) -> bool,
    ) -> Result<MutexGuard<'a, T>, Interrupted> {
        if ready(&mut guard) {
            return Ok(guard);
        }

        let _watch = interrupt.watch(Arc::clone(self) as Arc<dyn Wake>);
        loop {
            if interrupt.is_raised() {
                return Err(Interrupted);
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
            if ready(&mut guard) {
                return Ok(guard);
            }
        }
    }
}

impl<T: Send> Wake for Monitor<T> {
    fn wake(&self) {
        // Taking the lock orders this wake after any in-progress check of
        // the interrupt flag by a waiter.
        let _guard = self.lock();
        self.cond.notify_all();
    }
}

/// Sleeping mutex guarding submission against detach
///
/// Unlike `std::sync::Mutex`, the guard owns its lock, so it can be held
/// across calls (pre-reset to post-reset) and acquisition can be
/// interrupted.
pub(crate) struct IoMutex {
    monitor: Arc<Monitor<bool>>,
}

impl IoMutex {
    pub(crate) fn new() -> Self {
        Self {
            monitor: Arc::new(Monitor::new(false)),
        }
    }

    pub(crate) fn lock(&self) -> IoGuard {
        let guard = self.monitor.lock();
        let mut locked = self.monitor.wait_until_ready(guard, |locked| !*locked);
        *locked = true;
        drop(locked);

        IoGuard {
            monitor: Arc::clone(&self.monitor),
        }
    }

    pub(crate) fn lock_interruptible(&self, interrupt: &Interrupt) -> Result<IoGuard, Interrupted> {
        let guard = self.monitor.lock();
        let mut locked = self
            .monitor
            .wait_until(guard, interrupt, |locked| !*locked)?;
        *locked = true;
        drop(locked);

        Ok(IoGuard {
            monitor: Arc::clone(&self.monitor),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        *self.monitor.lock()
    }
}

/// Owned hold on an [`IoMutex`]
#[must_use = "the I/O mutex is released when the guard is dropped"]
pub(crate) struct IoGuard {
    monitor: Arc<Monitor<bool>>,
}

impl Drop for IoGuard {
    fn drop(&mut self) {
        *self.monitor.lock() = false;
        self.monitor.notify_all();
    }
}

impl fmt::Debug for IoGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IoGuard")
    }
}

/// Why a permit could not be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireError {
    /// Blocking acquire abandoned by the caller's interrupt
    Interrupted,
    /// The semaphore was closed by detach
    Closed,
    /// Non-blocking acquire found no free permit
    NoPermits,
}

impl From<AcquireError> for DriverError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Interrupted => DriverError::Interrupted,
            AcquireError::Closed => DriverError::Detached,
            AcquireError::NoPermits => DriverError::WouldBlock,
        }
    }
}

struct SemaphoreState {
    permits: usize,
    closed: bool,
}

/// Counting semaphore bounding outstanding writes
pub(crate) struct Semaphore {
    monitor: Arc<Monitor<SemaphoreState>>,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            monitor: Arc::new(Monitor::new(SemaphoreState {
                permits,
                closed: false,
            })),
        }
    }

    pub(crate) fn acquire(&self, interrupt: &Interrupt) -> Result<Permit<'_>, AcquireError> {
        let guard = self.monitor.lock();
        let mut state = self
            .monitor
            .wait_until(guard, interrupt, |state| state.closed || state.permits > 0)
            .map_err(|_| AcquireError::Interrupted)?;
        if state.closed {
            return Err(AcquireError::Closed);
        }
        state.permits -= 1;
        Ok(Permit { semaphore: self })
    }

    pub(crate) fn try_acquire(&self) -> Result<Permit<'_>, AcquireError> {
        let mut state = self.monitor.lock();
        if state.closed {
            return Err(AcquireError::Closed);
        }
        if state.permits == 0 {
            return Err(AcquireError::NoPermits);
        }
        state.permits -= 1;
        Ok(Permit { semaphore: self })
    }

    /// Return one permit; safe from completion context
    pub(crate) fn release(&self) {
        self.monitor.lock().permits += 1;
        self.monitor.notify_all();
    }

    /// Fail current and future blocking acquires with [`AcquireError::Closed`]
    pub(crate) fn close(&self) {
        self.monitor.lock().closed = true;
        self.monitor.notify_all();
    }

    pub(crate) fn available(&self) -> usize {
        self.monitor.lock().permits
    }
}

/// One admission permit; returned on drop unless handed off with `forget`
#[must_use = "the permit is released when dropped"]
pub(crate) struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Permit<'_> {
    /// Keep the permit taken; whoever owns the work releases it later
    pub(crate) fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_semaphore_try_acquire_exhausts() {
        let sem = Semaphore::new(2);
        let a = sem.try_acquire().unwrap();
        let _b = sem.try_acquire().unwrap();
        assert_eq!(sem.try_acquire().err(), Some(AcquireError::NoPermits));

        drop(a);
        assert_eq!(sem.available(), 1);
        assert!(sem.try_acquire().is_ok());
    }

    #[test]
    fn test_permit_forget_keeps_permit_taken() {
        let sem = Semaphore::new(1);
        sem.try_acquire().unwrap().forget();
        assert_eq!(sem.available(), 0);

        sem.release();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn test_semaphore_close_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                let result = sem.acquire(&Interrupt::new()).map(|p| p.forget());
                tx.send(result).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        sem.close();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(AcquireError::Closed));
        waiter.join().unwrap();
    }

    #[test]
    fn test_interrupt_wakes_semaphore_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let interrupt = Interrupt::new();
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let sem = Arc::clone(&sem);
            let interrupt = interrupt.clone();
            thread::spawn(move || {
                let result = sem.acquire(&interrupt).map(|p| p.forget());
                tx.send(result).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        interrupt.raise();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(AcquireError::Interrupted));
        waiter.join().unwrap();
        assert!(lock(&interrupt.inner.watchers).is_empty());
    }

    #[test]
    fn test_io_mutex_interruptible() {
        let io = Arc::new(IoMutex::new());
        let held = io.lock();
        assert!(io.is_locked());

        let interrupt = Interrupt::new();
        interrupt.raise();
        assert!(io.lock_interruptible(&interrupt).is_err());

        drop(held);
        assert!(!io.is_locked());
        // Free lock is taken even with the interrupt raised
        let again = io.lock_interruptible(&interrupt).unwrap();
        drop(again);
    }

    #[test]
    fn test_io_mutex_hands_over() {
        let io = Arc::new(IoMutex::new());
        let held = io.lock();
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let io = Arc::clone(&io);
            thread::spawn(move || {
                let _guard = io.lock();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_until() {
        let monitor = Monitor::new(0u32);
        let guard = monitor.lock();
        let (_guard, done) =
            monitor.wait_timeout_until(guard, Duration::from_millis(10), |v| *v > 0);
        assert!(!done);
    }
}
