use alloc::{sync::Arc, vec::Vec};
use futures::channel::oneshot::{channel, Receiver, Sender};

pub use futures::lock::{Mutex, MutexGuard};
pub use spin::Mutex as SpinMutex;

/// An error returned by a locking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// This handle does not hold the lock
    NotLocked,
    /// Lock is held by another handle
    LockedByOther,
    /// Device is used by other handle but not locked
    Busy,
    /// Timed out
    Timeout,
}

/// Exclusive lock over a single device.
///
/// At most one [LockHandle] may hold the lock at any time. Handles waiting for the lock are
/// woken whenever it is released.
pub struct DeviceLock {
    id_counter: u32,
    owner: Option<u32>,
    event: Vec<Sender<()>>,
}

impl DeviceLock {
    pub fn new() -> Arc<SpinMutex<DeviceLock>> {
        Arc::new(SpinMutex::new(DeviceLock {
            id_counter: 0,
            owner: None,
            event: Vec::new(),
        }))
    }

    /// Id of the handle currently holding the lock, if any.
    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.owner
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    fn notify_release(&mut self) {
        for sender in self.event.drain(..) {
            let _ = sender.send(());
        }
    }

    fn listen(&mut self) -> Receiver<()> {
        // Waiters which gave up
        self.event.retain(|sender| !sender.is_canceled());
        let (sender, receiver) = channel();
        self.event.push(sender);
        receiver
    }

    fn next_id(&mut self) -> u32 {
        self.id_counter = self.id_counter.wrapping_add(1);
        self.id_counter
    }
}

/// A handle to a lockable device.
///
/// Checks the device lock before giving access to the device.
pub struct LockHandle<DEV> {
    id: u32,
    parent: Arc<SpinMutex<DeviceLock>>,
    device: Arc<Mutex<DEV>>,
    has_lock: bool,
}

impl<DEV> LockHandle<DEV> {
    /// Create a new lock handle for device using a device lock
    pub fn new(parent: Arc<SpinMutex<DeviceLock>>, device: Arc<Mutex<DEV>>) -> Self {
        let id = parent.lock().next_id();
        LockHandle {
            id,
            parent,
            device,
            has_lock: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Does this handle hold the device lock?
    #[must_use]
    pub fn has_lock(&self) -> bool {
        self.has_lock
    }

    /// Checks if the device is available, i.e. this handle holds the lock or nobody does.
    /// Another handle may still be using the device if no lock is active.
    pub fn can_lock(&self) -> Result<(), LockError> {
        let lock = self.parent.lock();
        match lock.owner {
            Some(owner) if owner != self.id => Err(LockError::LockedByOther),
            _ => Ok(()),
        }
    }

    /// Try to acquire the lock.
    /// Returns immediately, acquiring an already held lock succeeds.
    pub fn try_acquire(&mut self) -> Result<(), LockError> {
        let mut lock = self.parent.lock();
        match lock.owner {
            None => {
                lock.owner = Some(self.id);
                self.has_lock = true;
                log::trace!(id=self.id; "Acquired lock");
                Ok(())
            }
            Some(owner) if owner == self.id => Ok(()),
            Some(_) => Err(LockError::LockedByOther),
        }
    }

    /// Acquire the lock asynchronously, waiting for other handles to release it.
    pub async fn async_acquire(&mut self) -> Result<(), LockError> {
        let mut listener = None;

        loop {
            match self.try_acquire() {
                Ok(()) => break Ok(()),
                Err(LockError::LockedByOther) => match listener.take() {
                    None => {
                        // Start listening and then try locking again.
                        let mut lock = self.parent.lock();
                        listener = Some(lock.listen());
                    }
                    Some(l) => {
                        // Wait until a notification is received.
                        log::trace!(id=self.id; "Waiting to acquire lock...");
                        let _ = l.await;
                    }
                },
                Err(err) => break Err(err),
            }
        }
    }

    /// Release the lock.
    /// Returns an error if the lock is not held by this handle
    pub fn try_release(&mut self) -> Result<(), LockError> {
        if !self.has_lock {
            return Err(LockError::NotLocked);
        }
        let mut lock = self.parent.lock();
        if lock.owner == Some(self.id) {
            lock.owner = None;
        }
        self.has_lock = false;
        log::trace!(id=self.id; "Released lock");

        // Notify others waiting that lock might be available
        lock.notify_release();
        Ok(())
    }

    /// Release the lock, ignoring if not held
    pub fn force_release(&mut self) {
        let _res = self.try_release();
    }

    /// Check the lock and then try to get the device without waiting
    pub fn try_lock(&self) -> Result<MutexGuard<'_, DEV>, LockError> {
        self.can_lock()?;
        self.device.try_lock().ok_or(LockError::Busy)
    }

    /// Wait until the device is unlocked (or locked by this handle) and available
    pub async fn async_lock(&self) -> Result<MutexGuard<'_, DEV>, LockError> {
        let mut listener = None;

        loop {
            match self.can_lock() {
                // Allowed to try and lock
                Ok(()) => {
                    log::trace!(id=self.id; "Can lock, trying...");
                    let mut l = self.parent.lock().listen();

                    futures::select! {
                        // Device acquired
                        guard = self.device.lock() => {
                            // Someone may have grabbed the lock while we waited for the device
                            if self.can_lock().is_ok() {
                                log::trace!(id=self.id; "Locked!");
                                return Ok(guard)
                            }
                        },
                        // Interrupted by the lock being released
                        _event = l => {
                            log::trace!(id=self.id; "Lock interrupted, try again");
                        }
                    }
                }
                // Currently locked by someone else
                Err(LockError::LockedByOther) => match listener.take() {
                    None => {
                        let mut lock = self.parent.lock();
                        listener = Some(lock.listen());
                    }
                    Some(l) => {
                        let _ = l.await;
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}

impl<DEV> Drop for LockHandle<DEV> {
    fn drop(&mut self) {
        self.force_release()
    }
}
