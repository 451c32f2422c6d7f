//! One-shot terminal status cell with waiter notification.

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::InsertStatus;

/// Holds the insert's status and wakes observers on every state change.
///
/// The cell starts `Running` and accepts exactly one terminal write. The
/// notifier is shared with the other observable bits of the job (collision,
/// forwarded overload): observers tolerate spurious wakeups and re-check the
/// state they care about.
pub struct StatusCell {
    state: Mutex<InsertStatus>,
    changed: Notify,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InsertStatus::Running),
            changed: Notify::new(),
        }
    }

    pub fn get(&self) -> InsertStatus {
        *self.state.lock()
    }

    /// Writes the terminal status. Fails with the existing value if the cell
    /// was already finalized; callers treat that as a programming error.
    pub fn finish(&self, status: InsertStatus) -> Result<(), InsertStatus> {
        debug_assert!(status.is_terminal());
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return Err(*state);
            }
            *state = status;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Wakes all waiters without touching the status. Used when another
    /// observable bit of the job flips.
    pub fn notify(&self) {
        self.changed.notify_waiters();
    }

    /// Suspends until the cell holds a terminal status, then returns it.
    pub async fn wait_terminal(&self) -> InsertStatus {
        loop {
            // Arm the notification before checking, so a finish() landing
            // between the check and the await is not lost.
            let notified = self.changed.notified();
            let status = self.get();
            if status.is_terminal() {
                return status;
            }
            notified.await;
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
