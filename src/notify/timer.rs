use crate::notify::{NotificationSchedule, Toast};
use log::{trace, warn};
use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

fn minutes(count: u64) -> Duration {
    Duration::from_secs(60 * count)
}

/// The repeating timer behind the notification scheduler. Lives on its own
/// named thread and only ever talks to the owning thread through the toast
/// channel; cancellation wakes the thread immediately and wins every race
/// against a due firing.
pub struct NotificationTimer {
    cancel_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl NotificationTimer {
    pub fn spawn(
        schedule: Arc<Mutex<Option<NotificationSchedule>>>,
        toast_tx: Sender<Toast>,
        first_wait_minutes: u64,
        tick_period_minutes: u64,
    ) -> Self {
        let (cancel_tx, cancel_rx) = channel();
        let handle = std::thread::Builder::new()
            .name("Notification Timer".into())
            .spawn(move || {
                let mut wait = minutes(first_wait_minutes);
                loop {
                    match cancel_rx.recv_timeout(wait) {
                        // Cancelled, or the scheduler is gone entirely.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => {
                            let mut guard = schedule.lock().expect("lock poisoned");
                            let Some(schedule) = guard.as_mut() else {
                                return; // reconfigured away under us
                            };
                            if let Some(toast) = schedule.on_tick() {
                                trace!("Dispatching notification {}", toast.title_key);
                                if toast_tx.send(toast).is_err() {
                                    return; // owning side shut down
                                }
                            }
                            wait = minutes(tick_period_minutes);
                        }
                    }
                }
            })
            .expect("Notification Timer thread to spawn");

        Self { cancel_tx, handle }
    }

    /// Stops the timer and waits for the thread to exit, so no firing can
    /// sneak in after this returns.
    pub fn cancel(self) {
        // The thread may already have exited on its own, that is fine.
        let _ = self.cancel_tx.send(());
        if self.handle.join().is_err() {
            warn!("Notification Timer thread panicked before cancellation");
        }
    }
}
