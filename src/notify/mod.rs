pub mod timer;

use itertools::Itertools;
use log::{debug, error};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::notify::timer::NotificationTimer;

/// One periodic notification as defined by the content: fire every
/// `period_minutes`, the first time after `delay_minutes`. A delay of zero
/// means "one full period from the start" for the dispatch gate, while the
/// schedule math below folds the raw values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSpec {
    pub delay_minutes: u64,
    pub period_minutes: u64,
    pub title_key: String,
    pub message_key: String,
}

impl NotificationSpec {
    pub fn new(delay_minutes: u64, period_minutes: u64, title_key: &str, message_key: &str) -> Self {
        Self {
            delay_minutes,
            period_minutes,
            title_key: title_key.to_string(),
            message_key: message_key.to_string(),
        }
    }

    fn effective_delay(&self) -> u64 {
        if self.delay_minutes == 0 {
            self.period_minutes
        } else {
            self.delay_minutes
        }
    }
}

/// What ends up on the owning thread as a UI toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title_key: String,
    pub message_key: String,
    /// How many full periods have passed, handed to the message formatter.
    pub boundary: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationConfigError {
    #[error("the notification set is empty")]
    Empty,
    #[error("notification {title_key} has a period of zero minutes")]
    ZeroPeriod { title_key: String },
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// The derived schedule multiplexing all specs onto a single repeating tick.
/// Pure bookkeeping, the actual timer lives in [`timer`].
#[derive(Debug)]
pub struct NotificationSchedule {
    specs: Vec<NotificationSpec>,
    initial_delay: u64,
    tick_period: u64,
    /// Minutes accrued since the first firing was scheduled, advanced by
    /// `tick_period` per firing. Owned exclusively by the timer callback.
    elapsed: u64,
}

impl NotificationSchedule {
    pub fn new(specs: Vec<NotificationSpec>) -> Result<Self, NotificationConfigError> {
        if specs.is_empty() {
            return Err(NotificationConfigError::Empty);
        }
        if let Some(bad) = specs.iter().find(|spec| spec.period_minutes == 0) {
            // One broken spec disables the whole source, not just itself.
            return Err(NotificationConfigError::ZeroPeriod {
                title_key: bad.title_key.clone(),
            });
        }

        let initial_delay = specs
            .iter()
            .map(|spec| spec.delay_minutes)
            .min()
            .expect("specs not empty");
        let tick_period = specs
            .iter()
            .map(|spec| gcd(spec.delay_minutes - initial_delay, spec.period_minutes))
            .fold(0, gcd);

        Ok(Self {
            specs,
            initial_delay,
            tick_period,
            elapsed: 0,
        })
    }

    pub fn initial_delay(&self) -> u64 {
        self.initial_delay
    }

    pub fn tick_period(&self) -> u64 {
        self.tick_period
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Carries already-accrued minutes over from the schedule this one
    /// replaces, so reconfiguration neither loses nor double-counts progress.
    pub fn resume_at(&mut self, elapsed: u64) {
        self.elapsed = elapsed;
    }

    /// One timer firing. Scans the specs in table order and dispatches the
    /// first one that crossed a period boundary during this tick; the scan
    /// stops there, so at most one toast per firing even when several specs
    /// cross simultaneously.
    pub fn on_tick(&mut self) -> Option<Toast> {
        let before = self.elapsed;
        let after = before + self.tick_period;
        let mut toast = None;
        for spec in &self.specs {
            let delay = spec.effective_delay();
            if before < delay {
                continue;
            }
            let boundary_before = (before - delay) / spec.period_minutes;
            let boundary_after = (after - delay) / spec.period_minutes;
            if boundary_before != boundary_after {
                toast = Some(Toast {
                    title_key: spec.title_key.clone(),
                    message_key: spec.message_key.clone(),
                    boundary: boundary_after,
                });
                break;
            }
        }
        self.elapsed = after;
        toast
    }
}

/// Content-defined notification table: entries keyed by arbitrary string
/// tags, selected by predicate into the live spec list.
#[derive(Debug, Default)]
pub struct NotificationTable {
    entries: Vec<(String, NotificationSpec)>,
}

impl NotificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, spec: NotificationSpec) {
        self.entries.push((tag.into(), spec));
    }

    /// Selection keeps table order, which is also dispatch priority.
    pub fn select(&self, predicate: impl Fn(&str) -> bool) -> Vec<NotificationSpec> {
        self.entries
            .iter()
            .filter(|(tag, _)| predicate(tag))
            .map(|(_, spec)| spec.clone())
            .collect_vec()
    }
}

/// Owns the derived schedule and the background timer thread, and hands
/// dispatched toasts to the owning thread through a channel. The timer
/// thread itself never touches foreground state.
pub struct NotificationScheduler {
    schedule: Arc<Mutex<Option<NotificationSchedule>>>,
    timer: Option<NotificationTimer>,
    toast_tx: Sender<Toast>,
    toast_rx: Option<Receiver<Toast>>,
}

impl NotificationScheduler {
    pub fn new() -> Self {
        let (toast_tx, toast_rx) = channel();
        Self {
            schedule: Arc::new(Mutex::new(None)),
            timer: None,
            toast_tx,
            toast_rx: Some(toast_rx),
        }
    }

    /// (Re)configures the scheduler from the current content. Already
    /// accrued minutes survive reconfiguration; a zero-period spec disables
    /// the whole source.
    pub fn configure(&mut self, specs: Vec<NotificationSpec>) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }

        let elapsed = {
            let guard = self.schedule.lock().expect("lock poisoned");
            guard.as_ref().map(NotificationSchedule::elapsed).unwrap_or(0)
        };

        match NotificationSchedule::new(specs) {
            Ok(mut schedule) => {
                schedule.resume_at(elapsed);
                let first_wait = if elapsed == 0 {
                    schedule.initial_delay()
                } else {
                    schedule.tick_period()
                };
                let tick = schedule.tick_period();
                *self.schedule.lock().expect("lock poisoned") = Some(schedule);
                self.timer = Some(NotificationTimer::spawn(
                    self.schedule.clone(),
                    self.toast_tx.clone(),
                    first_wait,
                    tick,
                ));
            }
            Err(NotificationConfigError::Empty) => {
                debug!("No notifications configured, timer stays off");
                *self.schedule.lock().expect("lock poisoned") = None;
            }
            Err(error @ NotificationConfigError::ZeroPeriod { .. }) => {
                error!("Disabling notifications: {}", error);
                *self.schedule.lock().expect("lock poisoned") = None;
            }
        }
    }

    /// Owning thread only: collects the toasts the timer dispatched since
    /// the last pump. Returns nothing once the scheduler was shut down.
    pub fn drain_toasts(&mut self) -> Vec<Toast> {
        match &self.toast_rx {
            Some(receiver) => receiver.try_iter().collect_vec(),
            None => Vec::new(),
        }
    }

    /// Cancels the timer. Any firing that already raced into the channel is
    /// discarded with the receiver, so nothing dispatches after this.
    pub fn shutdown(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.toast_rx = None;
    }
}

impl Default for NotificationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(delay: u64, period: u64, key: &str) -> NotificationSpec {
        NotificationSpec::new(delay, period, key, key)
    }

    #[test]
    fn schedule_derivation_via_gcd() {
        let schedule = NotificationSchedule::new(vec![spec(0, 60, "hourly"), spec(30, 90, "ninety")])
            .expect("valid schedule");
        assert_eq!(schedule.initial_delay(), 0);
        assert_eq!(schedule.tick_period(), 30);
    }

    #[test]
    fn zero_period_disables_the_whole_set() {
        let error = NotificationSchedule::new(vec![spec(0, 60, "fine"), spec(5, 0, "broken")])
            .expect_err("zero period rejected");
        assert_eq!(
            error,
            NotificationConfigError::ZeroPeriod {
                title_key: "broken".to_string()
            }
        );
    }

    #[test]
    fn empty_set_is_rejected() {
        assert_eq!(
            NotificationSchedule::new(Vec::new()).expect_err("empty rejected"),
            NotificationConfigError::Empty
        );
    }

    #[test]
    fn zero_delay_spec_waits_a_full_period() {
        let mut schedule = NotificationSchedule::new(vec![spec(0, 60, "hourly"), spec(30, 90, "ninety")])
            .expect("valid schedule");

        // Ticks ending at 30, 60 and 90 minutes: no boundary crossed yet.
        assert_eq!(schedule.on_tick(), None);
        assert_eq!(schedule.on_tick(), None);
        assert_eq!(schedule.on_tick(), None);
        assert_eq!(schedule.elapsed(), 90);

        // At 120 the hourly spec crosses its first boundary and, scanning in
        // table order, wins the tick.
        let toast = schedule.on_tick().expect("toast at 120");
        assert_eq!(toast.title_key, "hourly");
        assert_eq!(toast.boundary, 1);
    }

    #[test]
    fn delayed_spec_dispatches_after_delay_plus_period() {
        let mut schedule =
            NotificationSchedule::new(vec![spec(30, 90, "ninety")]).expect("valid schedule");
        assert_eq!(schedule.initial_delay(), 30);
        assert_eq!(schedule.tick_period(), 90);

        // First firing: elapsed 0 -> 90, still inside the first period.
        assert_eq!(schedule.on_tick(), None);
        // Second firing: 90 -> 180, (elapsed - delay) crosses 90.
        let toast = schedule.on_tick().expect("toast");
        assert_eq!(toast.title_key, "ninety");
        assert_eq!(toast.boundary, 1);
    }

    #[test]
    fn only_the_first_crossing_spec_fires_per_tick() {
        // Both specs cross a boundary at 120; table order decides, the
        // second crossing is skipped for this firing.
        let mut schedule = NotificationSchedule::new(vec![spec(0, 60, "first"), spec(0, 60, "second")])
            .expect("valid schedule");
        assert_eq!(schedule.tick_period(), 60);

        assert_eq!(schedule.on_tick(), None); // 0 -> 60, gate still closed
        let toast = schedule.on_tick().expect("toast at 120");
        assert_eq!(toast.title_key, "first");

        // Next crossing: "first" wins again, "second" is starved. That is
        // the table-order policy, preserved on purpose.
        let toast = schedule.on_tick().expect("toast at 180");
        assert_eq!(toast.title_key, "first");
    }

    #[test]
    fn reconfigure_preserves_elapsed() {
        let mut scheduler = NotificationScheduler::new();
        scheduler.configure(vec![spec(45, 45, "a")]);
        {
            let mut guard = scheduler.schedule.lock().expect("lock poisoned");
            guard.as_mut().expect("schedule live").resume_at(45);
        }

        scheduler.configure(vec![spec(30, 60, "b")]);
        let guard = scheduler.schedule.lock().expect("lock poisoned");
        assert_eq!(guard.as_ref().expect("schedule live").elapsed(), 45);
    }

    #[test]
    fn shutdown_discards_a_queued_firing() {
        let mut scheduler = NotificationScheduler::new();

        // Wire the timer up by hand with a schedule that is already due, so
        // the first firing dispatches immediately instead of minutes out.
        let mut schedule = NotificationSchedule::new(vec![spec(30, 90, "late")]).expect("valid schedule");
        schedule.resume_at(120);
        *scheduler.schedule.lock().expect("lock poisoned") = Some(schedule);
        scheduler.timer = Some(NotificationTimer::spawn(
            scheduler.schedule.clone(),
            scheduler.toast_tx.clone(),
            0,
            90,
        ));

        // The timer sends the toast under the schedule lock, so once we
        // observe the advanced elapsed the toast already sits in the channel.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let elapsed = {
                let guard = scheduler.schedule.lock().expect("lock poisoned");
                guard.as_ref().expect("schedule live").elapsed()
            };
            if elapsed > 120 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "timer never fired");
            std::thread::yield_now();
        }

        scheduler.shutdown();
        assert!(scheduler.drain_toasts().is_empty());
    }

    #[test]
    fn reconfigure_with_zero_period_disables() {
        let mut scheduler = NotificationScheduler::new();
        scheduler.configure(vec![spec(45, 45, "a")]);
        scheduler.configure(vec![spec(0, 0, "broken")]);
        assert!(scheduler.schedule.lock().expect("lock poisoned").is_none());
        assert!(scheduler.timer.is_none());
    }

    #[test]
    fn table_selection_keeps_order() {
        let mut table = NotificationTable::new();
        table.insert("realm.maintenance", spec(0, 60, "maintenance"));
        table.insert("trial.reminder", spec(30, 90, "trial"));
        table.insert("realm.shutdown", spec(5, 10, "shutdown"));

        let selected = table.select(|tag| tag.starts_with("realm."));
        assert_eq!(
            selected.iter().map(|s| s.title_key.as_str()).collect_vec(),
            vec!["maintenance", "shutdown"]
        );
    }
}
