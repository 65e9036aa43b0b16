//! Timer scheduler.
//!
//! Each armed timer is a task that sleeps, then puts a timer event on the
//! runtime's event queue. The event is processed like any other message, in
//! arrival order.

use crate::coordinator::ScheduledTimer;
use crate::runtime::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owns the outstanding timer tasks.
pub struct TimerScheduler {
    events: mpsc::Sender<Event>,
    handles: Vec<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
}

impl TimerScheduler {
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self {
            events,
            handles: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arms a one-shot timer. Ignored once the scheduler is cancelled.
    ///
    /// Outside a tokio runtime the timer is logged and dropped.
    pub fn schedule(&mut self, timer: ScheduledTimer) {
        if self.cancelled.load(Ordering::Acquire) {
            tracing::debug!(machine = %timer.machine_id, timer = %timer.timer_id, "scheduler cancelled, timer dropped");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(machine = %timer.machine_id, timer = %timer.timer_id, "no tokio runtime, timer dropped");
            return;
        };

        self.handles.retain(|handle| !handle.is_finished());

        let events = self.events.clone();
        let cancelled = self.cancelled.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(timer.delay).await;
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            tracing::debug!(machine = %timer.machine_id, timer = %timer.timer_id, "timer fired");
            if events.send(Event::Timer(timer)).await.is_err() {
                tracing::debug!("event queue closed, timer event dropped");
            }
        });
        self.handles.push(handle);
    }

    /// Cancels every outstanding timer. Returns how many were still pending.
    pub fn cancel_all(&mut self) -> usize {
        self.cancelled.store(true, Ordering::Release);
        let mut pending = 0;
        for handle in self.handles.drain(..) {
            if !handle.is_finished() {
                pending += 1;
            }
            handle.abort();
        }
        pending
    }

    /// Number of timers that have not fired yet.
    pub fn outstanding(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
