use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

type Resume = Box<dyn Fn() + Send + Sync + 'static>;

/// Suppresses periodic ticks while a multi-step operation runs. A tick
/// requested during the window is remembered and re-issued once, when the
/// last guard is released.
#[derive(Default)]
pub struct CounterGate {
    disabled: AtomicUsize,
    deferred: AtomicBool,
    resume: OnceLock<Resume>,
}

impl CounterGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the action used to re-issue a deferred tick. Only the first
    /// installation takes effect.
    pub fn set_resume<F>(&self, resume: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.resume.set(Box::new(resume)).is_err() {
            log::warn!("[qsp_engine::counter] resume action already installed");
        }
    }

    pub fn disable(self: &Arc<Self>) -> CounterGuard {
        self.disabled.fetch_add(1, Ordering::SeqCst);
        CounterGuard { gate: self.clone() }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst) > 0
    }

    /// Records a tick that arrived while disabled. Returns false when the
    /// gate was open and the caller should run the tick itself.
    pub fn defer_if_disabled(&self) -> bool {
        if !self.is_disabled() {
            return false;
        }
        self.deferred.store(true, Ordering::SeqCst);
        if !self.is_disabled() {
            // The window closed between the check and the store.
            self.flush();
        }
        true
    }

    fn flush(&self) {
        if self.deferred.swap(false, Ordering::SeqCst) {
            match self.resume.get() {
                Some(resume) => resume(),
                None => log::debug!("[qsp_engine::counter] deferred tick dropped: no resume action"),
            }
        }
    }
}

/// Keeps the gate disabled until dropped, on every exit path.
#[must_use = "the counter is re-enabled as soon as the guard is dropped"]
pub struct CounterGuard {
    gate: Arc<CounterGate>,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        if self.gate.disabled.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.flush();
        }
    }
}

/// Monotonic millisecond counter handed to the engine on each tick.
#[derive(Debug, Clone, Default)]
pub struct MsClock {
    session_start: Option<Instant>,
    last_call: Option<Instant>,
}

impl MsClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a (re)started session.
    pub fn restart(&mut self, now: Instant) {
        self.session_start = Some(now);
        self.last_call = None;
    }

    /// Milliseconds since the previous call, or since the session start for
    /// the first call. Never negative; zero before any session started.
    pub fn elapsed_ms(&mut self, now: Instant) -> u32 {
        let since = self.last_call.or(self.session_start).unwrap_or(now);
        self.last_call = Some(now);
        let millis = now.saturating_duration_since(since).as_millis();
        u32::try_from(millis).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn deferred_tick_resumes_once_when_last_guard_drops() {
        let gate = Arc::new(CounterGate::new());
        let resumed = Arc::new(AtomicUsize::new(0));
        {
            let resumed = resumed.clone();
            gate.set_resume(move || {
                resumed.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(!gate.defer_if_disabled());

        let outer = gate.disable();
        let inner = gate.disable();
        assert!(gate.defer_if_disabled());
        assert!(gate.defer_if_disabled());
        drop(inner);
        assert_eq!(resumed.load(Ordering::SeqCst), 0);
        drop(outer);
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert!(!gate.is_disabled());
    }

    #[test]
    fn guard_reenables_on_panic() {
        let gate = Arc::new(CounterGate::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = gate.disable();
            panic!("load failed");
        }));
        assert!(result.is_err());
        assert!(!gate.is_disabled());
    }

    #[test]
    fn clock_measures_from_session_start_then_previous_call() {
        let start = Instant::now();
        let mut clock = MsClock::new();
        clock.restart(start);
        assert_eq!(clock.elapsed_ms(start + Duration::from_millis(250)), 250);
        assert_eq!(clock.elapsed_ms(start + Duration::from_millis(400)), 150);
    }

    #[test]
    fn clock_never_goes_negative() {
        let start = Instant::now();
        let mut clock = MsClock::new();
        clock.restart(start + Duration::from_millis(100));
        assert_eq!(clock.elapsed_ms(start), 0);
        assert_eq!(clock.elapsed_ms(start + Duration::from_millis(5)), 5);
    }
}
