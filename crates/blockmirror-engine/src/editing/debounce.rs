use std::time::{Duration, Instant};

/// Idle-tick deferral for re-parsing after edits.
///
/// Every edit pushes the deadline back; the host polls [`Debouncer::take_due`]
/// from its idle hook and runs the deferred work once the text has been quiet
/// for `delay`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    last_edit: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_edit: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_edit = Some(now);
    }

    pub fn is_pending(&self) -> bool {
        self.last_edit.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_edit
            .is_some_and(|at| now.saturating_duration_since(at) >= self.delay)
    }

    /// True exactly once per quiet period
    pub fn take_due(&mut self, now: Instant) -> bool {
        let due = self.is_due(now);
        if due {
            self.last_edit = None;
        }
        due
    }

    pub fn cancel(&mut self) {
        self.last_edit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        assert!(!debouncer.take_due(start));

        debouncer.touch(start);
        assert!(!debouncer.take_due(start + Duration::from_millis(100)));

        debouncer.touch(start + Duration::from_millis(200));
        assert!(!debouncer.take_due(start + Duration::from_millis(400)));
        assert!(debouncer.take_due(start + Duration::from_millis(500)));
        assert!(!debouncer.take_due(start + Duration::from_millis(900)));
    }
}
