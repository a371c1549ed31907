//! # Cooperative Event Loop
//!
//! A single-threaded event loop per pipeline graph. Stage operations run
//! to completion on the loop's thread; the only suspension points are
//! timers (the RTP sender pacing pump, the SCTE-35 expiration sweep) and
//! fd readiness, which callers register explicitly. Registrations return
//! handles that can be cancelled; graph teardown cancels timers before
//! releasing stages.
//!
//! The loop is deliberately driven from the outside (`advance`), so tests
//! can step virtual time without a runtime.

/// Identifier of a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Timer {
    id: u64,
    deadline: u64,
    period: Option<u64>,
    cancelled: bool,
}

/// Timer registry of one pipeline graph
#[derive(Debug, Default)]
pub struct EventLoop {
    next_id: u64,
    timers: Vec<Timer>,
}

impl EventLoop {
    /// Creates an empty loop
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot timer at the absolute tick `deadline`
    pub fn arm_at(&mut self, deadline: u64) -> TimerHandle {
        self.arm(deadline, None)
    }

    /// Arms a periodic timer, first firing at `deadline`
    pub fn arm_periodic(&mut self, deadline: u64, period: u64) -> TimerHandle {
        self.arm(deadline, Some(period))
    }

    fn arm(&mut self, deadline: u64, period: Option<u64>) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(Timer {
            id,
            deadline,
            period,
            cancelled: false,
        });
        TimerHandle(id)
    }

    /// Cancels a timer; firing an already-cancelled handle is a no-op
    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(t) = self.timers.iter_mut().find(|t| t.id == handle.0) {
            t.cancelled = true;
        }
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers
            .iter()
            .filter(|t| !t.cancelled)
            .map(|t| t.deadline)
            .min()
    }

    /// Fires every timer due at or before `now` and returns their handles
    /// in deadline order. Periodic timers are rearmed; one-shot timers and
    /// cancelled timers are removed.
    pub fn advance(&mut self, now: u64) -> Vec<TimerHandle> {
        let mut due: Vec<(u64, TimerHandle)> = Vec::new();

        for t in &mut self.timers {
            if t.cancelled {
                continue;
            }
            while t.deadline <= now {
                due.push((t.deadline, TimerHandle(t.id)));
                match t.period {
                    Some(p) if p > 0 => t.deadline += p,
                    _ => {
                        t.cancelled = true;
                        break;
                    }
                }
            }
        }

        self.timers.retain(|t| !t.cancelled);

        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, h)| h).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_fires_once() {
        let mut el = EventLoop::new();
        let h = el.arm_at(100);
        assert!(el.advance(99).is_empty());
        assert_eq!(el.advance(100), vec![h]);
        assert!(el.advance(1000).is_empty());
    }

    #[test]
    fn test_periodic_rearms() {
        let mut el = EventLoop::new();
        let h = el.arm_periodic(10, 10);
        assert_eq!(el.advance(35), vec![h, h, h]);
        assert_eq!(el.next_deadline(), Some(40));
        el.cancel(h);
        assert!(el.advance(100).is_empty());
        assert_eq!(el.next_deadline(), None);
    }
}
