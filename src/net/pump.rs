//! Pacing pump for the redundant sender.
//!
//! The sender itself is synchronous; this pump is the one cooperative
//! suspension point of the send path. It wakes at the pacing cadence,
//! reads the pipeline clock and ticks the sender. Dropping the returned
//! handle (or calling [`PumpHandle::shutdown`]) cancels the pump.

use crate::av::clock::{UClock, UCLOCK_FREQ};
use crate::net::sender::RedundantSender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pump period: one millisecond of the 27 MHz clock
pub const PUMP_PERIOD: u64 = UCLOCK_FREQ / 1000;

/// Cancellation handle of a running pump
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PumpHandle {
    /// Stops the pump and waits for it to finish
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawns the pacing pump on the current tokio runtime.
///
/// The sender is shared with the producer side behind a mutex; each
/// wake ticks it once with the clock's current value.
pub fn spawn_sender_pump(
    sender: Arc<Mutex<RedundantSender>>,
    clock: Arc<dyn UClock>,
) -> PumpHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let task = tokio::spawn(async move {
        let period = Duration::from_nanos(PUMP_PERIOD * 1000 / 27);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let now = clock.now();
            sender.lock().tick(now);
        }
    });

    PumpHandle {
        stop,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::clock::TestClock;
    use crate::net::sender::SenderMode;

    #[test]
    fn test_pump_ticks_and_stops() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let sender = Arc::new(Mutex::new(RedundantSender::new(SenderMode::Hbrmt)));
            let clock: Arc<dyn UClock> = Arc::new(TestClock::new(0));

            let pump = spawn_sender_pump(Arc::clone(&sender), clock);
            tokio::time::sleep(Duration::from_millis(5)).await;
            pump.shutdown().await;
        });
    }
}
