//! Elapsed-seconds ticker for the item currently playing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use sampler_types::PlayerEvent;

/// Shared elapsed counter, readable from any thread.
///
/// Updates and their reports happen under one lock so reports leave in counter order.
#[derive(Clone, Debug, Default)]
pub struct ElapsedClock {
    seconds: Arc<AtomicU64>,
    report: Arc<Mutex<()>>,
}

impl ElapsedClock {
    pub fn get(&self) -> u64 {
        self.seconds.load(Ordering::Relaxed)
    }

    fn reset(&self, events: &Sender<PlayerEvent>) {
        let _guard = self.report.lock().unwrap();
        self.seconds.store(0, Ordering::Relaxed);
        let _ = events.send(PlayerEvent::Elapsed { seconds: 0 });
    }

    fn tick(&self, events: &Sender<PlayerEvent>) {
        let _guard = self.report.lock().unwrap();
        let seconds = self.seconds.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = events.send(PlayerEvent::Elapsed { seconds });
    }
}

enum TimerCommand {
    Reset,
}

/// Background ticker reporting [`PlayerEvent::Elapsed`] once per interval.
pub struct ProgressTimer {
    clock: ElapsedClock,
    events: Sender<PlayerEvent>,
    control: Option<Sender<TimerCommand>>,
    join: Option<JoinHandle<()>>,
}

impl ProgressTimer {
    pub fn start(interval: Duration, events: Sender<PlayerEvent>) -> Self {
        let clock = ElapsedClock::default();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let thread_clock = clock.clone();
        let thread_events = events.clone();
        let join = thread::Builder::new()
            .name("sampler-timer".to_string())
            .spawn(move || run_ticker(interval, thread_clock, thread_events, control_rx))
            .map_err(|e| tracing::error!(error = %e, "timer thread spawn failed"))
            .ok();
        Self {
            clock,
            events,
            control: Some(control_tx),
            join,
        }
    }

    pub fn clock(&self) -> ElapsedClock {
        self.clock.clone()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.clock.get()
    }

    /// Zero the counter, report `0` immediately and restart the tick interval.
    pub fn reset(&self) {
        self.clock.reset(&self.events);
        if let Some(control) = &self.control {
            let _ = control.send(TimerCommand::Reset);
        }
    }

    /// Stop ticking and wait for the thread.
    pub fn stop(&mut self) {
        self.control.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProgressTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticker(
    interval: Duration,
    clock: ElapsedClock,
    events: Sender<PlayerEvent>,
    control: Receiver<TimerCommand>,
) {
    let mut deadline = Instant::now() + interval;
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        crossbeam_channel::select! {
            recv(control) -> msg => match msg {
                Ok(TimerCommand::Reset) => deadline = Instant::now() + interval,
                Err(_) => break,
            },
            default(wait) => {
                clock.tick(&events);
                deadline += interval;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_elapsed(rx: &Receiver<PlayerEvent>) -> u64 {
        match rx.recv_timeout(Duration::from_secs(2)).expect("timer event") {
            PlayerEvent::Elapsed { seconds } => seconds,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ticks_count_up_after_reset_and_reset_reports_zero() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut timer = ProgressTimer::start(Duration::from_millis(20), tx);

        timer.reset();
        // Drop any ticks that raced with the reset.
        let mut seen = next_elapsed(&rx);
        while seen != 0 {
            seen = next_elapsed(&rx);
        }
        let ticks: Vec<u64> = (0..5).map(|_| next_elapsed(&rx)).collect();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5]);

        timer.reset();
        let mut after = next_elapsed(&rx);
        while after > 5 {
            after = next_elapsed(&rx);
        }
        assert_eq!(after, 0);
        assert_eq!(next_elapsed(&rx), 1);

        timer.stop();
    }

    #[test]
    fn elapsed_seconds_tracks_the_clock() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut timer = ProgressTimer::start(Duration::from_millis(10), tx);
        timer.reset();
        while next_elapsed(&rx) < 3 {}
        assert!(timer.elapsed_seconds() >= 3);
        timer.reset();
        assert!(timer.elapsed_seconds() <= 1);
        timer.stop();
    }

    #[test]
    fn stop_ends_the_thread_promptly() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut timer = ProgressTimer::start(Duration::from_secs(3600), tx);
        let started = Instant::now();
        timer.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }
}
