//! Timer tasks with an explicit lifecycle.
//!
//! A timer is `Armed` while waiting, `Firing` while its callback runs and
//! `Retired` once it will never fire again. Retiring from outside cancels
//! the wait; a callback that finds its timer retired when it tries to
//! re-arm simply exits. Retiring twice is a no-op.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Armed,
    Firing,
    Retired,
}

/// What a timer callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Continue,
    Retire,
}

struct Inner {
    phase: Mutex<TimerPhase>,
    cancel: CancellationToken,
}

/// Shared lifecycle state of one timer task.
#[derive(Clone)]
pub struct TimerLifecycle {
    inner: Arc<Inner>,
}

impl TimerLifecycle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                phase: Mutex::new(TimerPhase::Armed),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn phase(&self) -> TimerPhase {
        *self.inner.phase.lock()
    }

    pub fn is_retired(&self) -> bool {
        self.phase() == TimerPhase::Retired
    }

    /// `Armed -> Firing`. False if the timer was retired.
    pub fn begin_fire(&self) -> bool {
        let mut phase = self.inner.phase.lock();
        match *phase {
            TimerPhase::Armed => {
                *phase = TimerPhase::Firing;
                true
            }
            _ => false,
        }
    }

    /// `Firing -> Armed`. Refused if the timer was retired meanwhile.
    pub fn rearm(&self) -> bool {
        let mut phase = self.inner.phase.lock();
        match *phase {
            TimerPhase::Firing => {
                *phase = TimerPhase::Armed;
                true
            }
            _ => false,
        }
    }

    pub fn retire(&self) {
        *self.inner.phase.lock() = TimerPhase::Retired;
        self.inner.cancel.cancel();
    }

    async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }
}

impl Default for TimerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `tick` every `period`, first after one full period. Fires never
/// overlap; a slow callback delays the next fire.
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> TimerLifecycle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = TimerControl> + Send + 'static,
{
    let lifecycle = TimerLifecycle::new();
    let timer = lifecycle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = timer.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !fire(&timer, &mut tick).await {
                break;
            }
        }
    });
    lifecycle
}

/// Run `tick` after `delay`, and again `delay` after every fire that asks
/// to continue.
pub fn spawn_retrying<F, Fut>(delay: Duration, mut tick: F) -> TimerLifecycle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = TimerControl> + Send + 'static,
{
    let lifecycle = TimerLifecycle::new();
    let timer = lifecycle.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = timer.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if !fire(&timer, &mut tick).await {
                break;
            }
        }
    });
    lifecycle
}

async fn fire<F, Fut>(timer: &TimerLifecycle, tick: &mut F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TimerControl>,
{
    if !timer.begin_fire() {
        return false;
    }
    match tick().await {
        TimerControl::Continue => timer.rearm(),
        TimerControl::Retire => {
            timer.retire();
            false
        }
    }
}
