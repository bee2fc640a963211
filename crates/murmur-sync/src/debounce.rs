//! Debounced activity signals.
//!
//! A [`Debouncer`] is an owned timer resource in one of two states, `Idle` or
//! `Pending(deadline)`. Triggers inside the window push the deadline out
//! instead of starting another timer, so an emitter never has more than one
//! live timer task.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Which end of a burst fires the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Fire on the first call of a burst, never at its end.
    Leading,
    /// Fire once the burst has been quiet for the whole window.
    Trailing,
}

type Action = Arc<dyn Fn() + Send + Sync>;

enum TimerState {
    Idle,
    Pending {
        deadline: Instant,
        generation: u64,
        task: JoinHandle<()>,
    },
}

struct Timer {
    state: TimerState,
    generation: u64,
}

struct Inner {
    edge: Edge,
    window: Duration,
    action: Action,
    runtime: Handle,
    timer: Mutex<Timer>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let TimerState::Pending { task, .. } = &self.timer.get_mut().state {
            task.abort();
        }
    }
}

/// Rate limiter collapsing bursts of calls into one action.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    pub fn new(
        edge: Edge,
        window: Duration,
        runtime: Handle,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                edge,
                window,
                action: Arc::new(action),
                runtime,
                timer: Mutex::new(Timer {
                    state: TimerState::Idle,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.timer.lock().state, TimerState::Pending { .. })
    }

    /// Record one call of the burst.
    pub fn trigger(&self) {
        let deadline = Instant::now() + self.inner.window;
        let fire_now = {
            let mut timer = self.inner.timer.lock();
            let next_generation = timer.generation + 1;
            match &mut timer.state {
                TimerState::Pending { deadline: pending, .. } => {
                    *pending = deadline;
                    false
                }
                TimerState::Idle => {
                    let task = self
                        .inner
                        .runtime
                        .spawn(expire(Arc::downgrade(&self.inner), next_generation));
                    timer.generation = next_generation;
                    timer.state = TimerState::Pending {
                        deadline,
                        generation: next_generation,
                        task,
                    };
                    self.inner.edge == Edge::Leading
                }
            }
        };

        if fire_now {
            (self.inner.action)();
        }
    }

    /// Drop the pending call without firing. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        self.take_pending()
    }

    /// Fire a pending trailing call right now. Returns whether it fired.
    ///
    /// A leading debouncer has nothing left to deliver, so flushing it only
    /// closes its window.
    pub fn flush(&self) -> bool {
        let was_pending = self.take_pending();
        let fire = was_pending && self.inner.edge == Edge::Trailing;
        if fire {
            (self.inner.action)();
        }
        fire
    }

    fn take_pending(&self) -> bool {
        let previous = {
            let mut timer = self.inner.timer.lock();
            std::mem::replace(&mut timer.state, TimerState::Idle)
        };
        match previous {
            TimerState::Pending { task, .. } => {
                task.abort();
                true
            }
            TimerState::Idle => false,
        }
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("edge", &self.inner.edge)
            .field("window", &self.inner.window)
            .field("pending", &self.is_pending())
            .finish()
    }
}

enum Wake {
    Sleep(Instant),
    Fire,
    Expired,
    Stale,
}

async fn expire(inner: Weak<Inner>, generation: u64) {
    let mut wake = Wake::Sleep(Instant::now());
    loop {
        match wake {
            Wake::Sleep(deadline) => sleep_until(deadline).await,
            Wake::Fire => {
                if let Some(inner) = inner.upgrade() {
                    (inner.action)();
                }
                return;
            }
            Wake::Expired | Wake::Stale => return,
        }

        let Some(strong) = inner.upgrade() else {
            return;
        };
        let mut timer = strong.timer.lock();
        wake = match &timer.state {
            TimerState::Pending {
                deadline,
                generation: current,
                ..
            } if *current == generation => {
                if *deadline > Instant::now() {
                    Wake::Sleep(*deadline)
                } else {
                    timer.state = TimerState::Idle;
                    match strong.edge {
                        Edge::Trailing => Wake::Fire,
                        Edge::Leading => Wake::Expired,
                    }
                }
            }
            _ => Wake::Stale,
        };
    }
}

/// The pair of typing signals handed to the input layer.
///
/// `start` is leading-edge and announces typing at the first keystroke of a
/// burst; `stop` is trailing-edge and announces the end after a quiet window.
/// Starting cancels a pending stop, and a fired stop closes the start window
/// so the next keystroke announces typing again.
#[derive(Clone, Debug)]
pub struct ActivitySignals {
    start: Debouncer,
    stop: Debouncer,
    gate: Arc<Mutex<Epochs>>,
}

/// Starts and stops are serialized through this gate. A stop only fires if
/// no start happened since it was armed.
#[derive(Debug, Default)]
struct Epochs {
    started: u64,
    armed: u64,
}

impl ActivitySignals {
    pub fn new(
        window: Duration,
        runtime: Handle,
        emit: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        let emit = Arc::new(emit);
        let gate = Arc::new(Mutex::new(Epochs::default()));

        let start = {
            let emit = emit.clone();
            Debouncer::new(Edge::Leading, window, runtime.clone(), move || emit(true))
        };
        let stop = {
            let start = start.clone();
            let gate = gate.clone();
            Debouncer::new(Edge::Trailing, window, runtime, move || {
                let epochs = gate.lock();
                if epochs.armed != epochs.started {
                    return;
                }
                start.cancel();
                emit(false);
            })
        };

        Self { start, stop, gate }
    }

    pub fn on_activity_start(&self) {
        let mut epochs = self.gate.lock();
        epochs.started += 1;
        self.stop.cancel();
        self.start.trigger();
    }

    pub fn on_activity_stop(&self) {
        let mut epochs = self.gate.lock();
        epochs.armed = epochs.started;
        self.stop.trigger();
    }

    pub fn start(&self) -> &Debouncer {
        &self.start
    }

    pub fn stop(&self) -> &Debouncer {
        &self.stop
    }

    /// Drop both pending timers without emitting.
    pub fn cancel(&self) {
        self.start.cancel();
        self.stop.cancel();
    }
}
