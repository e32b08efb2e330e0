//! Virtual clock and task queue for deterministic replay.
//!
//! The clock processes scheduled callbacks in a deterministic order based on:
//! 1. Fire time (earlier first)
//! 2. Priority (higher first)
//! 3. Insertion order (FIFO)
//!
//! Logical time only moves when [`VirtualClock::advance`] pops a callback, and it
//! never moves backwards. All callbacks run on the thread that drives the clock,
//! one at a time, so a callback may freely schedule further work.

use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    rc::Rc,
};

use crate::ReplayError;

/// Logical time unit used by the clock.
pub type Time = u64;

/// Priority given to callbacks scheduled without an explicit one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority used for teardown work (closing channels) that must run after every
/// other callback sharing the same fire time.
pub const LOWEST_PRIORITY: i32 = i32::MIN;

/// Result returned by scheduled callbacks.
pub type TaskResult = anyhow::Result<()>;

type Callback = Box<dyn FnOnce(&VirtualClock) -> TaskResult>;

/// Unique identifier for a scheduled callback, assigned in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A fired tick, as recorded in the tick log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub time: Time,
    pub priority: i32,
    pub id: TaskId,
}

struct Task {
    time: Time,
    priority: i32,
    id: TaskId,
    callback: Callback,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the "greatest" task is popped first, so earlier times,
        // higher priorities and older ids compare as greater.
        other
            .time
            .cmp(&self.time)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Configuration for the clock.
#[derive(Debug, Clone, Default)]
pub struct ClockConfig {
    /// Whether fired ticks are kept in the tick log and traced.
    pub trace_ticks: bool,
    /// Maximum number of ticks retained in the log (0 = unlimited).
    pub max_traced_ticks: usize,
}

struct ClockState {
    now: Time,
    next_task_id: u64,
    pending: BinaryHeap<Task>,
    tick_hooks: Vec<Callback>,
    tick_log: VecDeque<Tick>,
    config: ClockConfig,
}

/// Shared handle to a virtual clock.
///
/// Cloning the handle shares the same queue and logical time. The handle is
/// intentionally `!Send`: every tick executes to completion on the driving
/// thread before the next one is popped.
#[derive(Clone)]
pub struct VirtualClock {
    state: Rc<RefCell<ClockState>>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a new clock starting at time 0.
    pub fn new() -> Self {
        Self::with_config(ClockConfig::default())
    }

    pub fn with_config(config: ClockConfig) -> Self {
        Self::with_initial_time(0, config)
    }

    /// Creates a new clock starting at the given time.
    pub fn with_initial_time(now: Time, config: ClockConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(ClockState {
                now,
                next_task_id: 0,
                pending: BinaryHeap::new(),
                tick_hooks: Vec::new(),
                tick_log: VecDeque::new(),
                config,
            })),
        }
    }

    /// Returns the current logical time.
    pub fn now(&self) -> Time {
        self.state.borrow().now
    }

    /// Returns the number of pending callbacks.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Returns the fire time of the next pending callback, if any.
    pub fn next_fire_time(&self) -> Option<Time> {
        self.state.borrow().pending.peek().map(|task| task.time)
    }

    /// Whether no further tick can fire.
    pub fn is_idle(&self) -> bool {
        self.state.borrow().pending.is_empty()
    }

    /// Returns the ticks fired so far (only populated with `trace_ticks`).
    pub fn tick_log(&self) -> Vec<Tick> {
        self.state.borrow().tick_log.iter().copied().collect()
    }

    pub fn clear_tick_log(&self) {
        self.state.borrow_mut().tick_log.clear();
    }

    /// Schedules `callback` to run once logical time reaches `time`.
    pub fn invoke_at<F>(&self, time: Time, callback: F) -> TaskId
    where
        F: FnOnce(&VirtualClock) -> TaskResult + 'static,
    {
        self.invoke_at_with_priority(time, DEFAULT_PRIORITY, callback)
    }

    /// Schedules `callback` at `time`; among callbacks sharing a fire time the
    /// highest `priority` runs first, ties broken by insertion order.
    ///
    /// A `time` in the past is clamped to the current time.
    pub fn invoke_at_with_priority<F>(&self, time: Time, priority: i32, callback: F) -> TaskId
    where
        F: FnOnce(&VirtualClock) -> TaskResult + 'static,
    {
        let mut state = self.state.borrow_mut();
        let time = if time < state.now {
            tracing::warn!(
                requested = time,
                now = state.now,
                "Callback scheduled in the past, clamping to current time"
            );
            state.now
        } else {
            time
        };
        let id = TaskId(state.next_task_id);
        state.next_task_id += 1;
        state.pending.push(Task {
            time,
            priority,
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Registers a one-shot hook that runs right after the next tick's callback.
    ///
    /// Hooks are not ticks: a clock holding only hooks is idle and
    /// [`advance`](Self::advance) returns `false` without running them.
    pub fn on_next_tick<F>(&self, hook: F)
    where
        F: FnOnce(&VirtualClock) -> TaskResult + 'static,
    {
        self.state.borrow_mut().tick_hooks.push(Box::new(hook));
    }

    /// Pops and runs the next due callback, moving logical time to its fire time.
    ///
    /// Returns `Ok(false)` when nothing is pending. A failing callback has
    /// already been consumed when its error is returned; the rest of the queue
    /// is left untouched.
    pub fn advance(&self) -> Result<bool, ReplayError> {
        let task = {
            let mut state = self.state.borrow_mut();
            let Some(task) = state.pending.pop() else {
                return Ok(false);
            };
            if task.time > state.now {
                state.now = task.time;
            }
            if state.config.trace_ticks {
                let max = state.config.max_traced_ticks;
                if max > 0 && state.tick_log.len() >= max {
                    state.tick_log.pop_front();
                }
                state.tick_log.push_back(Tick {
                    time: task.time,
                    priority: task.priority,
                    id: task.id,
                });
                tracing::trace!(
                    time = task.time,
                    priority = task.priority,
                    id = task.id.0,
                    "Firing tick"
                );
            }
            task
        };

        let time = task.time;
        let fired = (task.callback)(self).map_err(|source| ReplayError::Callback { time, source });

        let hooks = std::mem::take(&mut self.state.borrow_mut().tick_hooks);
        let mut hooks_result = Ok(());
        for hook in hooks {
            if let Err(source) = hook(self) {
                if hooks_result.is_ok() {
                    hooks_result = Err(ReplayError::Callback { time, source });
                } else {
                    tracing::warn!(time, error = %source, "Additional tick hook failure");
                }
            }
        }

        fired?;
        hooks_result?;
        Ok(true)
    }

    /// Advances until `condition` holds or nothing is pending.
    ///
    /// Returns the number of ticks fired.
    pub fn run_until<F>(&self, mut condition: F) -> Result<usize, ReplayError>
    where
        F: FnMut(&VirtualClock) -> bool,
    {
        let mut fired = 0;
        while !condition(self) {
            if !self.advance()? {
                break;
            }
            fired += 1;
        }
        Ok(fired)
    }

    /// Fires every pending callback, including any they schedule.
    pub fn run_all(&self) -> Result<usize, ReplayError> {
        self.run_until(|_| false)
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending_count", &state.pending.len())
            .field("tick_hooks", &state.tick_hooks.len())
            .field("tick_log_len", &state.tick_log.len())
            .finish()
    }
}
