//! Breakpoints and cooperative stop.
//!
//! The executing task owns the run. A [`ProcessController`] held elsewhere
//! can request a stop at any time and resume a run paused at a breakpoint.
//! The stop flag is an atomic read without locking; the process state is
//! published on a `tokio::sync::watch` channel that paused runs wait on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use opflow_types::{EngineError, IoContainer, Result};

use crate::events::{EventEmitter, ProcessEvent};

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointPosition {
    Before,
    Within,
    After,
}

impl BreakpointPosition {
    pub const ALL: [BreakpointPosition; 3] = [
        BreakpointPosition::Before,
        BreakpointPosition::Within,
        BreakpointPosition::After,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointPosition::Before => "before",
            BreakpointPosition::Within => "within",
            BreakpointPosition::After => "after",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Some(BreakpointPosition::Before),
            "within" | "in" => Some(BreakpointPosition::Within),
            "after" => Some(BreakpointPosition::After),
            _ => None,
        }
    }
}

impl std::fmt::Display for BreakpointPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of enabled breakpoints of one operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Breakpoints {
    before: bool,
    within: bool,
    after: bool,
}

impl Breakpoints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_set(&self, position: BreakpointPosition) -> bool {
        match position {
            BreakpointPosition::Before => self.before,
            BreakpointPosition::Within => self.within,
            BreakpointPosition::After => self.after,
        }
    }

    pub fn set(&mut self, position: BreakpointPosition, on: bool) {
        match position {
            BreakpointPosition::Before => self.before = on,
            BreakpointPosition::Within => self.within = on,
            BreakpointPosition::After => self.after = on,
        }
    }

    pub fn any(&self) -> bool {
        self.before || self.within || self.after
    }

    pub fn positions(&self) -> Vec<BreakpointPosition> {
        BreakpointPosition::ALL
            .into_iter()
            .filter(|p| self.is_set(*p))
            .collect()
    }
}

impl FromIterator<BreakpointPosition> for Breakpoints {
    fn from_iter<I: IntoIterator<Item = BreakpointPosition>>(iter: I) -> Self {
        let mut bp = Breakpoints::none();
        for p in iter {
            bp.set(p, true);
        }
        bp
    }
}

// ---------------------------------------------------------------------------
// ProcessState / PausePoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Init,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl ProcessState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Completed)
    }
}

/// Where a paused run is waiting, with the container it published.
#[derive(Debug, Clone)]
pub struct PausePoint {
    pub operator: String,
    pub position: BreakpointPosition,
    pub container: IoContainer,
}

// ---------------------------------------------------------------------------
// ProcessControl: shared between the running task and controllers
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProcessControl {
    stop_requested: AtomicBool,
    state: watch::Sender<ProcessState>,
    pause_point: Mutex<Option<PausePoint>>,
}

impl Default for ProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProcessState::Init);
        Self {
            stop_requested: AtomicBool::new(false),
            state,
            pause_point: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Ask the run to stop at its next checkpoint. A paused run is released
    /// and observes the stop right away.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.release_pause();
    }

    /// Resume a paused run. Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        self.release_pause()
    }

    fn release_pause(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ProcessState::Paused {
                *state = ProcessState::Running;
                true
            } else {
                false
            }
        })
    }

    pub fn pause_point(&self) -> Option<PausePoint> {
        self.pause_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reset for a new run.
    pub(crate) fn begin(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        *self.pause_point.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state.send_replace(ProcessState::Running);
    }

    pub(crate) fn finish(&self, state: ProcessState) {
        self.state.send_replace(state);
    }

    /// Fail with `Stopped` if a stop was requested.
    pub fn check_stop(&self, operator: &str) -> Result<()> {
        if self.is_stop_requested() {
            tracing::info!(operator = %operator, "Stop requested, unwinding");
            return Err(EngineError::Stopped {
                operator: operator.to_string(),
            });
        }
        Ok(())
    }

    /// Pause at a breakpoint until resumed, then check for a stop.
    pub(crate) async fn suspend(
        &self,
        operator: &str,
        position: BreakpointPosition,
        container: &IoContainer,
        events: &EventEmitter,
    ) -> Result<()> {
        *self.pause_point.lock().unwrap_or_else(PoisonError::into_inner) = Some(PausePoint {
            operator: operator.to_string(),
            position,
            container: container.clone(),
        });
        let mut rx = self.state.subscribe();
        self.state.send_replace(ProcessState::Paused);

        // A stop that raced with entering the pause must not leave us waiting.
        if self.is_stop_requested() {
            self.release_pause();
        }

        tracing::info!(operator = %operator, position = %position, "Breakpoint reached");
        events.emit(ProcessEvent::BreakpointReached {
            operator: operator.to_string(),
            position,
            artifacts: container.summary(),
        });

        let waited = rx
            .wait_for(|state| *state != ProcessState::Paused)
            .await
            .map(|_| ());
        *self.pause_point.lock().unwrap_or_else(PoisonError::into_inner) = None;
        waited.map_err(|_| EngineError::Other("process control closed while paused".into()))?;

        tracing::debug!(operator = %operator, "Resumed");
        events.emit(ProcessEvent::ProcessResumed {
            operator: operator.to_string(),
        });
        self.check_stop(operator)
    }
}

// ---------------------------------------------------------------------------
// ProcessController: external handle
// ---------------------------------------------------------------------------

/// Cloneable handle for driving a run from another task.
#[derive(Debug, Clone)]
pub struct ProcessController {
    control: Arc<ProcessControl>,
}

impl ProcessController {
    pub fn new(control: Arc<ProcessControl>) -> Self {
        Self { control }
    }

    pub fn state(&self) -> ProcessState {
        self.control.state()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ProcessState::Paused
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn stop(&self) {
        self.control.request_stop();
    }

    pub fn pause_point(&self) -> Option<PausePoint> {
        self.control.pause_point()
    }

    /// Wait until the process state satisfies `pred`, returning that state.
    pub async fn wait_for_state(&self, pred: impl Fn(ProcessState) -> bool) -> ProcessState {
        let mut rx = self.control.subscribe();
        let state = match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => self.control.state(),
        };
        state
    }

    /// Wait for the next pause, or for the run to finish.
    pub async fn wait_for_pause(&self) -> Option<PausePoint> {
        let state = self
            .wait_for_state(|s| s == ProcessState::Paused || s.is_finished())
            .await;
        if state == ProcessState::Paused {
            self.pause_point()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn breakpoints_set_and_list() {
        let mut bp = Breakpoints::none();
        assert!(!bp.any());
        bp.set(BreakpointPosition::After, true);
        bp.set(BreakpointPosition::Before, true);
        assert_eq!(
            bp.positions(),
            vec![BreakpointPosition::Before, BreakpointPosition::After]
        );
        bp.set(BreakpointPosition::Before, false);
        assert!(!bp.is_set(BreakpointPosition::Before));
    }

    #[test]
    fn parse_positions() {
        assert_eq!(BreakpointPosition::parse("Before"), Some(BreakpointPosition::Before));
        assert_eq!(BreakpointPosition::parse("in"), Some(BreakpointPosition::Within));
        assert_eq!(BreakpointPosition::parse("later"), None);
    }

    #[test]
    fn check_stop_after_request() {
        let control = ProcessControl::new();
        assert!(control.check_stop("A").is_ok());
        control.request_stop();
        assert!(control.check_stop("A").unwrap_err().is_stop());
        control.begin();
        assert!(control.check_stop("A").is_ok());
        assert_eq!(control.state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn suspend_blocks_until_resume() {
        let control = Arc::new(ProcessControl::new());
        control.begin();
        let controller = ProcessController::new(control.clone());
        let events = EventEmitter::default();

        let task = {
            let control = control.clone();
            tokio::spawn(async move {
                control
                    .suspend("Op", BreakpointPosition::Before, &IoContainer::empty(), &events)
                    .await
            })
        };

        let point = controller.wait_for_pause().await.unwrap();
        assert_eq!(point.operator, "Op");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        assert!(controller.resume());
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), ProcessState::Running);
        assert!(controller.pause_point().is_none());
    }

    #[tokio::test]
    async fn stop_while_paused_is_observed_on_release() {
        let control = Arc::new(ProcessControl::new());
        control.begin();
        let controller = ProcessController::new(control.clone());
        let events = EventEmitter::default();

        let task = {
            let control = control.clone();
            tokio::spawn(async move {
                control
                    .suspend("Op", BreakpointPosition::After, &IoContainer::empty(), &events)
                    .await
            })
        };

        controller.wait_for_pause().await.unwrap();
        controller.stop();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_stop());
        assert_eq!(err.operator(), Some("Op"));
    }

    #[tokio::test]
    async fn resume_when_not_paused_is_a_no_op() {
        let control = Arc::new(ProcessControl::new());
        control.begin();
        assert!(!control.resume());
        assert_eq!(control.state(), ProcessState::Running);
    }
}
