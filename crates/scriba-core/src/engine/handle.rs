//! Handle to a supervised engine process.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;

/// Lifecycle state of the engine process.
///
/// `Dead` is terminal: once entered, no transition leaves it and the
/// service must stop routing requests to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Starting,
    Ready,
    Busy,
    Terminating,
    Dead,
}

/// Shared view of one engine process.
///
/// Created by the supervisor; the service reads the state and flips
/// Busy/Ready around requests, the watchdog drives Terminating/Dead.
#[derive(Debug)]
pub struct EngineHandle {
    pid: u32,
    interface: String,
    port: u16,
    user_profile_dir: PathBuf,
    state: Mutex<EngineState>,
}

impl EngineHandle {
    pub fn new(pid: u32, interface: String, port: u16, user_profile_dir: PathBuf) -> Self {
        Self {
            pid,
            interface,
            port,
            user_profile_dir,
            state: Mutex::new(EngineState::Starting),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user_profile_dir(&self) -> &PathBuf {
        &self.user_profile_dir
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_dead(&self) -> bool {
        self.state() == EngineState::Dead
    }

    /// Transition to a new state. Dead is terminal; attempts to leave it
    /// are ignored.
    pub fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == EngineState::Dead {
            return;
        }
        *state = next;
    }
}
