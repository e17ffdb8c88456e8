use log::{info, warn};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex},
};

/// Process-wide lifecycle of the agent.
///
/// Ordered so that forward progress compares greater; only
/// [`Lifecycle::reprovision`] may move backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentState {
    Provisioning,
    Registering,
    Reporting,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Provisioning => write!(f, "provisioning"),
            AgentState::Registering => write!(f, "registering"),
            AgentState::Reporting => write!(f, "reporting"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owner of the [`AgentState`]. Cheap to clone; clones share the state.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    state: Arc<Mutex<AgentState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(AgentState::Provisioning)
    }
}

impl Lifecycle {
    pub fn new(initial: AgentState) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn current(&self) -> AgentState {
        *self.lock()
    }

    /// Move to `next` unless that would go backwards.
    ///
    /// Returns the state in effect after the call.
    pub fn advance(&self, next: AgentState) -> AgentState {
        let mut state = self.lock();

        if next < *state {
            warn!("ignoring lifecycle transition {} -> {next}", *state);
            return *state;
        }

        if next != *state {
            info!("lifecycle: {} -> {next}", *state);
            *state = next;
        }

        *state
    }

    /// External re-provisioning trigger; the only backwards transition.
    pub fn reprovision(&self) {
        let mut state = self.lock();
        info!("lifecycle: {} -> {} (reprovision)", *state, AgentState::Provisioning);
        *state = AgentState::Provisioning;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AgentState> {
        // the state is a plain Copy value, a poisoned lock still holds a valid one
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
