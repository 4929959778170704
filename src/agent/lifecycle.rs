//! Agent lifecycle states.

use color_eyre::{eyre::eyre, Result};

/// Lifecycle state of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, nothing cached yet
  Parsed,
  /// Populating the cache generation
  Installing,
  /// Generation populated, waiting to activate
  Installed,
  /// Purging stale generations
  Activating,
  /// Active and intercepting fetches
  Activated,
  /// Install failed; this agent will never activate
  Redundant,
}

impl WorkerState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// State plus the skip-waiting directive
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: WorkerState::Parsed,
      skip_waiting: false,
    }
  }
}

impl Lifecycle {
  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  /// Activate as soon as installed, without waiting for controlled pages to close.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub fn begin_install(&mut self) -> Result<()> {
    match self.state {
      WorkerState::Parsed => {
        self.state = WorkerState::Installing;
        Ok(())
      }
      other => Err(eyre!("Cannot install from state {}", other)),
    }
  }

  pub fn finish_install(&mut self, success: bool) {
    self.state = if success {
      WorkerState::Installed
    } else {
      WorkerState::Redundant
    };
  }

  /// Activation runs after a successful install; running it again is allowed.
  pub fn begin_activate(&mut self) -> Result<WorkerState> {
    match self.state {
      WorkerState::Installed | WorkerState::Activated => {
        let previous = self.state;
        self.state = WorkerState::Activating;
        Ok(previous)
      }
      other => Err(eyre!("Cannot activate from state {}", other)),
    }
  }

  pub fn finish_activate(&mut self, result: std::result::Result<(), WorkerState>) {
    self.state = match result {
      Ok(()) => WorkerState::Activated,
      Err(previous) => previous,
    };
  }

  /// Resume an agent whose generation was installed by an earlier run.
  ///
  /// A generation still sharing storage with stale ones never finished
  /// activating, so it resumes as installed.
  pub fn resume(&mut self, waiting: bool) {
    self.state = if waiting {
      WorkerState::Installed
    } else {
      WorkerState::Activated
    };
  }
}
