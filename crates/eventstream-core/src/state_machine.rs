use crate::{
    error::ControllerError,
    types::{ControllerEvent, ControllerState, StreamCommand},
};

/// Side effect the controller must carry out after a command is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Register accounts and start their streams (possibly deferred).
    FirstStart {
        /// Accounts named by the command.
        account_ids: Vec<String>,
    },
    /// Resume every registered stream.
    ResumeAll,
    /// Already started; nothing to do.
    AlreadyStarted,
    /// Stop every stream and clear the registry.
    StopAll,
    /// Pause every stream.
    PauseAll,
    /// Run a catch-up on every stream.
    CatchupAll,
    /// Recompute the foreground presence only.
    RefreshForegroundPresence,
    /// Bring one more account online.
    AddAccount {
        /// Account to add.
        account_id: String,
    },
    /// Take one account offline.
    RemoveAccount {
        /// Account to remove.
        account_id: String,
    },
}

/// Accepted command: what to do and what to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Side effect to perform.
    pub plan: TransitionPlan,
    /// Events to emit once the side effect ran.
    pub events: Vec<ControllerEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamStateMachine {
    state: ControllerState,
}

impl StreamStateMachine {
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Validate `command` against the current state and advance it.
    ///
    /// `ui_visible` gates catch-up from `Started`: a push wake-up may only
    /// trade the live stream for catch-up while nothing is on screen.
    pub fn apply(
        &mut self,
        command: &StreamCommand,
        ui_visible: bool,
    ) -> Result<Transition, ControllerError> {
        use ControllerState::*;

        match command {
            StreamCommand::Start { account_ids } | StreamCommand::Resume { account_ids } => {
                match self.state {
                    Started => Ok(Transition {
                        plan: TransitionPlan::AlreadyStarted,
                        events: Vec::new(),
                    }),
                    Paused | Catchup => self.transition_to(Started, TransitionPlan::ResumeAll),
                    Unknown | Stopped => {
                        let account_ids = account_ids
                            .as_ref()
                            .filter(|ids| !ids.is_empty())
                            .cloned()
                            .ok_or_else(|| {
                                ControllerError::missing_prerequisite(
                                    "no_accounts",
                                    format!(
                                        "'{}' needs at least one account on first start",
                                        command.kind()
                                    ),
                                )
                            })?;
                        self.transition_to(Started, TransitionPlan::FirstStart { account_ids })
                    }
                }
            }
            StreamCommand::Stop => {
                self.transition_from_any_of(&[Started, Paused, Catchup], Stopped, "stop")
                    .map(|events| Transition {
                        plan: TransitionPlan::StopAll,
                        events,
                    })
            }
            StreamCommand::Pause => self
                .transition_from_any_of(&[Started], Paused, "pause")
                .map(|events| Transition {
                    plan: TransitionPlan::PauseAll,
                    events,
                }),
            StreamCommand::Catchup => {
                if self.state == Started && ui_visible {
                    return Err(ControllerError::invalid_state(
                        self.state,
                        "catchup while the UI is visible",
                    ));
                }
                self.transition_from_any_of(&[Paused, Catchup, Started], Catchup, "catchup")
                    .map(|events| Transition {
                        plan: TransitionPlan::CatchupAll,
                        events,
                    })
            }
            StreamCommand::PushStatusUpdate => Ok(Transition {
                plan: TransitionPlan::RefreshForegroundPresence,
                events: Vec::new(),
            }),
            StreamCommand::AddAccount { account_id } => {
                self.require_running("add_account")?;
                Ok(Transition {
                    plan: TransitionPlan::AddAccount {
                        account_id: account_id.clone(),
                    },
                    events: Vec::new(),
                })
            }
            StreamCommand::RemoveAccount { account_id } => {
                self.require_running("remove_account")?;
                Ok(Transition {
                    plan: TransitionPlan::RemoveAccount {
                        account_id: account_id.clone(),
                    },
                    events: Vec::new(),
                })
            }
        }
    }

    /// Whether streams are attached (started, paused or catching up).
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Started | ControllerState::Paused | ControllerState::Catchup
        )
    }

    fn require_running(&self, action: &str) -> Result<(), ControllerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ControllerError::invalid_state(self.state, action))
        }
    }

    fn transition_to(
        &mut self,
        next: ControllerState,
        plan: TransitionPlan,
    ) -> Result<Transition, ControllerError> {
        self.state = next;
        Ok(Transition {
            plan,
            events: vec![ControllerEvent::StateChanged { state: next }],
        })
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ControllerState],
        next: ControllerState,
        action: &str,
    ) -> Result<Vec<ControllerEvent>, ControllerError> {
        if !expected.contains(&self.state) {
            return Err(ControllerError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![ControllerEvent::StateChanged { state: next }])
    }
}
