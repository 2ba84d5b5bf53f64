use crate::middleware::GoalStatus;

/// Client-side state of one goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalState {
    /// Not submitted yet, or waiting for the server's answer.
    Pending,
    /// The server accepted the goal; no feedback has been yielded yet.
    Accepted,
    /// The server rejected the goal (terminal).
    Rejected,
    /// At least one feedback item has been yielded; the result is still outstanding.
    Active,
    /// Terminal result with status `Succeeded`.
    Succeeded,
    /// Terminal result with status `Aborted`, or a middleware failure (terminal).
    Failed,
    /// Canceled by the server or by the client (terminal).
    Canceled,
}

impl GoalState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalState::Rejected | GoalState::Succeeded | GoalState::Failed | GoalState::Canceled
        )
    }
}

impl From<GoalStatus> for GoalState {
    fn from(status: GoalStatus) -> Self {
        match status {
            GoalStatus::Succeeded => GoalState::Succeeded,
            GoalStatus::Aborted => GoalState::Failed,
            GoalStatus::Canceled => GoalState::Canceled,
        }
    }
}
