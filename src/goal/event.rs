use crate::middleware::GoalResult;

/// One element of a goal stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedEvent<F, R> {
    /// Intermediate feedback published by the action server.
    Feedback(F),
    /// Terminal result. Always the last element.
    Result(GoalResult<R>),
}

impl<F, R> MergedEvent<F, R> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MergedEvent::Result(_))
    }

    pub fn feedback(self) -> Option<F> {
        match self {
            MergedEvent::Feedback(f) => Some(f),
            MergedEvent::Result(_) => None,
        }
    }

    pub fn result(self) -> Option<GoalResult<R>> {
        match self {
            MergedEvent::Feedback(_) => None,
            MergedEvent::Result(r) => Some(r),
        }
    }
}
