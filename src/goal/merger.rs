//! # GoalStream: feedback/result merge for one goal.
//!
//! ## Poll order
//! ```text
//! poll_next()
//!   ├─ Unsubmitted ──► submit_goal(goal, feedback_cb) ──► Pending
//!   ├─ Pending     ──► poll acceptance
//!   │                   ├─ Rejected ──► Err(GoalError::Rejected), Done
//!   │                   └─ Accepted ──► Active (state() stays Accepted until feedback)
//!   └─ Active      ──► poll result slot FIRST
//!                       ├─ ready   ──► Result(r), Done (buffered feedback discarded)
//!                       └─ pending ──► poll feedback bridge
//!                                       ├─ item    ──► Feedback(f), stay Active
//!                                       └─ nothing ──► Pending (both wakers registered)
//! ```
//!
//! The result slot lives in the `Active` phase for the whole goal, so each poll resumes
//! the same awaitable instead of creating a new one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::bridge::Bridge;
use crate::error::{GoalError, MiddlewareError};
use crate::goal::{GoalState, MergedEvent};
use crate::middleware::{Acceptance, Action, GoalId, GoalResponse, Middleware, ResultSlot};
use crate::session::Session;

type Item<A> = Result<MergedEvent<<A as Action>::Feedback, <A as Action>::Result>, GoalError>;

enum Phase<A: Action> {
    Unsubmitted(A::Goal),
    Pending {
        feedback: Bridge<A::Feedback>,
        acceptance: Acceptance<A::Result>,
    },
    Active {
        id: GoalId,
        feedback: Bridge<A::Feedback>,
        result: ResultSlot<A::Result>,
    },
    Done,
}

/// Lazy, single-use sequence of everything that happens to one goal.
///
/// Built with [`Session::send_goal`]. Consume it with [`GoalStream::next`] or as a
/// [`futures::Stream`]; a second pass requires a new submission.
pub struct GoalStream<A: Action, M: Middleware> {
    session: Arc<Session<M>>,
    server: Arc<str>,
    phase: Phase<A>,
    state: GoalState,
    id: Option<GoalId>,
}

// Fields are only reached through `&mut`; nothing is structurally pinned.
impl<A: Action, M: Middleware> Unpin for GoalStream<A, M> {}

impl<A: Action, M: Middleware> GoalStream<A, M> {
    pub(crate) fn new(session: Arc<Session<M>>, server: &str, goal: A::Goal) -> Self {
        Self {
            session,
            server: Arc::from(server),
            phase: Phase::Unsubmitted(goal),
            state: GoalState::Pending,
            id: None,
        }
    }

    pub fn state(&self) -> GoalState {
        self.state
    }

    /// Identifier assigned by the middleware, once the server has answered.
    pub fn goal_id(&self) -> Option<GoalId> {
        self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Waits for the next element; `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<Item<A>> {
        StreamExt::next(self).await
    }

    /// Stops the stream and, if the goal is running, asks the server to cancel it.
    ///
    /// Calling it on a terminated stream does nothing. A goal still waiting for the
    /// server's answer is abandoned without a cancel request (it has no id yet).
    pub fn cancel(&mut self) -> Result<(), GoalError> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Done => Ok(()),
            Phase::Unsubmitted(_) | Phase::Pending { .. } => {
                self.state = GoalState::Canceled;
                Ok(())
            }
            Phase::Active { id, .. } => {
                self.state = GoalState::Canceled;
                tracing::debug!(server = %self.server, goal = %id, "goal cancel requested");
                self.session
                    .middleware()
                    .cancel_goal(&self.server, id)
                    .map_err(GoalError::execution)
            }
        }
    }

    fn submit(&self, goal: A::Goal) -> Result<Phase<A>, MiddlewareError> {
        if !self.session.is_ok() {
            return Err(MiddlewareError::new("session is shut down"));
        }
        let (callback, feedback) = Bridge::channel();
        let acceptance = self
            .session
            .middleware()
            .submit_goal::<A>(&self.server, goal, callback)?;
        tracing::debug!(session = self.session.name(), server = %self.server, "goal submitted");
        Ok(Phase::Pending {
            feedback,
            acceptance,
        })
    }

    fn fail(&mut self, source: MiddlewareError) -> Poll<Option<Item<A>>> {
        tracing::debug!(server = %self.server, error = %source, "goal failed");
        self.state = GoalState::Failed;
        Poll::Ready(Some(Err(GoalError::execution(source))))
    }
}

impl<A: Action, M: Middleware> Stream for GoalStream<A, M> {
    type Item = Item<A>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.phase, Phase::Done) {
                Phase::Done => return Poll::Ready(None),

                Phase::Unsubmitted(goal) => match this.submit(goal) {
                    Ok(phase) => this.phase = phase,
                    Err(source) => return this.fail(source),
                },

                Phase::Pending {
                    feedback,
                    mut acceptance,
                } => match acceptance.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.phase = Phase::Pending {
                            feedback,
                            acceptance,
                        };
                        return Poll::Pending;
                    }
                    Poll::Ready(Err(source)) => return this.fail(source),
                    Poll::Ready(Ok(GoalResponse::Rejected { id })) => {
                        this.id = Some(id);
                        this.state = GoalState::Rejected;
                        tracing::debug!(server = %this.server, goal = %id, "goal rejected");
                        return Poll::Ready(Some(Err(GoalError::Rejected {
                            server: this.server.to_string(),
                            goal: id,
                        })));
                    }
                    Poll::Ready(Ok(GoalResponse::Accepted { id, result })) => {
                        this.id = Some(id);
                        this.state = GoalState::Accepted;
                        tracing::debug!(server = %this.server, goal = %id, "goal accepted");
                        this.phase = Phase::Active {
                            id,
                            feedback,
                            result,
                        };
                    }
                },

                Phase::Active {
                    id,
                    mut feedback,
                    mut result,
                } => {
                    // Result before feedback: a result ready in this poll ends the stream.
                    if let Poll::Ready(outcome) = Pin::new(&mut result).poll(cx) {
                        return match outcome {
                            Ok(res) => {
                                this.state = GoalState::from(res.status);
                                tracing::debug!(
                                    server = %this.server,
                                    goal = %id,
                                    status = ?res.status,
                                    "goal finished"
                                );
                                Poll::Ready(Some(Ok(MergedEvent::Result(res))))
                            }
                            Err(source) => this.fail(source),
                        };
                    }

                    let polled = feedback.poll_item(cx);
                    this.phase = Phase::Active {
                        id,
                        feedback,
                        result,
                    };
                    return match polled {
                        Poll::Ready(Some(item)) => {
                            this.state = GoalState::Active;
                            Poll::Ready(Some(Ok(MergedEvent::Feedback(item))))
                        }
                        // No feedback (or its producer is gone): wait on the result waker.
                        Poll::Ready(None) | Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }
}

impl<A: Action, M: Middleware> Drop for GoalStream<A, M> {
    fn drop(&mut self) {
        if let Phase::Active { id, .. } = &self.phase {
            if let Err(err) = self.session.middleware().cancel_goal(&self.server, *id) {
                tracing::warn!(server = %self.server, goal = %id, error = %err, "cancel on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::loopback::{GoalInbox, LoopbackMiddleware};
    use crate::middleware::{GoalResult, GoalStatus};
    use futures::FutureExt;
    use std::time::Duration;

    struct Navigate;

    impl Action for Navigate {
        type Goal = &'static str;
        type Feedback = u32;
        type Result = String;
    }

    type Setup = (
        LoopbackMiddleware,
        Arc<Session<LoopbackMiddleware>>,
        GoalInbox<Navigate>,
    );

    fn setup() -> Setup {
        let mw = LoopbackMiddleware::new();
        let inbox = mw.serve::<Navigate>("navigate");
        let session = Session::new("client", mw.clone());
        (mw, session, inbox)
    }

    fn step(mw: &LoopbackMiddleware) {
        mw.dispatch_pending(Duration::ZERO).unwrap();
    }

    fn feedback(n: u32) -> Option<Item<Navigate>> {
        Some(Ok(MergedEvent::Feedback(n)))
    }

    #[tokio::test]
    async fn nothing_is_submitted_before_the_first_poll() {
        let (_mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "kitchen");
        assert!(inbox.try_recv().is_none());
        assert_eq!(goal.state(), GoalState::Pending);

        assert!(goal.next().now_or_never().is_none());
        let incoming = inbox.try_recv().unwrap();
        assert_eq!(*incoming.goal(), "kitchen");
    }

    #[tokio::test]
    async fn rejection_emits_no_events() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "roof");
        assert!(goal.next().now_or_never().is_none());

        let incoming = inbox.try_recv().unwrap();
        let id = incoming.id();
        incoming.reject();
        step(&mw);

        let err = goal.next().await.unwrap().unwrap_err();
        assert_eq!(
            err,
            GoalError::Rejected {
                server: "navigate".into(),
                goal: id,
            }
        );
        assert_eq!(goal.state(), GoalState::Rejected);
        assert_eq!(goal.goal_id(), Some(id));
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn feedback_then_result_in_order() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "kitchen");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);

        server.publish_feedback(1);
        step(&mw);
        assert_eq!(goal.next().await, feedback(1));
        assert_eq!(goal.state(), GoalState::Active);

        server.publish_feedback(2);
        step(&mw);
        assert_eq!(goal.next().await, feedback(2));

        server.succeed("arrived".to_string());
        step(&mw);
        assert_eq!(
            goal.next().await,
            Some(Ok(MergedEvent::Result(GoalResult::succeeded("arrived".to_string()))))
        );
        assert_eq!(goal.state(), GoalState::Succeeded);
        assert!(goal.next().await.is_none());
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn result_without_feedback() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "hall");
        assert!(goal.next().now_or_never().is_none());
        inbox.try_recv().unwrap().accept().succeed("ok".to_string());
        step(&mw);

        let only = goal.next().await.unwrap().unwrap();
        assert!(only.is_terminal());
        assert_eq!(only.result().map(|r| r.value), Some("ok".to_string()));
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn result_wins_over_feedback_in_the_same_tick() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "dock");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);

        server.publish_feedback(10);
        server.publish_feedback(11);
        server.succeed("docked".to_string());
        step(&mw);

        let first = goal.next().await.unwrap().unwrap();
        assert_eq!(first, MergedEvent::Result(GoalResult::succeeded("docked".to_string())));
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn feedback_sent_with_acceptance_is_delivered() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "lab");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        server.publish_feedback(5);
        step(&mw);

        assert_eq!(goal.next().await, feedback(5));
        assert_eq!(goal.state(), GoalState::Active);
    }

    #[tokio::test]
    async fn accepted_until_the_first_feedback() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "hall");
        assert!(goal.next().now_or_never().is_none());
        assert_eq!(goal.state(), GoalState::Pending);

        let server = inbox.try_recv().unwrap().accept();
        step(&mw);
        assert!(goal.next().now_or_never().is_none());
        assert_eq!(goal.state(), GoalState::Accepted);
        assert_eq!(goal.goal_id(), Some(server.id()));

        server.publish_feedback(1);
        step(&mw);
        assert_eq!(goal.next().await, feedback(1));
        assert_eq!(goal.state(), GoalState::Active);
    }

    #[tokio::test]
    async fn aborted_result_is_emitted_and_marks_failure() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "stairs");
        assert!(goal.next().now_or_never().is_none());
        inbox.try_recv().unwrap().accept().abort("blocked".to_string());
        step(&mw);

        let res = goal.next().await.unwrap().unwrap().result().unwrap();
        assert_eq!(res.status, GoalStatus::Aborted);
        assert!(!res.is_success());
        assert_eq!(goal.state(), GoalState::Failed);
    }

    #[tokio::test]
    async fn lost_result_surfaces_as_execution_failure() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "garden");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);
        drop(server);
        step(&mw);

        let err = goal.next().await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "goal_execution_failed");
        assert_eq!(goal.state(), GoalState::Failed);
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn middleware_failure_during_result_is_propagated() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "garage");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);
        server.fail(MiddlewareError::new("server died"));
        step(&mw);

        match goal.next().await {
            Some(Err(GoalError::ExecutionFailed { source })) => {
                assert_eq!(source.message(), "server died")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_server_fails_on_first_poll() {
        let (_mw, session, _inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("teleport", "moon");
        let err = goal.next().await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "goal_execution_failed");
        assert_eq!(goal.state(), GoalState::Failed);
    }

    #[tokio::test]
    async fn shut_down_session_refuses_to_submit() {
        let (_mw, session, mut inbox) = setup();
        session.shutdown();
        let mut goal = session.send_goal::<Navigate>("navigate", "kitchen");
        assert!(goal.next().await.unwrap().is_err());
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn cancel_requests_server_cancellation_once_active() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "office");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);
        server.publish_feedback(1);
        step(&mw);
        assert_eq!(goal.next().await, feedback(1));

        goal.cancel().unwrap();
        assert_eq!(goal.state(), GoalState::Canceled);
        assert!(server.is_cancel_requested());
        assert!(goal.next().await.is_none());

        // Late feedback after cancellation goes nowhere.
        server.publish_feedback(2);
        step(&mw);
        assert!(goal.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_after_termination_is_a_no_op() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "hall");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        let id = server.id();
        server.succeed("done".to_string());
        step(&mw);
        assert!(goal.next().await.unwrap().is_ok());

        assert_eq!(goal.cancel(), Ok(()));
        assert_eq!(goal.cancel(), Ok(()));
        assert_eq!(goal.state(), GoalState::Succeeded);
        assert!(!mw.cancel_requested(id));
    }

    #[tokio::test]
    async fn dropping_an_active_stream_requests_cancellation() {
        let (mw, session, mut inbox) = setup();
        let mut goal = session.send_goal::<Navigate>("navigate", "lab");
        assert!(goal.next().now_or_never().is_none());
        let server = inbox.try_recv().unwrap().accept();
        step(&mw);
        assert!(goal.next().now_or_never().is_none());
        assert_eq!(goal.state(), GoalState::Accepted);

        drop(goal);
        assert!(server.is_cancel_requested());
        server.publish_feedback(3);
        step(&mw);
    }
}
