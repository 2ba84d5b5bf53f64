//! # In-process loopback middleware.
//!
//! [`LoopbackMiddleware`] implements [`Middleware`] entirely in memory. Publishing a
//! message, answering a goal, sending feedback or completing a result only *queues* a
//! delivery; nothing reaches a callback until [`Middleware::dispatch_pending`] runs. This
//! mirrors how a real client library defers callbacks to its executor and lets tests step
//! the dispatch loop deterministically.
//!
//! ```text
//! publish / accept / reject / feedback / finish
//!        │
//!        ▼
//!  [ pending deliveries ] ── dispatch_pending() ──► callbacks, acceptance, result slots
//!        ▲                          │
//!        └── queued by callbacks ───┘ (delivered on the next dispatch)
//! ```
//!
//! ## Rules
//! - `dispatch_pending` delivers what was queued before the call, in queue order.
//! - No lock is held while user callbacks run, so callbacks may subscribe, publish or
//!   submit goals reentrantly.
//! - Subscription depth is keep-last: at most `depth` undelivered messages per topic
//!   (`0` keeps everything).

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::MiddlewareError;
use crate::middleware::{
    Acceptance, Action, Callback, GoalId, GoalResponse, GoalStatus, Middleware, ResultSlot,
    ResultWriter, Subscription,
};

type Payload = Box<dyn Any + Send>;
type SharedHandler = Arc<Mutex<Box<dyn FnMut(Payload) + Send>>>;

enum Delivery {
    /// `make` produces one owned copy of the message per subscriber.
    Message {
        topic: Arc<str>,
        make: Box<dyn Fn() -> Payload + Send>,
    },
    Run(Box<dyn FnOnce() + Send>),
}

struct Handler {
    id: u64,
    depth: usize,
    call: SharedHandler,
}

#[derive(Default)]
struct State {
    shut_down: bool,
    next_id: u64,
    next_goal: u128,
    dispatches: u64,
    fail_next: Option<MiddlewareError>,
    topics: HashMap<Arc<str>, Vec<Handler>>,
    pending: VecDeque<Delivery>,
    servers: HashMap<Arc<str>, Payload>,
    cancel_requested: HashSet<GoalId>,
}

/// In-memory middleware; clones share the same state.
#[derive(Clone, Default)]
pub struct LoopbackMiddleware {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `msg` for every subscriber of `topic`.
    pub fn publish<T: Clone + Send + 'static>(&self, topic: &str, msg: T) {
        let mut st = lock(&self.state);
        let depth = st
            .topics
            .get(topic)
            .and_then(|hs| hs.iter().map(|h| h.depth).max())
            .unwrap_or(0);

        if depth > 0 {
            let queued = st
                .pending
                .iter()
                .filter(|d| matches!(d, Delivery::Message { topic: t, .. } if &**t == topic))
                .count();
            if queued >= depth {
                if let Some(pos) = st
                    .pending
                    .iter()
                    .position(|d| matches!(d, Delivery::Message { topic: t, .. } if &**t == topic))
                {
                    st.pending.remove(pos);
                    tracing::trace!(topic, depth, "loopback dropped oldest undelivered message");
                }
            }
        }

        st.pending.push_back(Delivery::Message {
            topic: Arc::from(topic),
            make: Box::new(move || Box::new(msg.clone()) as Payload),
        });
    }

    /// Registers an action server and returns the inbox its goals arrive in.
    ///
    /// Registering the same server name again replaces the previous inbox.
    pub fn serve<A: Action>(&self, server: &str) -> GoalInbox<A> {
        let (tx, rx) = mpsc::unbounded_channel::<IncomingGoal<A>>();
        lock(&self.state)
            .servers
            .insert(Arc::from(server), Box::new(tx));
        GoalInbox { rx }
    }

    /// Makes the next `dispatch_pending` call fail with `err`.
    pub fn fail_next_dispatch(&self, err: MiddlewareError) {
        lock(&self.state).fail_next = Some(err);
    }

    /// Marks the middleware context as shut down.
    pub fn shutdown(&self) {
        lock(&self.state).shut_down = true;
    }

    /// Number of completed dispatch steps.
    pub fn dispatch_count(&self) -> u64 {
        lock(&self.state).dispatches
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.state).topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of deliveries waiting for the next dispatch.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// True if a client asked to cancel goal `id`.
    pub fn cancel_requested(&self, id: GoalId) -> bool {
        lock(&self.state).cancel_requested.contains(&id)
    }

    fn enqueue(&self, run: impl FnOnce() + Send + 'static) {
        lock(&self.state).pending.push_back(Delivery::Run(Box::new(run)));
    }

    fn handlers_for(&self, topic: &str) -> Vec<SharedHandler> {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|hs| hs.iter().map(|h| Arc::clone(&h.call)).collect())
            .unwrap_or_default()
    }
}

impl Middleware for LoopbackMiddleware {
    fn dispatch_pending(&self, _timeout: Duration) -> Result<(), MiddlewareError> {
        let batch = {
            let mut st = lock(&self.state);
            if let Some(err) = st.fail_next.take() {
                return Err(err);
            }
            st.dispatches += 1;
            std::mem::take(&mut st.pending)
        };

        for delivery in batch {
            match delivery {
                Delivery::Message { topic, make } => {
                    for handler in self.handlers_for(&topic) {
                        let mut call = handler.lock().unwrap_or_else(PoisonError::into_inner);
                        (*call)(make());
                    }
                }
                Delivery::Run(run) => run(),
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        !lock(&self.state).shut_down
    }

    fn subscribe<T: Send + 'static>(
        &self,
        topic: &str,
        depth: usize,
        mut callback: Callback<T>,
    ) -> Result<Subscription, MiddlewareError> {
        let call: SharedHandler = Arc::new(Mutex::new(Box::new(move |payload: Payload| {
            if let Ok(msg) = payload.downcast::<T>() {
                callback(*msg);
            }
        })));
        let topic: Arc<str> = Arc::from(topic);

        let id = {
            let mut st = lock(&self.state);
            if st.shut_down {
                return Err(MiddlewareError::new("loopback context is shut down"));
            }
            st.next_id += 1;
            let id = st.next_id;
            st.topics
                .entry(Arc::clone(&topic))
                .or_default()
                .push(Handler { id, depth, call });
            id
        };

        let state = Arc::clone(&self.state);
        let key = Arc::clone(&topic);
        Ok(Subscription::new(topic, move || {
            let mut st = lock(&state);
            if let Some(hs) = st.topics.get_mut(&key) {
                hs.retain(|h| h.id != id);
                if hs.is_empty() {
                    st.topics.remove(&key);
                }
            }
        }))
    }

    fn submit_goal<A: Action>(
        &self,
        server: &str,
        goal: A::Goal,
        feedback: Callback<A::Feedback>,
    ) -> Result<Acceptance<A::Result>, MiddlewareError> {
        let (id, inbox) = {
            let mut st = lock(&self.state);
            let inbox = st
                .servers
                .get(server)
                .and_then(|tx| (**tx).downcast_ref::<mpsc::UnboundedSender<IncomingGoal<A>>>())
                .cloned()
                .ok_or_else(|| {
                    MiddlewareError::new(format!("no action server '{server}' for this goal type"))
                })?;
            st.next_goal += 1;
            (GoalId::from_u128(st.next_goal), inbox)
        };

        let (respond, response) = oneshot::channel();
        let incoming = IncomingGoal {
            id,
            goal,
            respond,
            feedback,
            mw: self.clone(),
        };
        inbox
            .send(incoming)
            .map_err(|_| MiddlewareError::new(format!("action server '{server}' is gone")))?;

        Ok(async move {
            response
                .await
                .map_err(|_| MiddlewareError::new("goal response was never delivered"))
        }
        .boxed())
    }

    fn cancel_goal(&self, _server: &str, goal: GoalId) -> Result<(), MiddlewareError> {
        lock(&self.state).cancel_requested.insert(goal);
        Ok(())
    }
}

/// Receiving end of an action server registered with [`LoopbackMiddleware::serve`].
pub struct GoalInbox<A: Action> {
    rx: mpsc::UnboundedReceiver<IncomingGoal<A>>,
}

impl<A: Action> GoalInbox<A> {
    pub async fn recv(&mut self) -> Option<IncomingGoal<A>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<IncomingGoal<A>> {
        self.rx.try_recv().ok()
    }
}

/// A submitted goal awaiting the server's decision.
pub struct IncomingGoal<A: Action> {
    id: GoalId,
    goal: A::Goal,
    respond: oneshot::Sender<GoalResponse<A::Result>>,
    feedback: Callback<A::Feedback>,
    mw: LoopbackMiddleware,
}

impl<A: Action> IncomingGoal<A> {
    pub fn id(&self) -> GoalId {
        self.id
    }

    pub fn goal(&self) -> &A::Goal {
        &self.goal
    }

    /// Accepts the goal; the client learns about it on the next dispatch.
    pub fn accept(self) -> ServerGoal<A> {
        let (writer, result) = ResultSlot::channel();
        let id = self.id;
        let respond = self.respond;
        self.mw.enqueue(move || {
            let _ = respond.send(GoalResponse::Accepted { id, result });
        });
        ServerGoal {
            id,
            feedback: Arc::new(Mutex::new(self.feedback)),
            writer: Some(writer),
            mw: self.mw,
        }
    }

    /// Rejects the goal; the client learns about it on the next dispatch.
    pub fn reject(self) {
        let id = self.id;
        let respond = self.respond;
        self.mw.enqueue(move || {
            let _ = respond.send(GoalResponse::Rejected { id });
        });
    }
}

/// Server side of an accepted goal.
///
/// Dropping it without finishing leaves the client's result unresolved, which the client
/// observes as an execution failure.
pub struct ServerGoal<A: Action> {
    id: GoalId,
    feedback: Arc<Mutex<Callback<A::Feedback>>>,
    writer: Option<ResultWriter<A::Result>>,
    mw: LoopbackMiddleware,
}

impl<A: Action> ServerGoal<A> {
    pub fn id(&self) -> GoalId {
        self.id
    }

    /// Queues one feedback message.
    pub fn publish_feedback(&self, feedback: A::Feedback) {
        let cb = Arc::clone(&self.feedback);
        self.mw.enqueue(move || {
            let mut cb = cb.lock().unwrap_or_else(PoisonError::into_inner);
            (*cb)(feedback);
        });
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.mw.cancel_requested(self.id)
    }

    pub fn succeed(self, value: A::Result) {
        self.finish(GoalStatus::Succeeded, value);
    }

    pub fn abort(self, value: A::Result) {
        self.finish(GoalStatus::Aborted, value);
    }

    pub fn canceled(self, value: A::Result) {
        self.finish(GoalStatus::Canceled, value);
    }

    /// Queues a middleware-level failure instead of a result.
    pub fn fail(mut self, err: MiddlewareError) {
        if let Some(writer) = self.writer.take() {
            self.mw.enqueue(move || {
                writer.complete(Err(err));
            });
        }
    }

    fn finish(mut self, status: GoalStatus, value: A::Result) {
        if let Some(writer) = self.writer.take() {
            self.mw.enqueue(move || {
                writer.finish(status, value);
            });
        }
    }
}

impl<A: Action> Drop for ServerGoal<A> {
    fn drop(&mut self) {
        // Unfinished goals resolve the client's slot with an error on the next dispatch.
        if let Some(writer) = self.writer.take() {
            self.mw.enqueue(move || drop(writer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector<T: Send + 'static>() -> (Callback<T>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: Callback<T> = Box::new(move |msg| sink.lock().unwrap().push(msg));
        (cb, seen)
    }

    #[test]
    fn messages_wait_for_dispatch() {
        let mw = LoopbackMiddleware::new();
        let (cb, seen) = collector::<u32>();
        let _sub = mw.subscribe("/chatter", 0, cb).unwrap();

        mw.publish("/chatter", 1u32);
        mw.publish("/chatter", 2u32);
        assert!(seen.lock().unwrap().is_empty());

        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(mw.dispatch_count(), 1);
    }

    #[test]
    fn keep_last_depth_drops_oldest_undelivered() {
        let mw = LoopbackMiddleware::new();
        let (cb, seen) = collector::<u32>();
        let _sub = mw.subscribe("/imu", 2, cb).unwrap();

        for i in 0..5u32 {
            mw.publish("/imu", i);
        }
        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
    }

    #[test]
    fn mismatched_message_type_is_ignored() {
        let mw = LoopbackMiddleware::new();
        let (cb, seen) = collector::<u32>();
        let _sub = mw.subscribe("/chatter", 0, cb).unwrap();
        mw.publish("/chatter", "not a u32".to_string());
        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn callbacks_may_subscribe_and_publish_reentrantly() {
        let mw = LoopbackMiddleware::new();
        let (late_cb, late_seen) = collector::<u32>();
        let late_cb = Arc::new(Mutex::new(Some(late_cb)));
        let subs = Arc::new(Mutex::new(Vec::new()));

        let inner = mw.clone();
        let subs2 = Arc::clone(&subs);
        let _first = mw
            .subscribe::<u32>(
                "/a",
                0,
                Box::new(move |n| {
                    if let Some(cb) = late_cb.lock().unwrap().take() {
                        subs2.lock().unwrap().push(inner.subscribe("/b", 0, cb).unwrap());
                    }
                    inner.publish("/b", n * 10);
                }),
            )
            .unwrap();

        mw.publish("/a", 4u32);
        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert!(late_seen.lock().unwrap().is_empty(), "queued for next dispatch");
        assert_eq!(mw.pending_count(), 1);

        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert_eq!(*late_seen.lock().unwrap(), vec![40]);
    }

    #[test]
    fn injected_failure_fails_one_dispatch() {
        let mw = LoopbackMiddleware::new();
        mw.fail_next_dispatch(MiddlewareError::new("executor broke"));
        let err = mw.dispatch_pending(Duration::ZERO).unwrap_err();
        assert_eq!(err.message(), "executor broke");
        assert!(mw.dispatch_pending(Duration::ZERO).is_ok());
    }

    #[test]
    fn subscribe_after_shutdown_fails() {
        let mw = LoopbackMiddleware::new();
        mw.shutdown();
        assert!(!mw.is_running());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let res = mw.subscribe::<u8>(
            "/x",
            0,
            Box::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(res.is_err());
    }

    struct Dock;
    impl Action for Dock {
        type Goal = u8;
        type Feedback = u8;
        type Result = u8;
    }

    #[tokio::test]
    async fn submit_without_server_fails() {
        let mw = LoopbackMiddleware::new();
        let (cb, _seen) = collector::<u8>();
        let res = mw.submit_goal::<Dock>("dock", 1, cb);
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn goal_response_arrives_on_dispatch() {
        let mw = LoopbackMiddleware::new();
        let mut inbox = mw.serve::<Dock>("dock");
        let (cb, seen) = collector::<u8>();
        let acceptance = mw.submit_goal::<Dock>("dock", 3, cb).unwrap();

        let incoming = inbox.try_recv().unwrap();
        assert_eq!(*incoming.goal(), 3);
        let server = incoming.accept();
        server.publish_feedback(1);
        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        match acceptance.await.unwrap() {
            GoalResponse::Accepted { id, result } => {
                assert_eq!(id, server.id());
                server.succeed(9);
                mw.dispatch_pending(Duration::ZERO).unwrap();
                assert_eq!(result.await.unwrap().value, 9);
            }
            GoalResponse::Rejected { .. } => panic!("expected acceptance"),
        }
    }
}
