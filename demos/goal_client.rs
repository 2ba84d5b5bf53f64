//! # Example: Goal Client
//!
//! An in-process "navigate" server accepts a goal, streams progress feedback and
//! succeeds. The client consumes the merged feedback/result stream. A second goal is
//! rejected to show how rejection surfaces. Lifecycle events go through `LogWriter`.
//!
//! Run with: `RUST_LOG=debug cargo run --example goal_client --features loopback,logging`

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spinbridge::{
    Action, GoalError, LogWriter, LoopbackMiddleware, MergedEvent, PumpConfig, Session,
    Subscribe, Supervisor, SupervisorConfig, TaskError, TaskFn, TaskRef,
};

struct Navigate;

impl Action for Navigate {
    type Goal = String;
    type Feedback = f32;
    type Result = String;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mw = LoopbackMiddleware::new();
    let mut inbox = mw.serve::<Navigate>("navigate");
    let session = Session::new("goal-client", mw.clone());

    let server: TaskRef = TaskFn::boxed("server", move |ctx: CancellationToken| async move {
        loop {
            let incoming = tokio::select! {
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
                next = inbox.recv() => match next {
                    Some(incoming) => incoming,
                    None => return Ok(()),
                },
            };
            if incoming.goal() == "moon" {
                incoming.reject();
                continue;
            }
            let goal = incoming.goal().clone();
            let running = incoming.accept();
            for step in 1..=4u8 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.publish_feedback(f32::from(step) * 25.0);
            }
            running.succeed(format!("arrived at {goal}"));
        }
    });

    let client_session = Arc::clone(&session);
    let client: TaskRef = TaskFn::boxed("client", move |_ctx: CancellationToken| async move {
        let mut goal = client_session.send_goal::<Navigate>("navigate", "kitchen".to_string());
        while let Some(event) = goal.next().await {
            match event? {
                MergedEvent::Feedback(pct) => println!("[client] progress {pct:.0}%"),
                MergedEvent::Result(res) => println!("[client] {:?}: {}", res.status, res.value),
            }
        }

        let mut moon = client_session.send_goal::<Navigate>("navigate", "moon".to_string());
        match moon.next().await {
            Some(Err(GoalError::Rejected { goal, .. })) => println!("[client] goal {goal} rejected"),
            other => return Err(TaskError::fail(format!("expected rejection, got {other:?}"))),
        }

        client_session.shutdown();
        Ok(())
    });

    let pump: TaskRef = Box::new(session.pump(PumpConfig::default()));
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let cfg = SupervisorConfig {
        cancel_on_first_exit: true,
        ..SupervisorConfig::default()
    };

    Supervisor::builder(cfg)
        .with_subscribers(subs)
        .build()
        .run(vec![pump, server, client])
        .await?;
    Ok(())
}
