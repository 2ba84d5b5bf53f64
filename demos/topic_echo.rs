//! # Example: Topic Echo
//!
//! A publisher task writes ten readings to `/range`; the consumer pulls them through a
//! bridge and prints a running average. The pump drives dispatch in between.
//!
//! Run with: `cargo run --example topic_echo --features loopback`

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use spinbridge::{
    LoopbackMiddleware, PumpConfig, Session, Supervisor, SupervisorConfig, TaskError, TaskFn,
    TaskRef,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mw = LoopbackMiddleware::new();
    let session = Session::new("echo", mw.clone());
    let mut range = session.subscribe::<f32>("/range", 16)?;

    let publisher: TaskRef = TaskFn::boxed("publisher", move |ctx: CancellationToken| async move {
        for i in 0..10u8 {
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            mw.publish("/range", 1.0 + f32::from(i) * 0.25);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    });

    let consumer: TaskRef = TaskFn::boxed("consumer", move |_ctx: CancellationToken| async move {
        let mut sum = 0.0;
        for n in 1..=10u8 {
            let Some(reading) = range.next().await else {
                return Err(TaskError::fail("range topic closed"));
            };
            sum += reading;
            println!("[consumer] reading={reading:.2} avg={:.2}", sum / f32::from(n));
        }
        Ok(())
    });

    let pump: TaskRef = Box::new(session.pump(PumpConfig::default()));
    let cfg = SupervisorConfig {
        cancel_on_first_exit: false,
        ..SupervisorConfig::default()
    };

    // The pump only stops when the session closes; close it once the consumer is done.
    let closer_session = session.clone();
    let closer: TaskRef = TaskFn::boxed("closer", move |_ctx: CancellationToken| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        closer_session.shutdown();
        Ok(())
    });

    Supervisor::builder(cfg)
        .build()
        .run(vec![pump, publisher, consumer, closer])
        .await?;
    println!("done");
    Ok(())
}
