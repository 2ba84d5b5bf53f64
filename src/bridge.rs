//! # Callback bridge: push callbacks in, pull sequence out.
//!
//! A [`Bridge`] turns one middleware callback into an ordered, unbounded sequence that a
//! consumer drains one item at a time with [`Bridge::next`].
//!
//! ```text
//!  dispatch_pending()                               consumer task
//!        │                                               │
//!        ├─► callback(msg) ──► tx.send(msg) ──► [ FIFO buffer ] ──► next().await
//!        ├─► callback(msg) ──► tx.send(msg) ──►      ...          (wakes the one waiter)
//!        ▼
//! ```
//!
//! ## Rules
//! - The callback never blocks: it appends to an unbounded buffer and returns.
//! - Items are delivered in callback order; nothing is dropped while the bridge is alive.
//! - The buffer is not bounded: a slow consumer lets it grow.
//! - Dropping the bridge detaches it: the subscription is released and late callback
//!   invocations are discarded instead of buffered.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::MiddlewareError;
use crate::middleware::{Callback, Middleware, Subscription};
use crate::session::Session;

/// Pull-based, FIFO view over a push-based callback.
#[derive(Debug)]
pub struct Bridge<T> {
    rx: mpsc::UnboundedReceiver<T>,
    subscription: Option<Subscription>,
    topic: Option<Arc<str>>,
}

impl<T: Send + 'static> Bridge<T> {
    /// Creates an unregistered bridge and the callback that feeds it.
    ///
    /// The callback can be handed to any middleware entry point that takes a [`Callback`].
    pub fn channel() -> (Callback<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: Callback<T> = Box::new(move |item| {
            // Err only when the bridge is gone; the item has no reader then.
            let _ = tx.send(item);
        });
        let bridge = Self {
            rx,
            subscription: None,
            topic: None,
        };
        (callback, bridge)
    }

    /// Subscribes to `topic` through `session` and returns the bridge owning the subscription.
    pub fn subscribe<M: Middleware>(
        session: &Session<M>,
        topic: &str,
        depth: usize,
    ) -> Result<Self, MiddlewareError> {
        let (callback, mut bridge) = Self::channel();
        let subscription = session.middleware().subscribe::<T>(topic, depth, callback)?;
        tracing::debug!(session = session.name(), topic, depth, "bridge subscribed");
        bridge.topic = Some(Arc::from(topic));
        bridge.subscription = Some(subscription);
        Ok(bridge)
    }
}

impl<T> Bridge<T> {
    /// Waits for the oldest buffered item and removes it.
    ///
    /// Returns `None` only when the producing side is gone and the buffer is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Removes the oldest buffered item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Detaches from the middleware and stops accepting new items.
    ///
    /// Items already buffered can still be read.
    pub fn close(&mut self) {
        self.subscription.take();
        self.rx.close();
    }

    /// Topic this bridge is subscribed to (`None` for [`Bridge::channel`] bridges).
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub(crate) fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Stream for Bridge<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().poll_item(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::loopback::LoopbackMiddleware;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn yields_first_m_items_in_callback_order() {
        let (mut cb, mut bridge) = Bridge::<u32>::channel();
        let mut seen = Vec::new();

        // Interleave bursts of callbacks with fewer pulls (N >= M).
        for burst in 0..5u32 {
            for i in 0..4 {
                cb(burst * 4 + i);
            }
            for _ in 0..3 {
                seen.push(bridge.next().await.unwrap());
            }
        }
        assert_eq!(seen, (0..15).collect::<Vec<_>>());
        assert_eq!(bridge.try_next(), Some(15));
    }

    #[tokio::test]
    async fn items_buffered_before_consumer_are_kept() {
        let (mut cb, mut bridge) = Bridge::<String>::channel();
        for i in 0..100 {
            cb(format!("msg-{i}"));
        }
        for i in 0..100 {
            assert_eq!(bridge.next().await.unwrap(), format!("msg-{i}"));
        }
        assert_eq!(bridge.try_next(), None);
    }

    #[tokio::test]
    async fn pending_next_wakes_on_callback() {
        let (mut cb, mut bridge) = Bridge::<u8>::channel();
        let reader = tokio::spawn(async move { bridge.next().await });
        tokio::task::yield_now().await;
        cb(9);
        assert_eq!(reader.await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn next_returns_none_once_producer_is_gone() {
        let (mut cb, mut bridge) = Bridge::<u8>::channel();
        cb(1);
        drop(cb);
        assert_eq!(bridge.next().await, Some(1));
        assert_eq!(bridge.next().await, None);
    }

    #[tokio::test]
    async fn works_as_a_stream() {
        let (mut cb, bridge) = Bridge::<u8>::channel();
        cb(1);
        cb(2);
        cb(3);
        drop(cb);
        let all: Vec<u8> = bridge.collect().await;
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn subscribed_bridge_receives_dispatched_messages() {
        let mw = LoopbackMiddleware::new();
        let session = Session::new("test", mw.clone());
        let mut bridge = session.subscribe::<u32>("/odom", 0).unwrap();
        assert_eq!(bridge.topic(), Some("/odom"));

        mw.publish("/odom", 1u32);
        mw.publish("/odom", 2u32);
        assert_eq!(bridge.try_next(), None, "nothing before dispatch");

        mw.dispatch_pending(Duration::ZERO).unwrap();
        assert_eq!(bridge.next().await, Some(1));
        assert_eq!(bridge.next().await, Some(2));
    }

    #[tokio::test]
    async fn dropping_the_bridge_detaches_the_subscription() {
        let mw = LoopbackMiddleware::new();
        let session = Session::new("test", mw.clone());
        let bridge = session.subscribe::<u32>("/odom", 0).unwrap();
        assert_eq!(mw.subscriber_count("/odom"), 1);

        drop(bridge);
        assert_eq!(mw.subscriber_count("/odom"), 0);
    }

    #[tokio::test]
    async fn close_keeps_buffered_items_but_detaches() {
        let mw = LoopbackMiddleware::new();
        let session = Session::new("test", mw.clone());
        let mut bridge = session.subscribe::<u32>("/odom", 0).unwrap();
        mw.publish("/odom", 7u32);
        mw.dispatch_pending(Duration::ZERO).unwrap();

        bridge.close();
        assert_eq!(mw.subscriber_count("/odom"), 0);
        assert_eq!(bridge.next().await, Some(7));
        assert_eq!(bridge.next().await, None);
    }

    #[test]
    fn late_callbacks_after_drop_are_discarded() {
        let (mut cb, bridge) = Bridge::<Vec<u8>>::channel();
        drop(bridge);
        // Must not panic nor buffer.
        cb(vec![0; 1024]);
    }
}
