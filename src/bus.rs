//! Event bus seam.
//!
//! The engine only needs to subscribe to a topic and publish to a topic.
//! [`ZenohBus`] provides both on top of a zenoh session; tests provide their
//! own in-memory bus.

use std::future::Future;

use tracing::debug;
use zenoh::{
    Session,
    handlers::{RingChannel, RingChannelHandler},
    pubsub::Subscriber,
    sample::Sample,
};

use crate::error::{Error, Result};

/// A raw message as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A live subscription. Dropping it releases the subscription.
pub trait MessageSource: Send + 'static {
    /// Wait for the next message. An error means the subscription is gone
    /// and will never yield again.
    fn recv(&mut self) -> impl Future<Output = Result<Envelope>> + Send;

    /// The next message if one is already waiting, without blocking.
    fn try_recv(&mut self) -> Result<Option<Envelope>>;
}

pub trait EventBus: Clone + Send + Sync + 'static {
    type Subscription: MessageSource;

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<Self::Subscription>> + Send;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

/// Samples zenoh holds per subscriber before overwriting the oldest. A full
/// FIFO handler would block the session's receive thread instead.
pub const SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct ZenohBus {
    session: Session,
}

impl ZenohBus {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

pub struct ZenohSubscription {
    topic: String,
    subscriber: Subscriber<RingChannelHandler<Sample>>,
}

fn envelope(sample: Sample) -> Envelope {
    Envelope {
        topic: sample.key_expr().to_string(),
        payload: sample.payload().to_bytes().into_owned(),
    }
}

impl MessageSource for ZenohSubscription {
    async fn recv(&mut self) -> Result<Envelope> {
        let sample = self
            .subscriber
            .recv_async()
            .await
            .map_err(|e| Error::connection(&self.topic, e))?;
        Ok(envelope(sample))
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>> {
        let sample = self
            .subscriber
            .try_recv()
            .map_err(|e| Error::connection(&self.topic, e))?;
        Ok(sample.map(envelope))
    }
}

impl EventBus for ZenohBus {
    type Subscription = ZenohSubscription;

    async fn subscribe(&self, topic: &str) -> Result<ZenohSubscription> {
        let subscriber = self
            .session
            .declare_subscriber(topic.to_owned())
            .with(RingChannel::new(SUBSCRIBER_CAPACITY))
            .await
            .map_err(|e| Error::connection(topic, e))?;
        debug!(topic, "declared subscriber");
        Ok(ZenohSubscription {
            topic: topic.to_owned(),
            subscriber,
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(topic.to_owned(), payload)
            .await
            .map_err(|e| Error::publish(topic, e))
    }
}
