use std::{future::Future, num::NonZeroU32};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    bus::{Envelope, EventBus, MessageSource},
    config::Subscription,
    error::Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub topic: String,
    /// Arrival index of this message on the subscription, counting the
    /// messages skipped by decimation.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub meta: Metadata,
    pub payload: Vec<u8>,
}

/// Per-topic consumer of delivered messages.
///
/// An error returned from `handle` is logged and the stream continues.
pub trait MessageSink: Send + 'static {
    fn handle(&mut self, delivery: Delivery) -> impl Future<Output = Result<()>> + Send;
}

/// Passes message 0, N, 2N, ... and drops the rest.
#[derive(Debug, Clone)]
pub struct Decimator {
    every_n: NonZeroU32,
    seen: u64,
}

impl Decimator {
    pub fn new(every_n: NonZeroU32) -> Self {
        Self { every_n, seen: 0 }
    }

    /// Count one arrival and return its sequence if it should be delivered.
    pub fn admit(&mut self) -> Option<u64> {
        let sequence = self.seen;
        self.seen += 1;
        (sequence % u64::from(self.every_n.get()) == 0).then_some(sequence)
    }
}

/// One subscription, pulled lazily. Not restartable: once `next` returns an
/// error the subscriber is spent and a new one must be opened.
pub struct StreamSubscriber<S> {
    subscription: Subscription,
    source: S,
    decimator: Decimator,
}

impl<S: MessageSource> StreamSubscriber<S> {
    pub fn new(subscription: Subscription, source: S) -> Self {
        let decimator = Decimator::new(subscription.every_n);
        Self {
            subscription,
            source,
            decimator,
        }
    }

    pub async fn open<B>(bus: &B, subscription: Subscription) -> Result<Self>
    where
        B: EventBus<Subscription = S>,
    {
        let source = bus.subscribe(&subscription.topic).await?;
        debug!(
            topic = %subscription.topic,
            every_n = subscription.every_n.get(),
            latest_only = subscription.latest_only,
            "subscribed"
        );
        Ok(Self::new(subscription, source))
    }

    pub fn topic(&self) -> &str {
        &self.subscription.topic
    }

    /// The next delivered message, skipping decimated ones. With
    /// `latest_only` set, messages already waiting behind it are drained and
    /// the newest admitted one is returned instead.
    pub async fn next(&mut self) -> Result<Delivery> {
        let mut delivery = loop {
            let envelope = self.source.recv().await?;
            if let Some(delivery) = self.admit(envelope) {
                break delivery;
            }
        };
        if self.subscription.latest_only {
            let mut superseded = 0u64;
            // A failed try_recv surfaces again on the next recv.
            while let Ok(Some(envelope)) = self.source.try_recv() {
                if let Some(newer) = self.admit(envelope) {
                    delivery = newer;
                    superseded += 1;
                }
            }
            if superseded > 0 {
                trace!(topic = %delivery.meta.topic, superseded, "dropped stale messages");
            }
        }
        Ok(delivery)
    }

    fn admit(&mut self, envelope: Envelope) -> Option<Delivery> {
        let Envelope { topic, payload } = envelope;
        self.decimator.admit().map(|sequence| Delivery {
            meta: Metadata { topic, sequence },
            payload,
        })
    }

    /// Forward every delivered message to `sink` until cancelled or the
    /// subscription fails. The subscription is released when this returns.
    pub async fn run<K: MessageSink>(mut self, mut sink: K, cancel: CancellationToken) -> Result<()> {
        let topic = self.subscription.topic.clone();
        loop {
            let delivery = select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(%topic, "subscription cancelled");
                    return Ok(());
                }
                delivery = self.next() => delivery?,
            };
            let sequence = delivery.meta.sequence;
            if let Err(e) = sink.handle(delivery).await {
                warn!(%topic, sequence, "skipping message: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::sync::mpsc;

    struct ChannelSource(mpsc::UnboundedReceiver<Envelope>);

    impl MessageSource for ChannelSource {
        async fn recv(&mut self) -> Result<Envelope> {
            self.0
                .recv()
                .await
                .ok_or_else(|| Error::connection("test", "closed"))
        }

        fn try_recv(&mut self) -> Result<Option<Envelope>> {
            match self.0.try_recv() {
                Ok(envelope) => Ok(Some(envelope)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::connection("test", "closed")),
            }
        }
    }

    fn envelope(i: u8) -> Envelope {
        Envelope {
            topic: "test".into(),
            payload: vec![i],
        }
    }

    fn subscriber(every_n: u32) -> (mpsc::UnboundedSender<Envelope>, StreamSubscriber<ChannelSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Subscription::every("test", NonZeroU32::new(every_n).unwrap());
        (tx, StreamSubscriber::new(subscription, ChannelSource(rx)))
    }

    #[test]
    fn decimator_admits_every_nth() {
        for n in 1..=7u32 {
            let mut decimator = Decimator::new(NonZeroU32::new(n).unwrap());
            let admitted: Vec<u64> = (0..50).filter_map(|_| decimator.admit()).collect();
            let expected: Vec<u64> = (0..50).step_by(n as usize).collect();
            assert_eq!(admitted, expected, "every_n = {n}");
        }
    }

    #[tokio::test]
    async fn delivers_every_nth_in_order() {
        for n in 1..=5u32 {
            let (tx, mut sub) = subscriber(n);
            for i in 0..40u8 {
                tx.send(envelope(i)).unwrap();
            }
            drop(tx);

            let mut delivered = Vec::new();
            while let Ok(delivery) = sub.next().await {
                assert_eq!(u64::from(delivery.payload[0]), delivery.meta.sequence);
                delivered.push(delivery.payload[0]);
            }
            let expected: Vec<u8> = (0..40).step_by(n as usize).collect();
            assert_eq!(delivered, expected, "every_n = {n}");
        }
    }

    fn latest_subscriber(every_n: u32) -> (mpsc::UnboundedSender<Envelope>, StreamSubscriber<ChannelSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::every("test", NonZeroU32::new(every_n).unwrap());
        subscription.latest_only = true;
        (tx, StreamSubscriber::new(subscription, ChannelSource(rx)))
    }

    #[tokio::test]
    async fn latest_only_skips_backlog() {
        let (tx, mut sub) = latest_subscriber(1);
        for i in 0..10u8 {
            tx.send(envelope(i)).unwrap();
        }
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload, [9]);
        assert_eq!(delivery.meta.sequence, 9);

        tx.send(envelope(10)).unwrap();
        assert_eq!(sub.next().await.unwrap().payload, [10]);
    }

    #[tokio::test]
    async fn latest_only_respects_decimation() {
        let (tx, mut sub) = latest_subscriber(4);
        for i in 0..11u8 {
            tx.send(envelope(i)).unwrap();
        }
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload, [8]);
        assert_eq!(delivery.meta.sequence, 8);
    }

    #[tokio::test]
    async fn latest_only_reports_loss_after_backlog() {
        let (tx, mut sub) = latest_subscriber(1);
        tx.send(envelope(0)).unwrap();
        tx.send(envelope(1)).unwrap();
        drop(tx);
        assert_eq!(sub.next().await.unwrap().payload, [1]);
        assert!(matches!(sub.next().await, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn closed_source_ends_stream() {
        let (tx, mut sub) = subscriber(1);
        drop(tx);
        assert!(matches!(sub.next().await, Err(Error::Connection { .. })));
    }

    struct FailOn {
        bad: u8,
        seen: mpsc::UnboundedSender<u8>,
    }

    impl MessageSink for FailOn {
        async fn handle(&mut self, delivery: Delivery) -> Result<()> {
            let value = delivery.payload[0];
            if value == self.bad {
                return Err(Error::Decode("bad frame".into()));
            }
            let _ = self.seen.send(value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_error_does_not_end_stream() {
        let (tx, sub) = subscriber(1);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        for i in 0..4u8 {
            tx.send(envelope(i)).unwrap();
        }
        drop(tx);

        let result = sub.run(FailOn { bad: 1, seen: seen_tx }, CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Connection { .. })));

        let mut seen = Vec::new();
        while let Ok(v) = seen_rx.try_recv() {
            seen.push(v);
        }
        assert_eq!(seen, [0, 2, 3]);
    }

    #[tokio::test]
    async fn cancel_stops_idle_subscriber() {
        let (_tx, sub) = subscriber(1);
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sub.run(FailOn { bad: 0, seen: seen_tx }, cancel.clone()));
        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("subscriber exits promptly")
            .unwrap();
        assert!(result.is_ok());
    }
}
