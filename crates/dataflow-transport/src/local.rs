use crate::{Bus, Error, Result, WireEnvelope};
use dataflow_log::ActorId;
use futures::StreamExt;
use futures_core::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};

const DONE_TOPIC_CAPACITY: usize = 256;

/// An in-process bus, addressed by [`ActorId`] directly rather than by
/// a network location -- standing in for a keyed pub/sub transport in
/// the harness and in tests.
///
/// Mailboxes are single-subscriber: `subscribe_mailbox` replaces any
/// prior subscription for the same id, mirroring a restarted actor
/// resubscribing at a new incarnation. `node-done` and `input-done`
/// are multi-subscriber broadcast topics, since many producers may be
/// watching the same node for completion.
#[derive(Default)]
pub struct LocalBus {
    mailboxes: Mutex<HashMap<ActorId, mpsc::UnboundedSender<WireEnvelope>>>,
    node_done: Mutex<HashMap<u32, broadcast::Sender<u32>>>,
    input_done: Mutex<HashMap<u32, broadcast::Sender<u32>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_done_topic(&self, node: u32) -> broadcast::Sender<u32> {
        self.node_done
            .lock()
            .unwrap()
            .entry(node)
            .or_insert_with(|| broadcast::channel(DONE_TOPIC_CAPACITY).0)
            .clone()
    }

    fn input_done_topic(&self, node: u32) -> broadcast::Sender<u32> {
        self.input_done
            .lock()
            .unwrap()
            .entry(node)
            .or_insert_with(|| broadcast::channel(DONE_TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    async fn publish_mailbox(&self, target: ActorId, envelope: WireEnvelope) -> Result<()> {
        let sender = self
            .mailboxes
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .ok_or(Error::NoSuchMailbox(target))?;
        // A dropped receiver (actor mid-crash) is the in-process analogue
        // of TransientPublishError: log and let the output log retain
        // the entry for eventual replay, don't propagate a hard error.
        if sender.send(envelope).is_err() {
            tracing::debug!(%target, "publish to mailbox with no live receiver, dropping");
        }
        Ok(())
    }

    async fn subscribe_mailbox(&self, who: ActorId) -> BoxStream<'static, WireEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.lock().unwrap().insert(who, tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    async fn publish_node_done(&self, node: u32, channel: u32) {
        let _ = self.node_done_topic(node).send(channel);
    }

    async fn subscribe_node_done(&self, node: u32) -> BoxStream<'static, u32> {
        let rx = self.node_done_topic(node).subscribe();
        BroadcastStream::new(rx).filter_map(|r| async move { r.ok() }).boxed()
    }

    async fn publish_input_done(&self, node: u32, channel: u32) {
        let _ = self.input_done_topic(node).send(channel);
    }

    async fn subscribe_input_done(&self, node: u32) -> BoxStream<'static, u32> {
        let rx = self.input_done_topic(node).subscribe();
        BroadcastStream::new(rx).filter_map(|r| async move { r.ok() }).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_log::Payload;

    fn actor(node: u32, channel: u32) -> ActorId {
        ActorId::new(node, channel)
    }

    #[tokio::test]
    async fn publish_then_subscribe_round_trips_an_envelope() {
        let bus = LocalBus::new();
        let mut stream = bus.subscribe_mailbox(actor(1, 0)).await;
        bus.publish_mailbox(
            actor(1, 0),
            WireEnvelope {
                src: actor(0, 0),
                seq: 7,
                payload: Payload::Done,
            },
        )
        .await
        .unwrap();

        let got = stream.next().await.unwrap();
        assert_eq!(got.src, actor(0, 0));
        assert_eq!(got.seq, 7);
        assert!(got.payload.is_done());
    }

    #[tokio::test]
    async fn publish_to_unknown_target_is_an_error() {
        let bus = LocalBus::new();
        let err = bus
            .publish_mailbox(
                actor(9, 9),
                WireEnvelope {
                    src: actor(0, 0),
                    seq: 1,
                    payload: Payload::Done,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchMailbox(_)));
    }

    #[tokio::test]
    async fn node_done_fans_out_to_every_subscriber() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe_node_done(5).await;
        let mut b = bus.subscribe_node_done(5).await;
        bus.publish_node_done(5, 2).await;
        assert_eq!(a.next().await, Some(2));
        assert_eq!(b.next().await, Some(2));
    }

    #[tokio::test]
    async fn resubscribing_a_mailbox_replaces_the_prior_subscription() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe_mailbox(actor(2, 0)).await;
        let mut second = bus.subscribe_mailbox(actor(2, 0)).await;

        bus.publish_mailbox(
            actor(2, 0),
            WireEnvelope {
                src: actor(0, 0),
                seq: 1,
                payload: Payload::Done,
            },
        )
        .await
        .unwrap();

        assert_eq!(second.next().await.unwrap().seq, 1);
        // The old subscription's sender was replaced; it observes the
        // sender side closing rather than receiving the new message.
        assert!(first.next().await.is_none());
    }
}
