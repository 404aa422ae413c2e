use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use journal_core::job_events::JobEvent;
use journal_core::types::JobId;
use tokio::sync::{mpsc, RwLock};

/// Identifier of one live subscription, unique per registry.
pub type SubscriberId = u64;

/// What a subscriber's channel carries.
///
/// End-of-stream is signalled by the channel closing, which happens after
/// the job's terminal event or on shutdown.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberMessage {
    Event(JobEvent),
    /// Keepalive; transports map this to their own ping frame.
    Ping,
}

/// Channel sender half for pushing messages to one subscriber.
pub type SubscriberSender = mpsc::UnboundedSender<SubscriberMessage>;

/// Receiving side handed to whoever opened the subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub job_id: JobId,
    pub receiver: mpsc::UnboundedReceiver<SubscriberMessage>,
}

/// Result of fanning one event out to a job's subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    /// Subscribers whose channel was closed; they have been removed.
    pub dropped: usize,
}

/// Tracks live subscribers per job.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared between the engine and the transport layer.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<JobId, HashMap<SubscriberId, SubscriberSender>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber for `job_id`.
    pub async fn subscribe(&self, job_id: JobId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .await
            .entry(job_id)
            .or_default()
            .insert(id, tx);

        tracing::debug!(job_id = %job_id, subscriber_id = id, "Subscriber added");
        Subscription {
            id,
            job_id,
            receiver: rx,
        }
    }

    /// Remove one subscriber, e.g. when its client disconnects.
    pub async fn unsubscribe(&self, job_id: JobId, id: SubscriberId) {
        let mut subs = self.subscribers.write().await;
        if let Some(job_subs) = subs.get_mut(&job_id) {
            job_subs.remove(&id);
            if job_subs.is_empty() {
                subs.remove(&job_id);
            }
        }
    }

    /// Send an event to every subscriber of `job_id`.
    ///
    /// Subscribers whose channel has closed are removed here; the caller
    /// only sees the counts.
    pub async fn publish(&self, job_id: JobId, event: JobEvent) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        let mut dead: Vec<SubscriberId> = Vec::new();

        {
            let subs = self.subscribers.read().await;
            let Some(job_subs) = subs.get(&job_id) else {
                return outcome;
            };
            for (id, sender) in job_subs {
                if sender.send(SubscriberMessage::Event(event.clone())).is_ok() {
                    outcome.delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            outcome.dropped = dead.len();
            for id in dead {
                self.unsubscribe(job_id, id).await;
            }
            tracing::debug!(
                job_id = %job_id,
                dropped = outcome.dropped,
                "Removed closed subscribers",
            );
        }

        outcome
    }

    /// Drop every subscriber of `job_id`, ending their streams.
    ///
    /// Returns how many subscribers were closed.
    pub async fn close_job(&self, job_id: JobId) -> usize {
        self.subscribers
            .write()
            .await
            .remove(&job_id)
            .map_or(0, |subs| subs.len())
    }

    /// Send a ping to every subscriber of every job.
    ///
    /// Subscribers whose channel has closed are removed, as in [`publish`].
    ///
    /// [`publish`]: Self::publish
    pub async fn ping_all(&self) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        let mut dead: Vec<(JobId, SubscriberId)> = Vec::new();

        {
            let subs = self.subscribers.read().await;
            for (job_id, job_subs) in subs.iter() {
                for (id, sender) in job_subs {
                    if sender.send(SubscriberMessage::Ping).is_ok() {
                        outcome.delivered += 1;
                    } else {
                        dead.push((*job_id, *id));
                    }
                }
            }
        }

        if !dead.is_empty() {
            outcome.dropped = dead.len();
            for (job_id, id) in dead {
                self.unsubscribe(job_id, id).await;
            }
            tracing::debug!(dropped = outcome.dropped, "Removed closed subscribers on ping");
        }

        outcome
    }

    pub async fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers
            .read()
            .await
            .get(&job_id)
            .map_or(0, HashMap::len)
    }

    /// Total live subscribers across all jobs.
    pub async fn connection_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// End every stream, then clear the registry.
    ///
    /// Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut subs = self.subscribers.write().await;
        let count: usize = subs.values().map(HashMap::len).sum();
        subs.clear();
        tracing::info!(count, "Closed all job subscribers");
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::job_events::JobEventType;

    fn job_id() -> JobId {
        uuid::Uuid::now_v7()
    }

    #[tokio::test]
    async fn publish_reaches_only_that_jobs_subscribers() {
        let registry = SubscriberRegistry::new();
        let (a, b) = (job_id(), job_id());
        let mut sub_a = registry.subscribe(a).await;
        let mut sub_b = registry.subscribe(b).await;

        let outcome = registry.publish(a, JobEvent::started(a)).await;
        assert_eq!(outcome, PublishOutcome { delivered: 1, dropped: 0 });

        match sub_a.receiver.recv().await {
            Some(SubscriberMessage::Event(event)) => {
                assert_eq!(event.job_id, a);
                assert_eq!(event.event_type, JobEventType::Started);
            }
            other => panic!("expected started event, got {other:?}"),
        }
        assert!(sub_b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channels_are_removed_on_publish() {
        let registry = SubscriberRegistry::new();
        let id = job_id();
        let _live = registry.subscribe(id).await;
        let gone = registry.subscribe(id).await;
        drop(gone);

        let outcome = registry.publish(id, JobEvent::started(id)).await;
        assert_eq!(outcome, PublishOutcome { delivered: 1, dropped: 1 });
        assert_eq!(registry.subscriber_count(id).await, 1);
    }

    #[tokio::test]
    async fn close_job_ends_streams() {
        let registry = SubscriberRegistry::new();
        let id = job_id();
        let mut sub = registry.subscribe(id).await;
        registry.publish(id, JobEvent::cancelled(id, 10)).await;

        assert_eq!(registry.close_job(id).await, 1);
        assert!(matches!(
            sub.receiver.recv().await,
            Some(SubscriberMessage::Event(_))
        ));
        assert!(sub.receiver.recv().await.is_none());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_empty_job_entries() {
        let registry = SubscriberRegistry::new();
        let id = job_id();
        let sub = registry.subscribe(id).await;
        registry.unsubscribe(id, sub.id).await;
        assert_eq!(registry.subscriber_count(id).await, 0);
        assert_eq!(registry.publish(id, JobEvent::started(id)).await.delivered, 0);
    }

    #[tokio::test]
    async fn ping_and_shutdown_touch_every_job() {
        let registry = SubscriberRegistry::new();
        let mut first = registry.subscribe(job_id()).await;
        let mut second = registry.subscribe(job_id()).await;
        assert_eq!(registry.connection_count().await, 2);

        let outcome = registry.ping_all().await;
        assert_eq!(outcome, PublishOutcome { delivered: 2, dropped: 0 });
        assert_eq!(first.receiver.recv().await, Some(SubscriberMessage::Ping));
        assert_eq!(second.receiver.recv().await, Some(SubscriberMessage::Ping));

        registry.shutdown_all().await;
        assert!(first.receiver.recv().await.is_none());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn closed_channels_are_removed_on_ping() {
        let registry = SubscriberRegistry::new();
        let id = job_id();
        let mut live = registry.subscribe(id).await;
        let gone = registry.subscribe(job_id()).await;
        drop(gone);

        let outcome = registry.ping_all().await;

        assert_eq!(outcome, PublishOutcome { delivered: 1, dropped: 1 });
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(live.receiver.recv().await, Some(SubscriberMessage::Ping));
    }
}
