//! Per-member event dispatcher.
//!
//! Each member with pending work gets one queue task. Events for the same
//! member run strictly in arrival order; different members run
//! concurrently. A queue task exits after sitting idle for the configured
//! time and is recreated on the next event.
//!
//! Events are enqueued while the actor map is locked, and an idle task only
//! removes itself after seeing an empty queue under the same lock. No event
//! can land in a queue whose task is gone.

use crate::events::{Event, InboundEvent};
use crate::handler::{EventHandler, HandlerError, Outcome};
use solaris_common::member::MemberId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Reply = oneshot::Sender<Result<Outcome, HandlerError>>;

struct Envelope {
    event: Event,
    reply: Option<Reply>,
}

struct Actor {
    tx: mpsc::UnboundedSender<Envelope>,
    handle: JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct Actors {
    map: HashMap<MemberId, Actor>,
    next_generation: u64,
    closed: bool,
}

type SharedActors = Arc<Mutex<Actors>>;

fn lock(actors: &SharedActors) -> MutexGuard<'_, Actors> {
    actors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub announced: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    handler: Arc<EventHandler>,
    actors: SharedActors,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(handler: Arc<EventHandler>, idle: Duration) -> Self {
        Self {
            handler,
            actors: Arc::new(Mutex::new(Actors::default())),
            idle,
        }
    }

    pub fn handler(&self) -> &Arc<EventHandler> {
        &self.handler
    }

    /// Members with a live queue task
    pub fn active_members(&self) -> usize {
        lock(&self.actors).map.len()
    }

    /// Queue an event and wait for its outcome
    pub async fn submit(&self, event: Event) -> Result<Outcome, HandlerError> {
        let member = event.member();
        let (tx, rx) = oneshot::channel();
        self.enqueue(Envelope {
            event,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| HandlerError::QueueClosed(member))?
    }

    /// Queue an event without waiting; failures are logged
    pub fn dispatch(&self, event: Event) -> Result<(), HandlerError> {
        self.enqueue(Envelope { event, reply: None })
    }

    /// Translate a raw platform event and queue it. Returns the queued event.
    pub async fn ingest(&self, inbound: &InboundEvent) -> Result<Option<Event>, HandlerError> {
        match self.handler.gate().translate(inbound).await {
            Some(event) => {
                self.dispatch(event)?;
                Ok(Some(event))
            }
            None => {
                debug!("Ignoring {:?}", inbound);
                Ok(None)
            }
        }
    }

    /// Re-sync every member whose roles lag their level
    pub async fn reconcile_pending(&self) -> Result<ReconcileSummary, HandlerError> {
        let pending = self.handler.engine().pending_sync().await?;
        let mut summary = ReconcileSummary {
            checked: pending.len(),
            ..ReconcileSummary::default()
        };
        if pending.is_empty() {
            debug!("Reconcile: nothing pending");
            return Ok(summary);
        }

        info!("Reconciling {} member(s)", pending.len());
        let mut waiting = Vec::with_capacity(pending.len());
        for record in &pending {
            let (tx, rx) = oneshot::channel();
            self.enqueue(Envelope {
                event: Event::Reconcile(record.member_id),
                reply: Some(tx),
            })?;
            waiting.push((record.member_id, rx));
        }

        for (member, rx) in waiting {
            match rx.await {
                Ok(Ok(outcome)) => {
                    if outcome.announced.is_some() {
                        summary.announced += 1;
                    }
                }
                Ok(Err(e)) => {
                    warn!("Reconcile of member {} failed: {}", member, e);
                    summary.failed += 1;
                }
                Err(_) => {
                    warn!("Reconcile of member {} dropped", member);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Reconcile done: {} checked, {} announced, {} failed",
            summary.checked, summary.announced, summary.failed
        );
        Ok(summary)
    }

    /// Stop accepting events and wait for every queue to drain
    pub async fn shutdown(&self) {
        let drained: Vec<(MemberId, Actor)> = {
            let mut actors = lock(&self.actors);
            actors.closed = true;
            actors.map.drain().collect()
        };

        for (member, actor) in drained {
            drop(actor.tx);
            if let Err(e) = actor.handle.await {
                error!("Queue task for member {} ended abnormally: {}", member, e);
            }
        }
        debug!("Dispatcher stopped");
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let member = envelope.event.member();
        let mut actors = lock(&self.actors);
        if actors.closed {
            return Err(HandlerError::QueueClosed(member));
        }

        let envelope = match actors.map.get(&member) {
            Some(actor) => match actor.tx.send(envelope) {
                Ok(()) => return Ok(()),
                // task exited without deregistering (panic); replace it
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        actors.next_generation += 1;
        let generation = actors.next_generation;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(envelope)
            .map_err(|_| HandlerError::QueueClosed(member))?;

        let handle = tokio::spawn(run_queue(
            member,
            generation,
            rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.actors),
            self.idle,
        ));
        actors.map.insert(
            member,
            Actor {
                tx,
                handle,
                generation,
            },
        );
        Ok(())
    }
}

async fn run_queue(
    member: MemberId,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    handler: Arc<EventHandler>,
    actors: SharedActors,
    idle: Duration,
) {
    debug!("Queue task started for member {}", member);
    loop {
        let envelope = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(_) => {
                let next = {
                    let mut actors = lock(&actors);
                    match rx.try_recv() {
                        Ok(envelope) => Some(envelope),
                        Err(_) => {
                            let ours = actors
                                .map
                                .get(&member)
                                .is_some_and(|a| a.generation == generation);
                            if ours {
                                actors.map.remove(&member);
                            }
                            None
                        }
                    }
                };
                match next {
                    Some(envelope) => envelope,
                    None => break,
                }
            }
        };

        let event = envelope.event;
        let result = handler.handle(event).await;
        match envelope.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    if e.is_retryable() {
                        warn!(
                            "{} for member {} failed, left for reconcile: {}",
                            event.kind(),
                            member,
                            e
                        );
                    } else {
                        error!("{} for member {} failed: {}", event.kind(), member, e);
                    }
                }
            }
        }
    }
    debug!("Queue task for member {} exited", member);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProgressionEngine;
    use crate::events::VerificationGate;
    use crate::handler::HandlerSettings;
    use crate::notifier::RecordingNotifier;
    use crate::platform::MemoryPlatform;
    use crate::retry::RetryPolicy;
    use crate::synchronizer::RoleSynchronizer;
    use solaris_common::levels::{LevelDefinition, LevelTable};
    use solaris_common::store::{MemoryStore, ProgressionStore};

    fn setup(idle: Duration) -> (Arc<MemoryStore>, Arc<RecordingNotifier>, Dispatcher) {
        let table = Arc::new(
            LevelTable::new(vec![
                LevelDefinition::new("CL-0", 0),
                LevelDefinition::new("CL-1", 100),
                LevelDefinition::new("CL-2", 300),
            ])
            .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let platform = Arc::new(MemoryPlatform::with_ladder(&table));
        let engine = Arc::new(ProgressionEngine::new(
            store.clone(),
            Arc::clone(&table),
            RetryPolicy::immediate(3),
        ));
        let handler = EventHandler::new(
            engine,
            RoleSynchronizer::new(platform, table, Duration::from_secs(1)),
            notifier.clone(),
            Arc::new(VerificationGate::new("✅", Some(42))),
            HandlerSettings::default(),
        );
        (store, notifier, Dispatcher::new(Arc::new(handler), idle))
    }

    #[tokio::test]
    async fn test_same_member_events_are_serialized() {
        let (store, notifier, dispatcher) = setup(Duration::from_secs(5));
        for _ in 0..150 {
            dispatcher.dispatch(Event::ActivityMessage(MemberId(1))).unwrap();
        }
        dispatcher.shutdown().await;

        let record = store.get(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(record.points, 150);
        assert_eq!(record.level, 1);
        assert_eq!(notifier.promotions_for(MemberId(1)), vec![1]);
    }

    #[tokio::test]
    async fn test_members_run_independently() {
        let (store, _, dispatcher) = setup(Duration::from_secs(5));
        for member in 1..=10 {
            for _ in 0..5 {
                dispatcher
                    .dispatch(Event::ActivityMessage(MemberId(member)))
                    .unwrap();
            }
        }
        assert!(dispatcher.active_members() <= 10);
        dispatcher.shutdown().await;

        for member in 1..=10 {
            assert_eq!(store.get(MemberId(member)).await.unwrap().unwrap().points, 5);
        }
    }

    #[tokio::test]
    async fn test_idle_queue_retires_and_respawns() {
        let (store, _, dispatcher) = setup(Duration::from_millis(20));
        dispatcher.submit(Event::ActivityMessage(MemberId(7))).await.unwrap();
        assert_eq!(dispatcher.active_members(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.active_members(), 0);

        dispatcher.submit(Event::ActivityMessage(MemberId(7))).await.unwrap();
        assert_eq!(store.get(MemberId(7)).await.unwrap().unwrap().points, 2);
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let (_, _, dispatcher) = setup(Duration::from_secs(5));
        dispatcher.shutdown().await;
        let err = dispatcher.dispatch(Event::MemberJoined(MemberId(1))).unwrap_err();
        assert!(matches!(err, HandlerError::QueueClosed(MemberId(1))));
    }

    #[tokio::test]
    async fn test_ingest_filters_and_routes() {
        let (store, _, dispatcher) = setup(Duration::from_secs(5));
        let bot = InboundEvent::MessageCreated {
            author_id: MemberId(3),
            is_bot: true,
        };
        assert_eq!(dispatcher.ingest(&bot).await.unwrap(), None);

        let reaction = InboundEvent::ReactionAdded {
            member_id: MemberId(3),
            message_id: 42,
            emoji: "✅".into(),
            is_bot: false,
        };
        assert_eq!(
            dispatcher.ingest(&reaction).await.unwrap(),
            Some(Event::Verified(MemberId(3)))
        );
        dispatcher.shutdown().await;
        assert_eq!(store.get(MemberId(3)).await.unwrap().unwrap().level, 1);
    }

    #[tokio::test]
    async fn test_reconcile_pending_announces_owed_levels() {
        let (store, notifier, dispatcher) = setup(Duration::from_secs(5));
        let mut lagging = solaris_common::member::MemberRecord::new(MemberId(9));
        lagging.points = 320;
        lagging.level = 2;
        lagging.synced_level = Some(0);
        store.upsert(&lagging).await.unwrap();

        let summary = dispatcher.reconcile_pending().await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                checked: 1,
                announced: 1,
                failed: 0
            }
        );
        assert_eq!(notifier.promotions_for(MemberId(9)), vec![2]);

        let again = dispatcher.reconcile_pending().await.unwrap();
        assert_eq!(again.checked, 0);
    }
}
