//! Epoch-gated message router
//!
//! Per-recipient bounded FIFO queues in two epoch buckets (active and next),
//! with TTL enforcement at dequeue, bounded retry, topology validation at
//! ingress, and broadcast expansion to per-recipient unicasts.
//!
//! New messages land in the active bucket and are stamped with the active
//! epoch, unless a switch is in PREPARE/QUIESCE, in which case they land in
//! the next bucket stamped `epoch + 1`. Dequeue serves the active bucket
//! only; next-epoch traffic becomes observable at COMMIT and no earlier. On
//! ABORT, next-epoch queues are appended behind the active tails per
//! recipient, preserving FIFO order.
//!
//! Epochs are router-authoritative: whatever a caller wrote on the message
//! is overwritten at ingress.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::domain_types::AgentId;
use crate::messaging::domain_types::{DropReason, Epoch, Message, MessageId, Recipient, Topology};
use crate::messaging::errors::RouterError;
use crate::messaging::switch::TopologyCell;
use crate::messaging::topology_guard::TopologyGuard;

/// Receipt for one successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReceipt {
    /// Id of the enqueued message (freshly minted for broadcast copies).
    pub msg_id: MessageId,
    /// Epoch the message was stamped with.
    pub epoch: Epoch,
}

/// Per-target result of a broadcast expansion.
#[derive(Debug)]
pub struct BroadcastDelivery {
    /// Target this copy was addressed to.
    pub recipient: AgentId,
    /// Enqueue outcome for this target; one failure never aborts the rest.
    pub outcome: Result<RouteReceipt, RouterError>,
}

/// Result of a `route` call.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Single-recipient enqueue.
    Unicast(RouteReceipt),
    /// Broadcast expansion with per-target outcomes.
    Broadcast(Vec<BroadcastDelivery>),
}

impl RouteOutcome {
    /// Number of copies actually enqueued.
    #[must_use]
    pub fn delivered(&self) -> usize {
        match self {
            Self::Unicast(_) => 1,
            Self::Broadcast(targets) => {
                targets.iter().filter(|t| t.outcome.is_ok()).count()
            }
        }
    }
}

/// Mutable routing state, serialized by one mutex.
struct RoutingState {
    active_epoch: u64,
    route_to_next: bool,
    active: BTreeMap<AgentId, VecDeque<Message>>,
    next: BTreeMap<AgentId, VecDeque<Message>>,
}

impl RoutingState {
    fn empty_buckets(recipients: &BTreeSet<AgentId>, cap: usize) -> BTreeMap<AgentId, VecDeque<Message>> {
        recipients
            .iter()
            .map(|r| (r.clone(), VecDeque::with_capacity(cap.min(1024))))
            .collect()
    }
}

/// Epoch-gated router over a closed set of recipients.
pub struct Router {
    recipients: BTreeSet<AgentId>,
    cap: usize,
    ttl: Duration,
    max_attempts: u32,
    guard: TopologyGuard,
    topology: Arc<TopologyCell>,
    state: Mutex<RoutingState>,
    // Lock-free mirror of the active epoch; written only under the state lock.
    epoch_mirror: AtomicU64,
    drops: DashMap<DropReason, u64>,
    wakeups: BTreeMap<AgentId, Arc<Notify>>,
}

impl Router {
    /// Creates a router over `recipients`, reading topology from `cell`.
    ///
    /// # Errors
    /// Returns [`RouterError::NoRecipients`] when the set is empty.
    pub fn new(
        recipients: impl IntoIterator<Item = AgentId>,
        config: &RuntimeConfig,
        cell: Arc<TopologyCell>,
    ) -> Result<Self, RouterError> {
        let recipients: BTreeSet<AgentId> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return Err(RouterError::NoRecipients);
        }
        let cap = config.queue_cap_per_agent.as_usize();
        let wakeups = recipients
            .iter()
            .map(|r| (r.clone(), Arc::new(Notify::new())))
            .collect();
        Ok(Self {
            state: Mutex::new(RoutingState {
                active_epoch: 0,
                route_to_next: false,
                active: RoutingState::empty_buckets(&recipients, cap),
                next: RoutingState::empty_buckets(&recipients, cap),
            }),
            cap,
            ttl: config.message_ttl.as_duration(),
            max_attempts: config.max_attempts.as_u32(),
            guard: TopologyGuard::new(config.fanout_limit),
            topology: cell,
            epoch_mirror: AtomicU64::new(0),
            drops: DashMap::new(),
            wakeups,
            recipients,
        })
    }

    /// The closed recipient set.
    #[must_use]
    pub fn recipients(&self) -> &BTreeSet<AgentId> {
        &self.recipients
    }

    /// Current active epoch (lock-free scalar read).
    #[must_use]
    pub fn active_epoch(&self) -> Epoch {
        Epoch::new(self.epoch_mirror.load(Ordering::Acquire))
    }

    /// Enqueues a message, expanding `BROADCAST` to per-recipient unicasts.
    ///
    /// The active topology is captured once per call; each enqueued copy is
    /// stamped with the epoch the router chose for it. Broadcast copies get
    /// freshly minted message ids so identity is never shared across queues.
    ///
    /// # Errors
    /// [`RouterError::InvalidRecipient`] for unknown unicast targets,
    /// [`RouterError::TopologyViolation`] when the pair or fanout is illegal,
    /// [`RouterError::QueueFull`] when the target queue is at capacity.
    /// Per-target broadcast failures are reported in the outcome, not as an
    /// error.
    pub async fn route(&self, msg: Message) -> Result<RouteOutcome, RouterError> {
        let mut wake_list: Vec<AgentId> = Vec::new();
        let outcome = {
            let mut state = self.state.lock().await;
            // The cell is written during commit under this same lock, so the
            // topology read and the epoch stamp cannot straddle a commit.
            let (topology, _) = self.topology.load();

            match msg.recipient.clone() {
                Recipient::Broadcast => {
                    let targets: Vec<AgentId> = self
                        .recipients
                        .iter()
                        .filter(|r| **r != msg.sender)
                        .cloned()
                        .collect();

                    if let Err(violation) =
                        self.guard
                            .validate_broadcast(topology, &msg.sender, targets.len())
                    {
                        self.count_drop(DropReason::TopologyViolation);
                        debug!(sender = %msg.sender, %topology, "broadcast rejected: {violation}");
                        return Err(violation.into());
                    }

                    let mut deliveries = Vec::with_capacity(targets.len());
                    for target in targets {
                        let outcome = match self.guard.validate_pair(topology, &msg.sender, &target)
                        {
                            Ok(()) => {
                                let mut copy = msg.clone();
                                copy.msg_id = MessageId::generate();
                                copy.recipient = Recipient::Agent(target.clone());
                                let enqueued = self.enqueue_locked(&mut state, copy, &target);
                                if enqueued.is_ok() {
                                    wake_list.push(target.clone());
                                }
                                enqueued
                            }
                            Err(violation) => {
                                self.count_drop(DropReason::TopologyViolation);
                                Err(violation.into())
                            }
                        };
                        deliveries.push(BroadcastDelivery {
                            recipient: target,
                            outcome,
                        });
                    }
                    RouteOutcome::Broadcast(deliveries)
                }
                Recipient::Agent(target) => {
                    if !self.recipients.contains(&target) {
                        self.count_drop(DropReason::InvalidRecipient);
                        debug!(sender = %msg.sender, recipient = %target, "unknown recipient");
                        return Err(RouterError::InvalidRecipient {
                            agent: target.to_string(),
                        });
                    }
                    self.guard
                        .validate_pair(topology, &msg.sender, &target)
                        .map_err(|violation| {
                            self.count_drop(DropReason::TopologyViolation);
                            debug!(sender = %msg.sender, recipient = %target, %topology, "{violation}");
                            RouterError::from(violation)
                        })?;
                    let receipt = self.enqueue_locked(&mut state, msg, &target)?;
                    wake_list.push(target);
                    RouteOutcome::Unicast(receipt)
                }
            }
        };
        for target in &wake_list {
            self.wake(target);
        }
        Ok(outcome)
    }

    /// Pops the next deliverable message for `agent` from the active epoch.
    ///
    /// Messages past their TTL are dropped (counted, silent) and the next
    /// one is considered. Never serves next-epoch traffic.
    ///
    /// # Errors
    /// [`RouterError::InvalidRecipient`] when `agent` is unknown.
    pub async fn dequeue(&self, agent: &AgentId) -> Result<Option<Message>, RouterError> {
        if !self.recipients.contains(agent) {
            return Err(RouterError::InvalidRecipient {
                agent: agent.to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let queue = state
            .active
            .get_mut(agent)
            .expect("every known recipient has an active queue");
        loop {
            let Some(mut msg) = queue.pop_front() else {
                return Ok(None);
            };
            if msg.expires.is_some_and(|deadline| Instant::now() > deadline) {
                msg.drop_reason = Some(DropReason::Expired);
                self.count_drop(DropReason::Expired);
                trace!(recipient = %agent, msg_id = %msg.msg_id, "expired at dequeue");
                continue;
            }
            return Ok(Some(msg));
        }
    }

    /// Like [`dequeue`](Self::dequeue) but waits up to `wait` for a message
    /// to arrive. Returns `None` on timeout; never waits unboundedly.
    ///
    /// # Errors
    /// [`RouterError::InvalidRecipient`] when `agent` is unknown.
    pub async fn dequeue_timeout(
        &self,
        agent: &AgentId,
        wait: Duration,
    ) -> Result<Option<Message>, RouterError> {
        let notify = self
            .wakeups
            .get(agent)
            .ok_or_else(|| RouterError::InvalidRecipient {
                agent: agent.to_string(),
            })?
            .clone();
        let deadline = Instant::now() + wait;
        loop {
            let notified = notify.notified();
            if let Some(msg) = self.dequeue(agent).await? {
                return Ok(Some(msg));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Re-enqueues a delivered message at the tail of its recipient's active
    /// queue, incrementing the attempt counter and refreshing the TTL.
    ///
    /// # Errors
    /// [`RouterError::MaxAttempts`] once the attempt cap is reached,
    /// [`RouterError::QueueFull`] when the active queue is at capacity,
    /// [`RouterError::InvalidRecipient`] for broadcast envelopes.
    pub async fn retry(&self, mut msg: Message) -> Result<RouteReceipt, RouterError> {
        let Recipient::Agent(target) = msg.recipient.clone() else {
            return Err(RouterError::InvalidRecipient {
                agent: Recipient::Broadcast.to_string(),
            });
        };

        if msg.attempt >= self.max_attempts {
            msg.drop_reason = Some(DropReason::MaxAttempts);
            self.count_drop(DropReason::MaxAttempts);
            debug!(msg_id = %msg.msg_id, attempts = msg.attempt, "retry cap exhausted");
            return Err(RouterError::MaxAttempts {
                msg_id: msg.msg_id,
                max_attempts: self.max_attempts,
            });
        }

        msg.attempt += 1;
        msg.redelivered = true;
        msg.drop_reason = None;
        let now = Instant::now();
        msg.created = now;
        msg.expires = Some(now + self.ttl);

        let receipt = {
            let mut state = self.state.lock().await;
            let epoch = state.active_epoch;
            let queue = state
                .active
                .get_mut(&target)
                .ok_or_else(|| RouterError::InvalidRecipient {
                    agent: target.to_string(),
                })?;
            if queue.len() >= self.cap {
                msg.drop_reason = Some(DropReason::QueueFull);
                self.count_drop(DropReason::QueueFull);
                return Err(RouterError::QueueFull {
                    agent: target.clone(),
                    capacity: self.cap,
                });
            }
            let msg_id = msg.msg_id;
            queue.push_back(msg);
            RouteReceipt {
                msg_id,
                epoch: Epoch::new(epoch),
            }
        };
        self.wake(&target);
        Ok(receipt)
    }

    fn enqueue_locked(
        &self,
        state: &mut RoutingState,
        mut msg: Message,
        target: &AgentId,
    ) -> Result<RouteReceipt, RouterError> {
        if msg.expires.is_none() {
            msg.expires = Some(msg.created + self.ttl);
        }

        let epoch = state.active_epoch + u64::from(state.route_to_next);
        msg.topo_epoch = Epoch::new(epoch);

        let route_to_next = state.route_to_next;
        let queue = if route_to_next {
            state.next.get_mut(target)
        } else {
            state.active.get_mut(target)
        }
        .expect("every known recipient has a queue in both buckets");

        if queue.len() >= self.cap {
            msg.drop_reason = Some(DropReason::QueueFull);
            self.count_drop(DropReason::QueueFull);
            warn!(recipient = %target, capacity = self.cap, "queue full at ingress");
            return Err(RouterError::QueueFull {
                agent: target.clone(),
                capacity: self.cap,
            });
        }
        let msg_id = msg.msg_id;
        trace!(recipient = %target, %msg_id, epoch, next = route_to_next, "enqueued");
        queue.push_back(msg);
        Ok(RouteReceipt {
            msg_id,
            epoch: Epoch::new(epoch),
        })
    }

    // -------- Switch control, called by the SwitchEngine --------

    /// PREPARE: new ingress targets next-epoch queues stamped `epoch + 1`.
    pub(crate) async fn start_switch(&self) {
        let mut state = self.state.lock().await;
        state.route_to_next = true;
    }

    /// COMMIT: bump the epoch, swap the buckets, and publish the new
    /// (topology, epoch) pair, all atomically. No next-epoch message is
    /// observable before this returns, and no `route` call can validate
    /// against one topology while stamping the other's epoch.
    pub(crate) async fn commit_switch(&self, topology: Topology) {
        let mut state = self.state.lock().await;
        state.active_epoch += 1;
        let fresh = RoutingState::empty_buckets(&self.recipients, self.cap);
        state.active = std::mem::replace(&mut state.next, fresh);
        state.route_to_next = false;
        self.epoch_mirror.store(state.active_epoch, Ordering::Release);
        self.topology.store(topology, Epoch::new(state.active_epoch));
        drop(state);
        for notify in self.wakeups.values() {
            notify.notify_one();
        }
    }

    /// ABORT: append each next-epoch queue behind the recipient's active
    /// tail in FIFO order, dropping overflow as `queue_full`. Returns drop
    /// counts by reason.
    pub(crate) async fn abort_switch(&self) -> BTreeMap<DropReason, u64> {
        let mut dropped: BTreeMap<DropReason, u64> = BTreeMap::new();
        {
            let mut state = self.state.lock().await;
            for recipient in &self.recipients {
                let mut salvage = state
                    .next
                    .get_mut(recipient)
                    .map(std::mem::take)
                    .unwrap_or_default();
                let active = state
                    .active
                    .get_mut(recipient)
                    .expect("every known recipient has an active queue");
                for mut msg in salvage.drain(..) {
                    if active.len() >= self.cap {
                        msg.drop_reason = Some(DropReason::QueueFull);
                        self.count_drop(DropReason::QueueFull);
                        *dropped.entry(DropReason::QueueFull).or_default() += 1;
                        continue;
                    }
                    active.push_back(msg);
                }
            }
            state.route_to_next = false;
        }
        for notify in self.wakeups.values() {
            notify.notify_one();
        }
        dropped
    }

    // -------- Introspection --------

    /// True while any active-epoch queue holds messages.
    pub(crate) async fn active_has_pending(&self) -> bool {
        let state = self.state.lock().await;
        state.active.values().any(|q| !q.is_empty())
    }

    /// Active-epoch queue depths per recipient.
    pub async fn active_counts(&self) -> BTreeMap<AgentId, usize> {
        let state = self.state.lock().await;
        state.active.iter().map(|(k, q)| (k.clone(), q.len())).collect()
    }

    /// Next-epoch queue depths per recipient.
    pub async fn next_counts(&self) -> BTreeMap<AgentId, usize> {
        let state = self.state.lock().await;
        state.next.iter().map(|(k, q)| (k.clone(), q.len())).collect()
    }

    /// Cumulative drop counts by reason since construction.
    #[must_use]
    pub fn drop_counts(&self) -> BTreeMap<DropReason, u64> {
        self.drops
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    fn count_drop(&self, reason: DropReason) {
        *self.drops.entry(reason).or_insert(0) += 1;
    }

    fn wake(&self, agent: &AgentId) {
        if let Some(notify) = self.wakeups.get(agent) {
            notify.notify_one();
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("recipients", &self.recipients)
            .field("cap", &self.cap)
            .field("ttl", &self.ttl)
            .field("active_epoch", &self.active_epoch())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::EpisodeId;
    use crate::messaging::domain_types::Payload;
    use serde_json::json;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn payload(i: i64) -> Payload {
        let mut p = Payload::new();
        p.insert("i".into(), json!(i));
        p
    }

    fn msg(from: &str, to: &str, i: i64) -> Message {
        Message::new(
            EpisodeId::try_new("ep".to_string()).unwrap(),
            agent(from),
            Recipient::agent(agent(to)),
            payload(i),
        )
        .unwrap()
    }

    fn flat_router() -> Router {
        let cell = Arc::new(TopologyCell::new(crate::messaging::domain_types::Topology::Flat));
        Router::new(
            [agent("planner"), agent("coder"), agent("runner")],
            &RuntimeConfig::testing(),
            cell,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn per_pair_fifo_within_epoch() {
        let router = flat_router();
        for i in 0..5 {
            router.route(msg("coder", "planner", i)).await.unwrap();
        }
        for i in 0..5 {
            let m = router.dequeue(&agent("planner")).await.unwrap().unwrap();
            assert_eq!(m.payload["i"], json!(i));
            assert_eq!(m.topo_epoch, Epoch::new(0));
        }
        assert!(router.dequeue(&agent("planner")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_recipient_is_rejected() {
        let router = flat_router();
        let err = router.route(msg("coder", "ghost", 0)).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidRecipient { .. }));
        assert!(router.dequeue(&agent("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn queue_full_surfaces_at_ingress() {
        let cell = Arc::new(TopologyCell::new(crate::messaging::domain_types::Topology::Flat));
        let mut cfg = RuntimeConfig::testing();
        cfg.queue_cap_per_agent = crate::domain_types::QueueCapacity::try_new(2).unwrap();
        let router = Router::new([agent("planner"), agent("coder")], &cfg, cell).unwrap();

        router.route(msg("coder", "planner", 0)).await.unwrap();
        router.route(msg("coder", "planner", 1)).await.unwrap();
        let err = router.route(msg("coder", "planner", 2)).await.unwrap_err();
        assert!(matches!(err, RouterError::QueueFull { .. }));
        assert_eq!(router.drop_counts()[&DropReason::QueueFull], 1);
    }

    #[tokio::test]
    async fn expired_messages_are_dropped_silently_at_dequeue() {
        let router = flat_router();
        let mut stale = msg("coder", "planner", 0);
        stale.expires = Some(Instant::now());
        router.route(stale).await.unwrap();
        router.route(msg("coder", "planner", 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let m = router.dequeue(&agent("planner")).await.unwrap().unwrap();
        assert_eq!(m.payload["i"], json!(1));
        assert_eq!(router.drop_counts()[&DropReason::Expired], 1);
    }

    #[tokio::test]
    async fn retry_appends_to_tail_and_caps_attempts() {
        let router = flat_router();
        router.route(msg("coder", "planner", 0)).await.unwrap();
        let delivered = router.dequeue(&agent("planner")).await.unwrap().unwrap();
        router.route(msg("coder", "planner", 1)).await.unwrap();

        router.retry(delivered).await.unwrap();
        let first = router.dequeue(&agent("planner")).await.unwrap().unwrap();
        assert_eq!(first.payload["i"], json!(1));
        let second = router.dequeue(&agent("planner")).await.unwrap().unwrap();
        assert_eq!(second.payload["i"], json!(0));
        assert!(second.redelivered);
        assert_eq!(second.attempt, 1);

        let mut exhausted = second;
        exhausted.attempt = RuntimeConfig::testing().max_attempts.as_u32();
        let err = router.retry(exhausted).await.unwrap_err();
        assert!(matches!(err, RouterError::MaxAttempts { .. }));
    }

    #[tokio::test]
    async fn epoch_is_router_authoritative() {
        let router = flat_router();
        let mut forged = msg("coder", "planner", 0);
        forged.topo_epoch = Epoch::new(999);
        router.route(forged).await.unwrap();
        let m = router.dequeue(&agent("planner")).await.unwrap().unwrap();
        assert_eq!(m.topo_epoch, Epoch::new(0));
    }

    #[tokio::test]
    async fn broadcast_mints_fresh_ids_per_target() {
        let router = flat_router();
        let broadcast = Message::new(
            EpisodeId::try_new("ep".to_string()).unwrap(),
            agent("planner"),
            Recipient::Broadcast,
            payload(7),
        )
        .unwrap();
        let original_id = broadcast.msg_id;

        let outcome = router.route(broadcast).await.unwrap();
        let RouteOutcome::Broadcast(deliveries) = outcome else {
            panic!("expected broadcast outcome");
        };
        assert_eq!(deliveries.len(), 2);
        let mut ids = Vec::new();
        for delivery in &deliveries {
            let receipt = delivery.outcome.as_ref().unwrap();
            assert_ne!(receipt.msg_id, original_id);
            ids.push(receipt.msg_id);
        }
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn bounded_wait_dequeue_times_out() {
        let router = flat_router();
        let got = router
            .dequeue_timeout(&agent("planner"), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn bounded_wait_dequeue_wakes_on_enqueue() {
        let router = Arc::new(flat_router());
        let waiter = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .dequeue_timeout(&agent("planner"), Duration::from_millis(500))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        router.route(msg("coder", "planner", 3)).await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.payload["i"], json!(3));
    }
}
