//! Topology semantics over the wired message plane
//!
//! Star rejects peer-to-peer, chain accepts exactly next hops, flat caps
//! broadcast fanout, and per-target broadcast outcomes never abort the
//! batch.

use apex::config::RuntimeConfig;
use apex::domain_types::{AgentId, EpisodeId};
use apex::messaging::{
    Message, MessagePlane, Payload, Recipient, RouteOutcome, RouterError, Topology,
};
use serde_json::json;

fn agent(name: &str) -> AgentId {
    AgentId::try_new(name.to_string()).unwrap()
}

fn team(names: &[&str]) -> Vec<AgentId> {
    names.iter().map(|n| agent(n)).collect()
}

fn msg(from: &str, to: &str) -> Message {
    let mut payload = Payload::new();
    payload.insert("kind".into(), json!("probe"));
    Message::new(
        EpisodeId::try_new("ep".to_string()).unwrap(),
        agent(from),
        Recipient::agent(agent(to)),
        payload,
    )
    .unwrap()
}

fn broadcast(from: &str) -> Message {
    Message::new(
        EpisodeId::try_new("ep".to_string()).unwrap(),
        agent(from),
        Recipient::Broadcast,
        Payload::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn star_rejects_peer_to_peer_and_leaves_queues_untouched() {
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner"]),
        Topology::Star,
        &RuntimeConfig::testing(),
    )
    .unwrap();

    let err = plane.router.route(msg("coder", "runner")).await.unwrap_err();
    assert!(matches!(err, RouterError::TopologyViolation(_)));
    assert!(plane.router.active_counts().await.values().all(|&n| n == 0));

    plane.router.route(msg("coder", "planner")).await.unwrap();
    let delivered = plane.router.dequeue(&agent("planner")).await.unwrap();
    assert!(delivered.is_some());
    assert!(plane.router.dequeue(&agent("planner")).await.unwrap().is_none());
}

#[tokio::test]
async fn chain_accepts_next_hops_only() {
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner", "critic"]),
        Topology::Chain,
        &RuntimeConfig::testing(),
    )
    .unwrap();

    for (from, to) in [("planner", "coder"), ("coder", "runner"), ("runner", "critic")] {
        plane
            .router
            .route(msg(from, to))
            .await
            .unwrap_or_else(|e| panic!("{from} -> {to} should route: {e}"));
    }
    for (from, to) in [("coder", "critic"), ("runner", "planner")] {
        let err = plane.router.route(msg(from, to)).await.unwrap_err();
        assert!(matches!(err, RouterError::TopologyViolation(_)), "{from} -> {to}");
    }
}

#[tokio::test]
async fn chain_without_summarizer_closes_cycle_at_critic() {
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner", "critic"]),
        Topology::Chain,
        &RuntimeConfig::testing(),
    )
    .unwrap();
    plane.router.route(msg("critic", "planner")).await.unwrap();
}

#[tokio::test]
async fn star_broadcast_is_hub_only() {
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner"]),
        Topology::Star,
        &RuntimeConfig::testing(),
    )
    .unwrap();

    let outcome = plane.router.route(broadcast("planner")).await.unwrap();
    let RouteOutcome::Broadcast(deliveries) = outcome else {
        panic!("expected broadcast outcome");
    };
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.outcome.is_ok()));

    let err = plane.router.route(broadcast("coder")).await.unwrap_err();
    assert!(matches!(err, RouterError::TopologyViolation(_)));
}

#[tokio::test]
async fn chain_broadcast_is_rejected() {
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner", "critic"]),
        Topology::Chain,
        &RuntimeConfig::testing(),
    )
    .unwrap();
    let err = plane.router.route(broadcast("planner")).await.unwrap_err();
    assert!(matches!(err, RouterError::TopologyViolation(_)));
}

#[tokio::test]
async fn flat_broadcast_respects_fanout_limit() {
    // Three recipients: two targets after excluding the sender, within the
    // default limit of 2.
    let small = MessagePlane::new(
        team(&["planner", "coder", "runner"]),
        Topology::Flat,
        &RuntimeConfig::testing(),
    )
    .unwrap();
    let outcome = small.router.route(broadcast("coder")).await.unwrap();
    assert_eq!(outcome.delivered(), 2);

    // Four recipients: three targets exceed the limit.
    let large = MessagePlane::new(
        team(&["planner", "coder", "runner", "critic"]),
        Topology::Flat,
        &RuntimeConfig::testing(),
    )
    .unwrap();
    let err = large.router.route(broadcast("coder")).await.unwrap_err();
    assert!(matches!(err, RouterError::TopologyViolation(_)));
}

#[tokio::test]
async fn system_sender_may_kick_off_any_topology() {
    for topology in [Topology::Star, Topology::Chain, Topology::Flat] {
        let plane = MessagePlane::new(
            team(&["planner", "coder", "runner"]),
            topology,
            &RuntimeConfig::testing(),
        )
        .unwrap();
        plane.router.route(msg("system", "coder")).await.unwrap();
    }
}

#[tokio::test]
async fn broadcast_reports_per_target_outcomes_without_aborting() {
    // Under flat, a broadcast from the planner to a team of three expands to
    // two targets; fill one target's queue so exactly one delivery fails.
    let mut config = RuntimeConfig::testing();
    config.queue_cap_per_agent = apex::domain_types::QueueCapacity::try_new(1).unwrap();
    let plane = MessagePlane::new(
        team(&["planner", "coder", "runner"]),
        Topology::Flat,
        &config,
    )
    .unwrap();

    plane.router.route(msg("planner", "coder")).await.unwrap();

    let outcome = plane.router.route(broadcast("planner")).await.unwrap();
    let RouteOutcome::Broadcast(deliveries) = outcome else {
        panic!("expected broadcast outcome");
    };
    let ok = deliveries.iter().filter(|d| d.outcome.is_ok()).count();
    let full = deliveries
        .iter()
        .filter(|d| matches!(d.outcome, Err(RouterError::QueueFull { .. })))
        .count();
    assert_eq!((ok, full), (1, 1));
}
