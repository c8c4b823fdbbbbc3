//! Stateless topology validation
//!
//! Pure predicates over (sender, recipient) pairs and broadcast fanout.
//! The guard never touches queue state; the router consults it once per
//! ingress with the topology it captured for that call.

use crate::domain_types::{AgentId, FanoutLimit};
use crate::messaging::domain_types::{Topology, roles};
use crate::messaging::errors::TopologyViolation;

/// Chain cycle including the summarizer.
const CHAIN_WITH_SUMMARIZER: [&str; 6] = [
    roles::PLANNER,
    roles::CODER,
    roles::RUNNER,
    roles::CRITIC,
    roles::SUMMARIZER,
    roles::PLANNER,
];

/// Chain cycle without the summarizer. Both variants are accepted; nothing
/// assumes the summarizer is present.
const CHAIN_WITHOUT_SUMMARIZER: [&str; 5] = [
    roles::PLANNER,
    roles::CODER,
    roles::RUNNER,
    roles::CRITIC,
    roles::PLANNER,
];

/// Validates sender/recipient pairs and broadcast fanout per topology.
///
/// - **Star**: every pair must touch the hub (planner); only the hub may
///   broadcast.
/// - **Chain**: exactly the directed next-hop pairs of the pipeline cycle;
///   broadcast is rejected.
/// - **Flat**: any pair; broadcast fanout capped.
///
/// A `system` sender is exempt from pair rules (episode kickoff).
#[derive(Debug, Clone)]
pub struct TopologyGuard {
    fanout_limit: FanoutLimit,
}

impl Default for TopologyGuard {
    fn default() -> Self {
        Self {
            fanout_limit: FanoutLimit::default(),
        }
    }
}

impl TopologyGuard {
    /// Creates a guard with an explicit flat-topology fanout cap.
    #[must_use]
    pub fn new(fanout_limit: FanoutLimit) -> Self {
        Self { fanout_limit }
    }

    /// Checks whether `sender -> recipient` is legal under `topology`.
    ///
    /// # Errors
    /// Returns [`TopologyViolation`] naming the failed rule.
    pub fn validate_pair(
        &self,
        topology: Topology,
        sender: &AgentId,
        recipient: &AgentId,
    ) -> Result<(), TopologyViolation> {
        // System messages bypass pair rules so an episode can be kicked off.
        if sender.as_str() == roles::SYSTEM {
            return Ok(());
        }

        match topology {
            Topology::Star => Self::validate_star(sender, recipient),
            Topology::Chain => Self::validate_chain(sender, recipient),
            Topology::Flat => Ok(()),
        }
    }

    /// Checks whether `sender` may broadcast to `recipient_count` targets
    /// under `topology`.
    ///
    /// # Errors
    /// Returns [`TopologyViolation`] naming the failed rule.
    pub fn validate_broadcast(
        &self,
        topology: Topology,
        sender: &AgentId,
        recipient_count: usize,
    ) -> Result<(), TopologyViolation> {
        match topology {
            Topology::Star => {
                if sender.as_str() == roles::PLANNER {
                    Ok(())
                } else {
                    Err(TopologyViolation {
                        topology,
                        sender: sender.clone(),
                        recipient: "BROADCAST".to_string(),
                        rule: format!("only {} may broadcast under star", roles::PLANNER),
                    })
                }
            }
            Topology::Chain => Err(TopologyViolation {
                topology,
                sender: sender.clone(),
                recipient: "BROADCAST".to_string(),
                rule: "broadcast is not allowed under chain".to_string(),
            }),
            Topology::Flat => {
                if recipient_count <= self.fanout_limit.as_usize() {
                    Ok(())
                } else {
                    Err(TopologyViolation {
                        topology,
                        sender: sender.clone(),
                        recipient: "BROADCAST".to_string(),
                        rule: format!(
                            "fanout {recipient_count} exceeds limit {}",
                            self.fanout_limit
                        ),
                    })
                }
            }
        }
    }

    fn validate_star(sender: &AgentId, recipient: &AgentId) -> Result<(), TopologyViolation> {
        if sender.as_str() != roles::PLANNER && recipient.as_str() != roles::PLANNER {
            return Err(TopologyViolation {
                topology: Topology::Star,
                sender: sender.clone(),
                recipient: recipient.to_string(),
                rule: "peer-to-peer pairs must touch the hub".to_string(),
            });
        }
        Ok(())
    }

    fn validate_chain(sender: &AgentId, recipient: &AgentId) -> Result<(), TopologyViolation> {
        let pair = (sender.as_str(), recipient.as_str());
        let legal = Self::cycle_pairs(&CHAIN_WITH_SUMMARIZER)
            .chain(Self::cycle_pairs(&CHAIN_WITHOUT_SUMMARIZER))
            .any(|p| p == pair);
        if legal {
            Ok(())
        } else {
            Err(TopologyViolation {
                topology: Topology::Chain,
                sender: sender.clone(),
                recipient: recipient.to_string(),
                rule: "pair is not a next hop in the pipeline cycle".to_string(),
            })
        }
    }

    fn cycle_pairs(order: &'static [&'static str]) -> impl Iterator<Item = (&'static str, &'static str)> {
        order.windows(2).map(|w| (w[0], w[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn star_requires_hub_on_one_side() {
        let guard = TopologyGuard::default();
        assert!(
            guard
                .validate_pair(Topology::Star, &agent("planner"), &agent("runner"))
                .is_ok()
        );
        assert!(
            guard
                .validate_pair(Topology::Star, &agent("critic"), &agent("planner"))
                .is_ok()
        );
        let err = guard
            .validate_pair(Topology::Star, &agent("coder"), &agent("runner"))
            .unwrap_err();
        assert_eq!(err.topology, Topology::Star);
    }

    #[test]
    fn system_sender_is_exempt_everywhere() {
        let guard = TopologyGuard::default();
        for topo in [Topology::Star, Topology::Chain, Topology::Flat] {
            assert!(
                guard
                    .validate_pair(topo, &agent("system"), &agent("coder"))
                    .is_ok()
            );
        }
    }

    #[test]
    fn chain_accepts_exactly_next_hops() {
        let guard = TopologyGuard::default();
        for (s, r) in [
            ("planner", "coder"),
            ("coder", "runner"),
            ("runner", "critic"),
            ("critic", "summarizer"),
            ("summarizer", "planner"),
            // 4-node variant closes the cycle without a summarizer.
            ("critic", "planner"),
        ] {
            assert!(
                guard
                    .validate_pair(Topology::Chain, &agent(s), &agent(r))
                    .is_ok(),
                "{s} -> {r} should be legal"
            );
        }
        for (s, r) in [
            ("coder", "critic"),
            ("runner", "planner"),
            ("planner", "runner"),
            ("coder", "planner"),
        ] {
            assert!(
                guard
                    .validate_pair(Topology::Chain, &agent(s), &agent(r))
                    .is_err(),
                "{s} -> {r} should be rejected"
            );
        }
    }

    #[test]
    fn flat_allows_any_pair() {
        let guard = TopologyGuard::default();
        assert!(
            guard
                .validate_pair(Topology::Flat, &agent("coder"), &agent("critic"))
                .is_ok()
        );
    }

    #[test]
    fn broadcast_rules_per_topology() {
        let guard = TopologyGuard::default();
        assert!(
            guard
                .validate_broadcast(Topology::Star, &agent("planner"), 4)
                .is_ok()
        );
        assert!(
            guard
                .validate_broadcast(Topology::Star, &agent("coder"), 2)
                .is_err()
        );
        assert!(
            guard
                .validate_broadcast(Topology::Chain, &agent("planner"), 1)
                .is_err()
        );
        assert!(
            guard
                .validate_broadcast(Topology::Flat, &agent("coder"), 2)
                .is_ok()
        );
        assert!(
            guard
                .validate_broadcast(Topology::Flat, &agent("coder"), 3)
                .is_err()
        );
    }
}
