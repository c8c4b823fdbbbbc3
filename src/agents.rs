//! Role agents
//!
//! The [`Agent`] seam plus deterministic scripted implementations of the
//! five roles. Handlers return the messages they want sent; the episode
//! driver routes them, so an agent never self-delivers. Each scripted agent
//! reads the active topology to address its next hop: under star everything
//! flows through the planner hub, under chain each role forwards to its
//! next-hop peer, and under flat roles address each other directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain_types::{AgentId, EpisodeId};
use crate::messaging::domain_types::{Message, Payload, Recipient, Topology, roles};
use crate::messaging::errors::AgentError;
use crate::messaging::switch::SwitchEngine;

/// A message consumer/producer participating in an episode.
///
/// `handle` is pure given its inputs; returned messages are routed by the
/// caller, never self-delivered.
#[async_trait]
pub trait Agent: Send {
    /// This agent's identifier.
    fn id(&self) -> &AgentId;

    /// Processes one message and returns zero or more messages to send.
    async fn handle(&mut self, msg: Message) -> Result<Vec<Message>, AgentError>;
}

/// The five scripted roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedRole {
    Planner,
    Coder,
    Runner,
    Critic,
    Summarizer,
}

impl ScriptedRole {
    fn id(self) -> &'static str {
        match self {
            Self::Planner => roles::PLANNER,
            Self::Coder => roles::CODER,
            Self::Runner => roles::RUNNER,
            Self::Critic => roles::CRITIC,
            Self::Summarizer => roles::SUMMARIZER,
        }
    }
}

/// Deterministic scripted role agent.
///
/// Drives a plan -> code -> run -> review cycle with a test pass rate that
/// ramps up as runs accumulate, so episodes converge without an LLM in the
/// loop.
pub struct ScriptedAgent {
    role: ScriptedRole,
    id: AgentId,
    episode: EpisodeId,
    switch: Arc<SwitchEngine>,
    has_summarizer: bool,
    runs: u64,
}

impl ScriptedAgent {
    fn new(
        role: ScriptedRole,
        episode: EpisodeId,
        switch: Arc<SwitchEngine>,
        has_summarizer: bool,
    ) -> Self {
        let id = AgentId::try_new(role.id().to_string()).expect("role names are valid agent ids");
        Self {
            role,
            id,
            episode,
            switch,
            has_summarizer,
            runs: 0,
        }
    }

    fn send(&self, target: &'static str, payload: Payload) -> Result<Message, AgentError> {
        let recipient = Recipient::Agent(
            AgentId::try_new(target.to_string()).expect("role names are valid agent ids"),
        );
        Message::new(self.episode.clone(), self.id.clone(), recipient, payload).map_err(|source| {
            AgentError::Message {
                agent: self.id.clone(),
                source,
            }
        })
    }

    /// Next hop for this role's output under the active topology.
    fn next_hop(&self, natural: &'static str) -> &'static str {
        let (topology, _) = self.switch.active();
        match topology {
            // Everything flows through the hub, except the hub itself.
            Topology::Star if self.role != ScriptedRole::Planner => roles::PLANNER,
            _ => natural,
        }
    }

    fn handle_planner(&self, msg: &Message) -> Vec<(&'static str, Payload)> {
        let kind = msg.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        match kind {
            "task" => {
                let mut payload = Payload::new();
                payload.insert("kind".into(), json!("plan"));
                if let Some(task) = msg.payload.get("task") {
                    payload.insert("task".into(), task.clone());
                }
                vec![(roles::CODER, payload)]
            }
            // Hub relays under star: code moves on to the runner, reports to
            // the critic.
            "code" => {
                let mut payload = Payload::new();
                payload.insert("kind".into(), json!("run"));
                vec![(roles::RUNNER, payload)]
            }
            "test_report" => {
                let mut payload = Payload::new();
                payload.insert("kind".into(), json!("review"));
                if let Some(rate) = msg.payload.get("pass_rate") {
                    payload.insert("pass_rate".into(), rate.clone());
                }
                vec![(roles::CRITIC, payload)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_coder(&self, msg: &Message) -> Vec<(&'static str, Payload)> {
        let kind = msg.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        if kind != "plan" {
            return Vec::new();
        }
        let mut payload = Payload::new();
        payload.insert("kind".into(), json!("code"));
        payload.insert("patch".into(), json!("solution.rs"));
        vec![(self.next_hop(roles::RUNNER), payload)]
    }

    fn handle_runner(&mut self, msg: &Message) -> Vec<(&'static str, Payload)> {
        let kind = msg.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        if kind != "code" && kind != "run" {
            return Vec::new();
        }
        self.runs += 1;
        #[allow(clippy::cast_precision_loss)]
        let pass_rate = (0.25 * self.runs as f64).min(1.0);
        let mut payload = Payload::new();
        payload.insert("kind".into(), json!("test_report"));
        payload.insert("pass_rate".into(), json!(pass_rate));
        vec![(self.next_hop(roles::CRITIC), payload)]
    }

    fn handle_critic(&self, msg: &Message) -> Vec<(&'static str, Payload)> {
        let kind = msg.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        if kind != "test_report" && kind != "review" {
            return Vec::new();
        }
        let pass_rate = msg
            .payload
            .get("pass_rate")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let mut payload = Payload::new();
        payload.insert("kind".into(), json!("critique"));
        payload.insert("approved".into(), json!(pass_rate >= 1.0));
        let natural = if self.has_summarizer {
            roles::SUMMARIZER
        } else {
            roles::PLANNER
        };
        vec![(self.next_hop(natural), payload)]
    }

    fn handle_summarizer(&self, msg: &Message) -> Vec<(&'static str, Payload)> {
        let kind = msg.payload.get("kind").and_then(|v| v.as_str()).unwrap_or("");
        if kind != "critique" {
            return Vec::new();
        }
        let mut payload = Payload::new();
        payload.insert("kind".into(), json!("summary"));
        if let Some(approved) = msg.payload.get("approved") {
            payload.insert("approved".into(), approved.clone());
        }
        vec![(self.next_hop(roles::PLANNER), payload)]
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn handle(&mut self, msg: Message) -> Result<Vec<Message>, AgentError> {
        let outputs = match self.role {
            ScriptedRole::Planner => self.handle_planner(&msg),
            ScriptedRole::Coder => self.handle_coder(&msg),
            ScriptedRole::Runner => self.handle_runner(&msg),
            ScriptedRole::Critic => self.handle_critic(&msg),
            ScriptedRole::Summarizer => self.handle_summarizer(&msg),
        };
        outputs
            .into_iter()
            .map(|(target, payload)| self.send(target, payload))
            .collect()
    }
}

/// Builds the scripted team, optionally including the summarizer.
#[must_use]
pub fn scripted_team(
    episode: &EpisodeId,
    switch: &Arc<SwitchEngine>,
    include_summarizer: bool,
) -> Vec<ScriptedAgent> {
    let mut team: Vec<ScriptedAgent> = [
        ScriptedRole::Planner,
        ScriptedRole::Coder,
        ScriptedRole::Runner,
        ScriptedRole::Critic,
    ]
    .into_iter()
    .map(|role| {
        ScriptedAgent::new(
            role,
            episode.clone(),
            Arc::clone(switch),
            include_summarizer,
        )
    })
    .collect();
    if include_summarizer {
        team.push(ScriptedAgent::new(
            ScriptedRole::Summarizer,
            episode.clone(),
            Arc::clone(switch),
            include_summarizer,
        ));
    }
    team
}
