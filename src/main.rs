//! `apex` binary: runs one scripted episode over the message plane.
//!
//! Wires the router, switch engine, coordinator, and controller, pumps the
//! scripted role agents for a fixed number of steps, and flushes the
//! decision and reward logs as JSON Lines.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apex::agents::{Agent, scripted_team};
use apex::config::RuntimeConfig;
use apex::controller::{Controller, Phase, StepState};
use apex::domain_types::{AgentId, EpisodeId};
use apex::messaging::{Message, MessagePlane, Payload, Recipient, Topology, roles};

/// Tokens charged per handled message by the scripted episode.
const TOKENS_PER_MESSAGE: u64 = 40;

/// Messages an agent may drain per step, so one chatty peer cannot starve
/// the rest of the pump.
const DRAIN_PER_STEP: usize = 4;

#[derive(Debug, Parser)]
#[command(name = "apex", about = "Run a scripted episode over the APEX message plane")]
struct Args {
    /// Number of controller steps to run.
    #[arg(long, default_value_t = 24)]
    steps: u64,

    /// Seed for the bandit's private RNG.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Initial topology (star, chain, flat).
    #[arg(long, default_value = "star")]
    topology: Topology,

    /// Run the four-role team without a summarizer.
    #[arg(long)]
    no_summarizer: bool,

    /// Decision log path (JSON Lines).
    #[arg(long, default_value = "logs/decisions.jsonl")]
    decisions_log: PathBuf,

    /// Reward log path (JSON Lines).
    #[arg(long, default_value = "logs/rewards.jsonl")]
    rewards_log: PathBuf,
}

fn phase_for_kind(kind: &str) -> Option<Phase> {
    match kind {
        "task" | "plan" => Some(Phase::Planning),
        "code" | "run" => Some(Phase::Coding),
        "test_report" => Some(Phase::Testing),
        "critique" | "review" => Some(Phase::Critique),
        "summary" => Some(Phase::Done),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RuntimeConfig::builder()
        .bandit_seed(args.seed)
        .build()
        .context("invalid runtime configuration")?;

    let include_summarizer = !args.no_summarizer;
    let mut team_ids = vec![roles::PLANNER, roles::CODER, roles::RUNNER, roles::CRITIC];
    if include_summarizer {
        team_ids.push(roles::SUMMARIZER);
    }
    let recipients = team_ids
        .iter()
        .map(|r| AgentId::try_new((*r).to_string()))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid role name")?;

    let plane = MessagePlane::new(recipients, args.topology, &config)
        .context("failed to wire the message plane")?;
    let mut controller = Controller::new(
        plane.switch.clone(),
        plane.coordinator.clone(),
        &config,
    );

    let episode = EpisodeId::generate();
    let mut agents = scripted_team(&episode, &plane.switch, include_summarizer);
    info!(%episode, topology = %args.topology, steps = args.steps, "starting scripted episode");

    // Kickoff: the system sentinel hands the planner a task.
    let mut kickoff_payload = Payload::new();
    kickoff_payload.insert("kind".into(), serde_json::json!("task"));
    kickoff_payload.insert("task".into(), serde_json::json!("make the test suite pass"));
    let kickoff = Message::new(
        episode.clone(),
        AgentId::try_new(roles::SYSTEM.to_string()).context("invalid sentinel id")?,
        Recipient::Agent(AgentId::try_new(roles::PLANNER.to_string())?),
        kickoff_payload,
    )
    .context("failed to build kickoff message")?;
    plane.router.route(kickoff).await.context("kickoff route failed")?;

    let budget = config.episode_token_budget.as_u64();
    let mut tokens_used: u64 = 0;
    let mut pass_rate: f64 = 0.0;
    let mut phase = Some(Phase::Planning);
    let mut prev_state = StepState {
        phase,
        test_pass_rate: pass_rate,
        tokens_used,
        switch_committed: false,
    };

    for _ in 0..args.steps {
        for agent in &mut agents {
            let id = agent.id().clone();
            for _ in 0..DRAIN_PER_STEP {
                let Some(msg) = plane.router.dequeue(&id).await? else {
                    break;
                };
                controller.observe_message(&msg.sender);
                tokens_used += TOKENS_PER_MESSAGE;
                let outputs = agent.handle(msg).await?;
                for out in &outputs {
                    if let Some(kind) = out.payload.get("kind").and_then(|v| v.as_str()) {
                        if let Some(next) = phase_for_kind(kind) {
                            phase = Some(phase.map_or(next, |current| current.max(next)));
                        }
                        if kind == "test_report" {
                            if let Some(rate) =
                                out.payload.get("pass_rate").and_then(serde_json::Value::as_f64)
                            {
                                pass_rate = rate;
                            }
                        }
                    }
                }
                let senders: Vec<_> = outputs.iter().map(|out| out.sender.clone()).collect();
                let results = futures::future::join_all(
                    outputs.into_iter().map(|out| plane.router.route(out)),
                )
                .await;
                for (sender, result) in senders.iter().zip(results) {
                    if let Err(error) = result {
                        warn!(%sender, %error, "route rejected an agent message");
                    }
                }
            }
        }

        controller.set_budget(tokens_used, budget);
        let record = controller.tick().await;

        let curr_state = StepState {
            phase,
            test_pass_rate: pass_rate,
            tokens_used,
            switch_committed: record.switch.committed,
        };
        controller.update_reward(&prev_state, &curr_state);
        prev_state = curr_state;
    }

    let success = pass_rate >= 1.0;
    let bonus = controller.final_bonus(success);
    controller
        .flush_jsonl(&args.decisions_log, Some(&args.rewards_log))
        .context("failed to flush JSONL logs")?;

    let stats = controller.stats();
    info!(
        success,
        bonus,
        pass_rate,
        tokens_used,
        decisions = stats.decisions,
        switches = plane.coordinator.stats().history.len(),
        drops = ?plane.router.drop_counts(),
        "episode finished"
    );
    println!(
        "{}",
        serde_json::json!({
            "episode": episode.to_string(),
            "success": success,
            "terminal_bonus": bonus,
            "pass_rate": pass_rate,
            "tokens_used": tokens_used,
            "steps": stats.steps,
            "bandit": stats.bandit,
            "topology": plane.switch.active().0.to_string(),
        })
    );
    Ok(())
}
