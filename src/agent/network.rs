//! Bounded agent loop
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ▼                              │
//!   RUNNING(iteration) ── summary set ──────┼──► DONE(Completed)
//!            │                              │
//!            ├── iteration >= max ──────────┼──► DONE(Inconclusive)
//!            │                              │
//!            ├── router → none ─────────────┼──► DONE(Inconclusive)
//!            │                              │
//!            └── router → agent i ── run ───┘  (iteration += 1)
//! ```

use tracing::{info, warn};

use super::checkpoint::StepRunner;
use super::controller::AgentError;
use super::router::Router;
use super::state::SharedState;
use super::step::AgentStep;
use crate::llm::ChatMessage;

/// Hard ceiling on agent steps per run
pub const MAX_ITERATIONS: usize = 15;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A summary was recorded
    Completed,
    /// Ceiling reached (or nothing left to route to) without a summary
    Inconclusive,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Completed => "completed",
            Termination::Inconclusive => "inconclusive",
        }
    }
}

/// Next move of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Invoke(usize),
    Done(Termination),
}

/// Decide the next move from the current state alone
pub fn next_transition(
    router: &dyn Router,
    state: &SharedState,
    iteration: usize,
    max_iterations: usize,
    agents: &[&str],
) -> Transition {
    if state.is_complete() {
        return Transition::Done(Termination::Completed);
    }
    if iteration >= max_iterations {
        return Transition::Done(Termination::Inconclusive);
    }
    match router.route(state, agents) {
        Some(index) if index < agents.len() => Transition::Invoke(index),
        _ => Transition::Done(Termination::Inconclusive),
    }
}

/// Final state of the loop
#[derive(Debug, Clone)]
pub struct NetworkResult {
    pub state: SharedState,
    pub messages: Vec<ChatMessage>,
    pub iterations: usize,
    pub termination: Termination,
}

/// Runs registered agents until the router stops or the ceiling is hit
pub struct NetworkController {
    agents: Vec<AgentStep>,
    router: Box<dyn Router>,
    max_iterations: usize,
}

impl NetworkController {
    pub fn new(agents: Vec<AgentStep>, router: Box<dyn Router>) -> Self {
        Self {
            agents,
            router,
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Lower the iteration ceiling (never above [`MAX_ITERATIONS`])
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.min(MAX_ITERATIONS);
        self
    }

    /// Drive the loop from `state` and the seeded `messages`
    pub async fn run(
        &self,
        mut state: SharedState,
        mut messages: Vec<ChatMessage>,
        sandbox_id: &str,
        steps: &StepRunner,
    ) -> Result<NetworkResult, AgentError> {
        let names: Vec<&str> = self.agents.iter().map(AgentStep::name).collect();
        let mut iteration = 0;

        let termination = loop {
            match next_transition(self.router.as_ref(), &state, iteration, self.max_iterations, &names) {
                Transition::Done(termination) => break termination,
                Transition::Invoke(index) => {
                    let agent = &self.agents[index];
                    let report = agent.run(&mut messages, &mut state, sandbox_id, steps).await?;
                    iteration += 1;
                    info!(
                        agent = agent.name(),
                        iteration,
                        tool_calls = report.tool_calls,
                        completed = report.completed,
                        "Agent step finished"
                    );
                }
            }
        };

        if termination == Termination::Inconclusive {
            warn!(iterations = iteration, "Agent loop ended without a summary");
        }

        Ok(NetworkResult {
            state,
            messages,
            iterations: iteration,
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::router::SingleAgentRouter;

    const AGENTS: &[&str] = &["code-agent"];

    #[test]
    fn test_invokes_while_incomplete() {
        let state = SharedState::new();
        assert_eq!(
            next_transition(&SingleAgentRouter, &state, 0, MAX_ITERATIONS, AGENTS),
            Transition::Invoke(0)
        );
        assert_eq!(
            next_transition(&SingleAgentRouter, &state, 14, MAX_ITERATIONS, AGENTS),
            Transition::Invoke(0)
        );
    }

    #[test]
    fn test_ceiling_is_inconclusive() {
        let state = SharedState::new();
        assert_eq!(
            next_transition(&SingleAgentRouter, &state, MAX_ITERATIONS, MAX_ITERATIONS, AGENTS),
            Transition::Done(Termination::Inconclusive)
        );
    }

    #[test]
    fn test_summary_wins_over_ceiling() {
        let mut state = SharedState::new();
        state.set_summary_once("<task_summary>done</task_summary>");
        assert_eq!(
            next_transition(&SingleAgentRouter, &state, MAX_ITERATIONS, MAX_ITERATIONS, AGENTS),
            Transition::Done(Termination::Completed)
        );
    }

    #[test]
    fn test_out_of_range_route_stops() {
        struct Wayward;
        impl Router for Wayward {
            fn route(&self, _state: &SharedState, _agents: &[&str]) -> Option<usize> {
                Some(7)
            }
        }
        assert_eq!(
            next_transition(&Wayward, &SharedState::new(), 0, MAX_ITERATIONS, AGENTS),
            Transition::Done(Termination::Inconclusive)
        );
    }
}
