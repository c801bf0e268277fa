//! Agent routing

use super::state::SharedState;

/// Picks the next agent to run, or none to stop
pub trait Router: Send + Sync {
    /// Index into `agents` of the next agent, `None` to end the network
    fn route(&self, state: &SharedState, agents: &[&str]) -> Option<usize>;
}

/// Keeps running the first registered agent until a summary is recorded
pub struct SingleAgentRouter;

impl Router for SingleAgentRouter {
    fn route(&self, state: &SharedState, agents: &[&str]) -> Option<usize> {
        if state.is_complete() || agents.is_empty() {
            return None;
        }
        Some(0)
    }
}
