use crate::env::MarketState;
use crate::policy::{LOG_PROB_FLOOR, SquashedAction};
use crate::types::AgentId;

/// One recorded step of one agent. Immutable once recorded; the next state
/// is implicit in trajectory order, with episode-boundary bootstraps held on
/// the owning `Trajectory`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: MarketState,
    pub action: SquashedAction,
    pub reward: f64,
    pub risk_cost: f64,
    pub done: bool,
    /// Log-prob under the behavior policy at collection time.
    pub log_prob: f64,
    /// Value-critic estimate at collection time.
    pub value: f64,
    /// Risk-critic estimate at collection time.
    pub risk_value: f64,
}

/// Ordered transitions for one agent across one collection pass, plus the
/// critic bootstraps for the final (possibly truncated) state.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub agent: AgentId,
    pub transitions: Vec<Transition>,
    pub bootstrap_value: f64,
    pub bootstrap_risk: f64,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Fixed-capacity on-policy store. Append-only during collection, then
/// drained exactly once per iteration; nothing survives across updates, so
/// stale off-policy data cannot leak into a later gradient step.
#[derive(Debug)]
pub struct RolloutBuffer {
    capacity: usize,
    trajectories: Vec<Trajectory>,
    len: usize,
}

impl RolloutBuffer {
    pub fn new(capacity: usize) -> Self {
        RolloutBuffer { capacity, trajectories: Vec::new(), len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a trajectory. Capacity and the log-prob floor are internal
    /// invariants: a violation is a collection bug, not a runtime condition.
    pub fn push(&mut self, trajectory: Trajectory) {
        assert!(
            self.len + trajectory.len() <= self.capacity,
            "rollout buffer overflow: {} + {} > {}",
            self.len,
            trajectory.len(),
            self.capacity
        );
        for t in &trajectory.transitions {
            assert!(
                t.log_prob.is_finite() && t.log_prob >= LOG_PROB_FLOOR,
                "recorded log-prob {} violates the floor",
                t.log_prob
            );
        }
        self.len += trajectory.len();
        self.trajectories.push(trajectory);
    }

    /// Hand the collected data to exactly one update and clear the buffer.
    pub fn drain(&mut self) -> Vec<Trajectory> {
        self.len = 0;
        std::mem::take(&mut self.trajectories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TreatyId;

    fn state() -> MarketState {
        MarketState {
            treaty_id: TreatyId(0),
            peril: crate::treaty::Peril::Flood,
            exposure_z: 0.0,
            expected_loss_fraction: 0.05,
            loss_quantiles: [0.02, 0.1, 0.3],
            event_frequency: 0.5,
            last_winning_price: 0.05,
            remaining_capacity: 1.0,
            step_fraction: 0.0,
        }
    }

    fn transition(log_prob: f64) -> Transition {
        Transition {
            state: state(),
            action: SquashedAction([0.0; 4]),
            reward: 0.1,
            risk_cost: 0.0,
            done: false,
            log_prob,
            value: 0.0,
            risk_value: 0.0,
        }
    }

    fn trajectory(n: usize) -> Trajectory {
        Trajectory {
            agent: AgentId(0),
            transitions: (0..n).map(|_| transition(-1.0)).collect(),
            bootstrap_value: 0.0,
            bootstrap_risk: 0.0,
        }
    }

    #[test]
    fn push_accumulates_and_drain_clears() {
        let mut buf = RolloutBuffer::new(10);
        buf.push(trajectory(4));
        buf.push(trajectory(6));
        assert_eq!(buf.len(), 10);

        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained.iter().map(Trajectory::len).sum::<usize>(), 10);
        assert!(buf.is_empty());
    }

    #[test]
    fn second_drain_is_empty() {
        let mut buf = RolloutBuffer::new(5);
        buf.push(trajectory(5));
        assert_eq!(buf.drain().len(), 1);
        assert!(buf.drain().is_empty(), "data must never be reused across updates");
    }

    #[test]
    #[should_panic(expected = "rollout buffer overflow")]
    fn overfilling_panics() {
        let mut buf = RolloutBuffer::new(5);
        buf.push(trajectory(6));
    }

    #[test]
    #[should_panic(expected = "violates the floor")]
    fn non_finite_log_prob_panics() {
        let mut buf = RolloutBuffer::new(5);
        let mut traj = trajectory(1);
        traj.transitions[0].log_prob = f64::NEG_INFINITY;
        buf.push(traj);
    }

    #[test]
    fn buffer_refills_after_drain() {
        let mut buf = RolloutBuffer::new(5);
        buf.push(trajectory(5));
        buf.drain();
        buf.push(trajectory(5));
        assert_eq!(buf.len(), 5);
    }
}
