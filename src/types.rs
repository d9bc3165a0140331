use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreatyId(pub u64);

/// One training iteration = one collect → estimate → primal → dual cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Iteration(pub u64);

impl Iteration {
    pub fn next(self) -> Self {
        Iteration(self.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_next_increments() {
        assert_eq!(Iteration(0).next(), Iteration(1));
        assert_eq!(Iteration(41).next(), Iteration(42));
    }

    #[test]
    fn ids_serialize_as_bare_integers() {
        assert_eq!(serde_json::to_string(&AgentId(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&TreatyId(17)).unwrap(), "17");
    }
}
