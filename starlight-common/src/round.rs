use serde::{Deserialize, Serialize};

/// A channel round number. Strictly increasing per channel; every accepted
/// payment bumps it by one.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundNumber(pub u64);

impl RoundNumber {
    pub const FIRST: RoundNumber = RoundNumber(1);

    pub fn next(self) -> RoundNumber {
        RoundNumber(self.0 + 1)
    }
}

impl std::fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "round {}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn next_strictly_increases() {
        let r = RoundNumber::FIRST;
        assert!(r.next() > r);
    }
}
