use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};

/// 1 lumen == 10_000_000 stroops, matching how the source crates this
/// workspace is built from treat Bitcoin amounts as integer `Sat`/`msat`
/// newtypes rather than floats.
pub const STROOPS_PER_LUMEN: i64 = 10_000_000;

/// A native-asset (XLM) amount, denominated in stroops.
///
/// Channels on this agent only ever move the ledger's native asset (see the
/// Non-goals on multi-asset support), so there is exactly one amount type in
/// the whole data model.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Stroops(pub i64);

impl Stroops {
    pub const ZERO: Stroops = Stroops(0);

    pub fn from_lumens(lumens: i64) -> Self {
        Stroops(lumens.saturating_mul(STROOPS_PER_LUMEN))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Stroops) -> Option<Stroops> {
        self.0.checked_add(other.0).map(Stroops)
    }

    pub fn checked_sub(self, other: Stroops) -> Option<Stroops> {
        self.0.checked_sub(other.0).map(Stroops)
    }

    /// Subtract `other`, returning `None` if the result would be negative
    /// (used to reject a wallet/channel debit that would overdraw).
    pub fn checked_sub_nonnegative(self, other: Stroops) -> Option<Stroops> {
        self.checked_sub(other).filter(|r| r.0 >= 0)
    }
}

impl fmt::Display for Stroops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lumens = self.0 as f64 / STROOPS_PER_LUMEN as f64;
        write!(f, "{lumens:.7} XLM")
    }
}

impl fmt::Debug for Stroops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stroops({})", self.0)
    }
}

impl Add for Stroops {
    type Output = Stroops;
    fn add(self, rhs: Stroops) -> Stroops {
        Stroops(self.0 + rhs.0)
    }
}

impl AddAssign for Stroops {
    fn add_assign(&mut self, rhs: Stroops) {
        self.0 += rhs.0;
    }
}

impl Sub for Stroops {
    type Output = Stroops;
    fn sub(self, rhs: Stroops) -> Stroops {
        Stroops(self.0 - rhs.0)
    }
}

impl SubAssign for Stroops {
    fn sub_assign(&mut self, rhs: Stroops) {
        self.0 -= rhs.0;
    }
}

impl Sum for Stroops {
    fn sum<I: Iterator<Item = Stroops>>(iter: I) -> Self {
        iter.fold(Stroops::ZERO, Add::add)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lumens_convert_to_stroops() {
        assert_eq!(Stroops::from_lumens(100).0, 1_000_000_000);
    }

    #[test]
    fn checked_sub_nonnegative_rejects_negative_balance() {
        let balance = Stroops::from_lumens(5);
        let debit = Stroops::from_lumens(10);
        assert!(balance.checked_sub_nonnegative(debit).is_none());
    }

    #[test]
    fn display_formats_as_lumens() {
        assert_eq!(Stroops(10_000_000).to_string(), "1.0000000 XLM");
    }
}
