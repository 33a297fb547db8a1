//! Derived aggregate fields
//!
//! Pure functions over the rating multiset. `next_status` is evaluated from
//! scratch after every rating-driven mutation; administrative overrides never
//! go through it.

use crate::db::schemas::IssueStatus;

/// Minimum verifications before an issue counts as verified
pub const VERIFIED_THRESHOLD: u32 = 5;

/// Minimum verifications before an issue can become critical
pub const CRITICAL_THRESHOLD: u32 = 10;

/// Minimum average severity for critical
pub const CRITICAL_SEVERITY: f64 = 4.0;

/// Round to two decimals, half away from zero
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Mean of the ratings rounded to two decimals, 0 for an empty multiset
pub fn average_severity<I>(ratings: I) -> f64
where
    I: IntoIterator<Item = u8>,
{
    let (sum, count) = ratings
        .into_iter()
        .fold((0u64, 0u64), |(s, c), r| (s + u64::from(r), c + 1));

    if count == 0 {
        0.0
    } else {
        round2(sum as f64 / count as f64)
    }
}

/// Status rule applied after rating-driven mutations
pub fn next_status(current: IssueStatus, average: f64, count: u32) -> IssueStatus {
    if current.is_terminal() {
        current
    } else if average >= CRITICAL_SEVERITY && count >= CRITICAL_THRESHOLD {
        IssueStatus::Critical
    } else if count >= VERIFIED_THRESHOLD {
        IssueStatus::Verified
    } else {
        IssueStatus::Pending
    }
}
