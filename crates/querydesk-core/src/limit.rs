//! Row-limit reconciliation
//!
//! A query can carry two limits: one embedded in its SQL text (as reported by
//! the dialect adapter) and one requested by the caller. The effective limit is
//! the smaller of the two, tagged with where it came from.

use crate::query::LimitingFactor;

/// Effective row limit plus its provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimit {
    pub limit: i64,
    pub factor: LimitingFactor,
}

/// Reconcile the SQL-embedded limit with the caller-requested one.
///
/// # Examples
///
/// ```
/// use querydesk_core::{resolve, LimitingFactor};
///
/// let resolved = resolve(Some(500), 1000);
/// assert_eq!(resolved.limit, 500);
/// assert_eq!(resolved.factor, LimitingFactor::Query);
/// ```
pub fn resolve(engine_limit: Option<i64>, requested_limit: i64) -> ResolvedLimit {
    match engine_limit {
        Some(engine) if engine < requested_limit => ResolvedLimit {
            limit: engine,
            factor: LimitingFactor::Query,
        },
        Some(engine) if engine == requested_limit => ResolvedLimit {
            limit: engine,
            factor: LimitingFactor::QueryAndDropdown,
        },
        _ => ResolvedLimit {
            limit: requested_limit,
            factor: LimitingFactor::Dropdown,
        },
    }
}
