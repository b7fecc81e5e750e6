//! Returning-entity detection
//!
//! An entity in today's batch is "returning" when the store holds at least
//! one matching row dated before `today - days_back`. One store query per
//! entity; batches are tens of names, not thousands.

use crate::errors::{ContextError, Result};
use crate::retriever::ContextResult;
use crate::store::{EntityMatcher, PopularityMetric, ReviewStore};
use chrono::{Days, NaiveDate};

/// Options for [`find_returning`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecurrenceOptions {
    pub matcher: EntityMatcher,
    pub metric: PopularityMetric,
    /// Also require no matching row in `[cutoff, today)`
    pub require_gap: bool,
}

/// First day that no longer counts as "before"
///
/// Fails with a config error when the window reaches past the earliest
/// representable date.
pub fn cutoff_date(today: NaiveDate, days_back: u32) -> Result<NaiveDate> {
    today
        .checked_sub_days(Days::new(u64::from(days_back)))
        .ok_or_else(|| {
            ContextError::config(format!(
                "recurrence window of {days_back} days before {today} is out of range"
            ))
        })
}

/// Entities from `current` that were seen before the cutoff
///
/// Output follows input order; duplicate names are reported once. The
/// caller guarantees each entity also appears today.
pub fn find_returning<S: AsRef<str>>(
    store: &ReviewStore,
    current: &[S],
    days_back: u32,
    today: NaiveDate,
    options: RecurrenceOptions,
) -> Result<Vec<ContextResult>> {
    let cutoff = cutoff_date(today, days_back)?;
    let mut seen = std::collections::HashSet::new();
    let mut returning = Vec::new();

    for name in current.iter().map(AsRef::as_ref) {
        let name = name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }

        let Some(aggregate) =
            store.aggregate_by_entity(options.matcher, name, Some(cutoff), options.metric)?
        else {
            continue;
        };

        if options.require_gap
            && store.has_observation_between(options.matcher, name, cutoff, today)?
        {
            tracing::debug!(name, %cutoff, "Seen since cutoff; not a return");
            continue;
        }

        returning.push(ContextResult::from_aggregate(aggregate, 0.0));
    }

    tracing::info!(
        checked = seen.len(),
        returning = returning.len(),
        %cutoff,
        "Returning entity scan complete"
    );
    Ok(returning)
}
