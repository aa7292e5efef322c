//! Billing period arithmetic.
//!
//! Periods are half-open `[start, end)` ranges. When the payment provider has supplied a period
//! that still covers "now", it is authoritative. Otherwise the period is derived from the
//! subscription's billing anchor by whole calendar months, always counting from the anchor so
//! that day clamping never accumulates (Jan 31 -> Feb 28 -> Mar 31, not Mar 28).

use chrono::{DateTime, Datelike, Months, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Where a resolved period came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSource {
    /// Dates stored from the payment provider
    Provider,
    /// Derived from the billing anchor because provider dates are absent or have lapsed
    Anchor,
}

/// Advance by whole calendar months, clamping to the last valid day of the target month.
pub fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The monthly period, counted from `anchor`, that contains `now`.
///
/// Instants before the anchor belong to the first period.
pub fn period_containing(anchor: DateTime<Utc>, now: DateTime<Utc>) -> BillingPeriod {
    if now < anchor {
        return BillingPeriod {
            start: anchor,
            end: add_months(anchor, 1),
        };
    }

    let months_apart = (now.year() - anchor.year()) * 12 + now.month() as i32 - anchor.month() as i32;
    let mut k = months_apart.max(0) as u32;
    while k > 0 && add_months(anchor, k) > now {
        k -= 1;
    }
    while add_months(anchor, k + 1) <= now {
        k += 1;
    }

    BillingPeriod {
        start: add_months(anchor, k),
        end: add_months(anchor, k + 1),
    }
}

/// Resolve the current billing period.
///
/// Provider dates win while they cover `now`; a missed provider sync falls back to the anchor.
pub fn resolve_period(
    provider_start: Option<DateTime<Utc>>,
    provider_end: Option<DateTime<Utc>>,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (BillingPeriod, PeriodSource) {
    if let (Some(start), Some(end)) = (provider_start, provider_end) {
        let period = BillingPeriod { start, end };
        if period.contains(now) {
            return (period, PeriodSource::Provider);
        }
    }
    (period_containing(anchor, now), PeriodSource::Anchor)
}

/// Whether the usage counter belongs to an earlier period than `current`.
///
/// Callers reset the counter and move `usage_period_start` to `current.start`, which makes the
/// reset happen once per rollover.
pub fn needs_reset(current: &BillingPeriod, usage_period_start: DateTime<Utc>) -> bool {
    current.start > usage_period_start
}
