use crate::domain::time_order::DueWindow;
use chrono::{DateTime, Duration, DurationRound, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpolationPolicy {
    /// Distance kept from the single neighbor when a task lands at either end of a group.
    pub fixed_offset: Duration,
    /// Smallest due-date step; midpoints are truncated to this resolution.
    pub minimum_increment: Duration,
    /// Minimum gap between consecutive due dates after renormalizing a group.
    pub renormalization_spacing: Duration,
}

impl Default for InterpolationPolicy {
    fn default() -> Self {
        Self {
            fixed_offset: Duration::hours(1),
            minimum_increment: Duration::seconds(1),
            renormalization_spacing: Duration::seconds(60),
        }
    }
}

impl InterpolationPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.fixed_offset <= Duration::zero() {
            return Err("reorder.fixed_offset must be > 0".to_string());
        }
        if self.minimum_increment <= Duration::zero() {
            return Err("reorder.minimum_increment must be > 0".to_string());
        }
        if self.fixed_offset < self.minimum_increment {
            return Err("reorder.fixed_offset must be >= reorder.minimum_increment".to_string());
        }
        if self.renormalization_spacing < self.minimum_increment * 2 {
            return Err(
                "reorder.renormalization_spacing must be >= 2 * reorder.minimum_increment"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no room between {before} and {after} at the minimum increment")]
pub struct DegenerateInterpolation {
    pub before: DateTime<Utc>,
    pub after: DateTime<Utc>,
}

/// Picks a due date that sorts strictly between the two neighbors.
///
/// A missing `after` places the task `fixed_offset` past `before`, a missing
/// `before` places it `fixed_offset` ahead of `after`, and no neighbors at all
/// fall back to `now`.
pub fn compute_new_due_date(
    before: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    policy: &InterpolationPolicy,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, DegenerateInterpolation> {
    compute_new_due_date_within(before, after, policy, now, DueWindow::UNBOUNDED)
}

/// Like [`compute_new_due_date`], but the result stays inside `window`: an
/// end position moves at most half way to the window edge, and an empty
/// group gets `now` only when `now` is inside the window, otherwise a date
/// just after the window start.
pub fn compute_new_due_date_within(
    before: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    policy: &InterpolationPolicy,
    now: DateTime<Utc>,
    window: DueWindow,
) -> Result<DateTime<Utc>, DegenerateInterpolation> {
    match (before, after) {
        (Some(before), None) => {
            let offset = window.end.map_or(policy.fixed_offset, |end| {
                policy.fixed_offset.min((end - before) / 2).max(Duration::zero())
            });
            step_away(before, offset, policy, window.end.unwrap_or(before))
        }
        (None, Some(after)) => {
            let offset = window.start.map_or(policy.fixed_offset, |start| {
                policy.fixed_offset.min((after - start) / 2).max(Duration::zero())
            });
            step_away(after, -offset, policy, window.start.unwrap_or(after))
        }
        (Some(before), Some(after)) => interpolate_between(before, after, policy),
        (None, None) if window.contains(now) => Ok(now),
        (None, None) => match (window.start, window.end) {
            (Some(start), end) => {
                let offset = end.map_or(policy.fixed_offset, |end| policy.fixed_offset.min((end - start) / 2));
                Ok(start + offset)
            }
            (None, Some(end)) => step_away(end, -policy.fixed_offset, policy, end),
            (None, None) => Ok(now),
        },
    }
}

/// `anchor + offset`, provided the step is at least one minimum increment.
fn step_away(
    anchor: DateTime<Utc>,
    offset: Duration,
    policy: &InterpolationPolicy,
    edge: DateTime<Utc>,
) -> Result<DateTime<Utc>, DegenerateInterpolation> {
    let degenerate = DegenerateInterpolation {
        before: anchor.min(edge),
        after: anchor.max(edge),
    };
    if offset.abs() < policy.minimum_increment {
        return Err(degenerate);
    }
    anchor.checked_add_signed(offset).ok_or(degenerate)
}

fn interpolate_between(
    before: DateTime<Utc>,
    after: DateTime<Utc>,
    policy: &InterpolationPolicy,
) -> Result<DateTime<Utc>, DegenerateInterpolation> {
    let degenerate = DegenerateInterpolation { before, after };
    if after <= before {
        return Err(degenerate);
    }

    let midpoint = before + (after - before) / 2;
    let candidate = midpoint
        .duration_trunc(policy.minimum_increment)
        .unwrap_or(midpoint);
    if before < candidate && candidate < after {
        return Ok(candidate);
    }

    let fallback = before
        .checked_add_signed(policy.minimum_increment)
        .ok_or(degenerate)?;
    if fallback >= after {
        return Err(degenerate);
    }
    Ok(fallback)
}

/// Re-spaces an ascending run of due dates, anchored at the first one, so that
/// consecutive dates are at least `renormalization_spacing` apart.
pub fn respace(dues: &[DateTime<Utc>], policy: &InterpolationPolicy) -> Vec<DateTime<Utc>> {
    let (Some(first), Some(last)) = (dues.first(), dues.last()) else {
        return Vec::new();
    };
    if dues.len() < 2 {
        return dues.to_vec();
    }

    let gaps = i32::try_from(dues.len() - 1).unwrap_or(i32::MAX);
    let span = (*last - *first).max(Duration::zero());
    let step = (span / gaps).max(policy.renormalization_spacing);

    (0..dues.len())
        .map(|index| *first + step * i32::try_from(index).unwrap_or(i32::MAX))
        .collect()
}
