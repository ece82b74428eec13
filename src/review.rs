//! Per-card review update (SM-2 with a two-outcome input).

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::config::{ReviewPolicy, MAX_EASE, MIN_EASE};
use crate::error::{PlanError, Result};
use crate::models::{ReviewOutcome, ReviewRecord};

const CORRECT_QUALITY: i32 = 4;
const INCORRECT_QUALITY: i32 = 2;

/// Apply one review outcome to a record.
///
/// Returns the updated record; the input is never modified, so a failed
/// call has no observable effect.
pub fn record_review(
    record: &ReviewRecord,
    outcome: ReviewOutcome,
    latency: Option<std::time::Duration>,
    now: DateTime<Utc>,
    policy: &ReviewPolicy,
) -> Result<ReviewRecord> {
    if let Err(reason) = check_record(record, policy) {
        warn!(card_id = record.card_id, %reason, "refusing review of corrupted record");
        return Err(PlanError::InvalidState {
            card_id: record.card_id,
            reason,
        });
    }

    let q = quality(outcome, latency, policy);
    let ease = next_ease(record.ease_factor, q);

    let (interval, repetitions) = match outcome {
        ReviewOutcome::Incorrect => (1, 0),
        ReviewOutcome::Correct => {
            let reps = record.repetitions + 1;
            let interval = match reps {
                1 => 1,
                2 => 6,
                _ => {
                    let grown = (f64::from(record.interval_days) * ease).round();
                    grown.clamp(1.0, f64::from(policy.max_interval_days)) as u32
                }
            };
            (interval, reps)
        }
    };

    let mut history = record.history.clone();
    history.push_back(outcome);
    while history.len() > policy.history_cap {
        history.pop_front();
    }

    Ok(ReviewRecord {
        card_id: record.card_id,
        ease_factor: ease,
        interval_days: interval,
        repetitions,
        review_count: record.review_count + 1,
        last_reviewed: Some(now),
        due: now + Duration::days(i64::from(interval)),
        history,
    })
}

/// Coarse SM-2 quality for a binary outcome, nudged by answer latency.
/// Correct answers stay within 3..=5 and incorrect ones within 0..=2.
pub fn quality(
    outcome: ReviewOutcome,
    latency: Option<std::time::Duration>,
    policy: &ReviewPolicy,
) -> i32 {
    let nudge = match latency {
        Some(l) if l.as_millis() < u128::from(policy.fast_latency_ms) => 1,
        Some(l) if l.as_millis() > u128::from(policy.slow_latency_ms) => -1,
        _ => 0,
    };

    match outcome {
        ReviewOutcome::Correct => (CORRECT_QUALITY + nudge).clamp(3, 5),
        ReviewOutcome::Incorrect => (INCORRECT_QUALITY + nudge).clamp(0, 2),
    }
}

pub fn next_ease(ease: f64, q: i32) -> f64 {
    let miss = f64::from(5 - q);
    (ease + (0.1 - miss * (0.08 + miss * 0.02))).clamp(MIN_EASE, MAX_EASE)
}

fn check_record(record: &ReviewRecord, policy: &ReviewPolicy) -> std::result::Result<(), String> {
    if !record.ease_factor.is_finite()
        || record.ease_factor < MIN_EASE
        || record.ease_factor > MAX_EASE
    {
        return Err(format!("ease factor {} out of range", record.ease_factor));
    }
    if record.interval_days > policy.max_interval_days {
        return Err(format!(
            "interval {} exceeds {} days",
            record.interval_days, policy.max_interval_days
        ));
    }
    if record.history.len() > policy.history_cap {
        return Err(format!(
            "history holds {} outcomes, cap is {}",
            record.history.len(),
            policy.history_cap
        ));
    }
    Ok(())
}
