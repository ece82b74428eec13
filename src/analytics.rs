//! Read-side statistics over the review log and session history.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::MasteryThresholds;
use crate::mastery::{aggregate_mastery, classify};
use crate::models::{MasteryLevel, ReviewLogEntry, ReviewRecord, StudySession, Topic};

const WEEK_DAYS: i64 = 7;

/// Consecutive calendar days (UTC) with at least one review, counting back
/// from `today`. A day without reviews today means no streak.
pub fn current_streak(log: &[ReviewLogEntry], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = log.iter().map(|e| e.reviewed_at.date_naive()).collect();

    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

pub fn total_reviews(log: &[ReviewLogEntry]) -> usize {
    log.len()
}

/// Share of correct reviews in `[from, to)`, or over the whole log without
/// a window. 0 when no review falls in range.
pub fn accuracy(log: &[ReviewLogEntry], window: Option<(DateTime<Utc>, DateTime<Utc>)>) -> f64 {
    let (correct, total) = log
        .iter()
        .filter(|e| match window {
            Some((from, to)) => e.reviewed_at >= from && e.reviewed_at < to,
            None => true,
        })
        .fold((0usize, 0usize), |(c, n), e| {
            (c + usize::from(e.outcome.is_correct()), n + 1)
        });

    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

pub fn overall_accuracy(log: &[ReviewLogEntry]) -> f64 {
    accuracy(log, None)
}

/// Accuracy over the last seven calendar days, today included.
pub fn weekly_accuracy(log: &[ReviewLogEntry], now: DateTime<Utc>) -> f64 {
    let (from, to) = week_window(now.date_naive());
    accuracy(log, Some((from, to)))
}

/// How many records sit at each mastery level. Every level is present.
pub fn mastery_histogram<'a, I>(records: I, t: &MasteryThresholds) -> BTreeMap<MasteryLevel, usize>
where
    I: IntoIterator<Item = &'a ReviewRecord>,
{
    let mut histogram: BTreeMap<MasteryLevel, usize> =
        MasteryLevel::ALL.iter().map(|&l| (l, 0)).collect();
    for record in records {
        *histogram.entry(classify(record, t)).or_default() += 1;
    }
    histogram
}

/// Reviews per day for the seven days ending at `today`, oldest first.
pub fn daily_review_counts(log: &[ReviewLogEntry], today: NaiveDate) -> [u32; 7] {
    let mut counts = [0u32; 7];
    for entry in log {
        let age = (today - entry.reviewed_at.date_naive()).num_days();
        if (0..WEEK_DAYS).contains(&age) {
            counts[(WEEK_DAYS - 1 - age) as usize] += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StudyTime {
    pub sessions: usize,
    pub minutes: u32,
}

/// Sessions completed in the last seven calendar days and their planned
/// minutes.
pub fn study_time(sessions: &[StudySession], now: DateTime<Utc>) -> StudyTime {
    let (from, to) = week_window(now.date_naive());
    sessions
        .iter()
        .filter(|s| s.completed)
        .filter(|s| matches!(s.completed_at, Some(at) if at >= from && at < to))
        .fold(StudyTime::default(), |acc, s| StudyTime {
            sessions: acc.sessions + 1,
            minutes: acc.minutes + s.duration_minutes,
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_topics: usize,
    pub total_cards: usize,
    pub due_now: usize,
    pub total_reviews: usize,
    pub current_streak: u32,
    pub overall_accuracy: f64,
    pub weekly_accuracy: f64,
    pub average_mastery: f64,
    pub mastery_histogram: BTreeMap<MasteryLevel, usize>,
    pub daily_reviews: [u32; 7],
    pub study_time: StudyTime,
}

pub fn summarize(
    topics: &[Topic],
    log: &[ReviewLogEntry],
    sessions: &[StudySession],
    now: DateTime<Utc>,
    t: &MasteryThresholds,
) -> Summary {
    let today = now.date_naive();
    let records = topics.iter().flat_map(|tp| tp.cards.iter()).map(|c| &c.review);

    Summary {
        total_topics: topics.len(),
        total_cards: topics.iter().map(|tp| tp.cards.len()).sum(),
        due_now: records.clone().filter(|r| r.is_due(now)).count(),
        total_reviews: total_reviews(log),
        current_streak: current_streak(log, today),
        overall_accuracy: overall_accuracy(log),
        weekly_accuracy: weekly_accuracy(log, now),
        average_mastery: aggregate_mastery(topics, t),
        mastery_histogram: mastery_histogram(records, t),
        daily_reviews: daily_review_counts(log, today),
        study_time: study_time(sessions, now),
    }
}

fn week_window(today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = (today + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc();
    (end - Duration::days(WEEK_DAYS), end)
}
