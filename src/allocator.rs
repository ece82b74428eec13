//! Deadline-driven session allocation.
//!
//! S = ceil(total deficit / cards per session) sessions, at least one per
//! topic with a deficit, are spread over the days before the target with a
//! tapering curve: day(i) = floor(days * (1 - (1 - i/S)^2)). Early sessions sit far
//! apart and later ones compress toward the deadline. A settling pass then
//! enforces the per-day cap.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{MasteryThresholds, PlannerPolicy};
use crate::error::{PlanError, Result};
use crate::mastery::{aggregate_mastery, deficit_cards};
use crate::models::{SessionType, StudyPlan, StudySession, Topic};

const SECONDS_PER_DAY: i64 = 86_400;

pub struct Allocator<'a> {
    pub planner: &'a PlannerPolicy,
    pub thresholds: &'a MasteryThresholds,
    pub clock: &'a dyn Clock,
}

impl<'a> Allocator<'a> {
    pub fn new(
        planner: &'a PlannerPolicy,
        thresholds: &'a MasteryThresholds,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            planner,
            thresholds,
            clock,
        }
    }

    /// Build a study plan that covers every card below `target_mastery`
    /// before `target_date`.
    pub fn generate_plan(
        &self,
        title: &str,
        topics: &[Topic],
        target_date: DateTime<Utc>,
        target_mastery: f64,
    ) -> Result<StudyPlan> {
        if !(0.0..=100.0).contains(&target_mastery) {
            return Err(PlanError::InvalidTarget(target_mastery));
        }

        let now = self.clock.now();
        if target_date <= now {
            return Err(PlanError::InvalidDeadline {
                target: target_date,
                now,
            });
        }

        let days = days_available(now, target_date);
        if days < 1 {
            return Err(PlanError::InsufficientTime {
                target: target_date,
            });
        }
        let days = days as u32;

        let deficits: Vec<(i64, u32)> = topics
            .iter()
            .map(|t| {
                let n = deficit_cards(t, target_mastery, self.thresholds).count() as u32;
                (t.id, n)
            })
            .collect();

        let mut occupancy = vec![0u32; days as usize];
        let sessions = self.allocate(&deficits, now, target_date, &mut occupancy, &[], None);

        debug!(
            days,
            sessions = sessions.len(),
            deficit = deficits.iter().map(|(_, n)| n).sum::<u32>(),
            "allocated study plan"
        );

        let mastery = aggregate_mastery(topics, self.thresholds);

        Ok(StudyPlan {
            id: Uuid::new_v4(),
            title: title.to_string(),
            created_at: now,
            target_date,
            target_mastery,
            initial_mastery: mastery,
            current_mastery: mastery,
            topic_ids: topics.iter().map(|t| t.id).collect::<BTreeSet<_>>(),
            sessions,
            is_active: true,
            last_recalculated_at: None,
        })
    }

    /// Shared by plan generation and catch-up insertion: turn per-topic
    /// deficits into sessions placed on the days counted from `now`.
    ///
    /// `occupancy` holds sessions already booked per day and is updated.
    /// `existing` is only consulted to keep same-topic sessions apart.
    /// With a `tag`, every session is a tagged catch-up session. Cards that
    /// find no room are left out; callers decide where they go.
    pub(crate) fn allocate(
        &self,
        deficits: &[(i64, u32)],
        now: DateTime<Utc>,
        target_date: DateTime<Utc>,
        occupancy: &mut [u32],
        existing: &[StudySession],
        tag: Option<DateTime<Utc>>,
    ) -> Vec<StudySession> {
        let p = self.planner;

        let weights: Vec<u32> = deficits.iter().map(|&(_, n)| n).collect();
        let total: u32 = weights.iter().sum();
        let free: u32 = occupancy
            .iter()
            .map(|&used| p.max_sessions_per_day.saturating_sub(used))
            .sum();

        if total == 0 {
            return Vec::new();
        }
        if free == 0 {
            warn!("no free session slots left before the deadline");
            return Vec::new();
        }

        // Sessions hold a single topic, so every short topic needs one.
        let short_topics = weights.iter().filter(|&&n| n > 0).count() as u32;
        let wanted = total.div_ceil(p.cards_per_session).max(short_topics);
        let capped = wanted > free;
        let count = wanted.min(free) as usize;

        let natural: Vec<u32> = weights
            .iter()
            .map(|n| n.div_ceil(p.cards_per_session))
            .collect();
        let mut order = interleave(&weights, &natural, count);
        let mut counts = vec![0u32; weights.len()];
        for &t in &order {
            counts[t] += 1;
        }
        let quotas = give_every_topic_one(&counts, &weights);
        if quotas != counts {
            order = interleave(&weights, &quotas, order.len());
        }

        let slots = place_days(order.len(), occupancy, p.max_sessions_per_day);

        // Deal each topic's cards to its sessions in time order.
        let mut planned = vec![0u32; order.len()];
        for (t, &(_, deficit)) in deficits.iter().enumerate() {
            let idx: Vec<usize> = (0..order.len()).filter(|&i| order[i] == t).collect();
            deal_cards(deficit, p.cards_per_session, &idx, &mut planned);
        }

        let mut sessions: Vec<StudySession> = Vec::with_capacity(order.len());
        for (i, &t) in order.iter().enumerate() {
            let topic_id = deficits[t].0;
            let Some(&(day, slot)) = slots.get(i) else {
                break;
            };
            let (anchor, window_end) = day_window(now, target_date, day);
            let start = slot_start(anchor, window_end, slot, p);
            let duration = planned[i] * p.minutes_per_card;

            let placed = clear_of_topic(
                existing.iter().chain(sessions.iter()),
                topic_id,
                start,
                duration,
                window_end,
            );
            let Some(start) = placed else {
                // No gap left on this day: fold the cards into the topic's
                // latest session from this batch.
                let previous = sessions
                    .iter_mut()
                    .filter(|s| s.topic_id == topic_id)
                    .max_by_key(|s| s.scheduled_at);
                match previous {
                    Some(s) => {
                        s.planned_cards += planned[i];
                        s.duration_minutes = s.planned_cards * p.minutes_per_card;
                        debug!(topic_id, cards = planned[i], "merged session into earlier one");
                    }
                    None => warn!(
                        topic_id,
                        cards = planned[i],
                        "no room for session before its day ends"
                    ),
                }
                continue;
            };

            sessions.push(StudySession {
                id: Uuid::new_v4(),
                scheduled_at: start,
                topic_id,
                duration_minutes: duration,
                planned_cards: planned[i],
                session_type: SessionType::Review,
                completed: false,
                completed_at: None,
                cards_reviewed: None,
                recalculation_tag: tag,
            });
        }

        sessions.sort_by_key(|s| s.scheduled_at);

        let mut nth: HashMap<i64, u32> = HashMap::new();
        for s in &mut sessions {
            let n = nth.entry(s.topic_id).or_insert(0);
            *n += 1;
            s.session_type = if tag.is_some() || (capped && s.planned_cards > p.cards_per_session) {
                SessionType::CatchUp
            } else if *n == 1 {
                SessionType::NewContent
            } else if *n % p.quiz_every == 0 {
                SessionType::Quiz
            } else {
                SessionType::Review
            };
        }

        sessions
    }
}

/// Whole days between `now` and `target`, rounded up.
pub fn days_available(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let secs = (target - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }
}

/// Ideal day index of session `i` out of `count` over `days` days.
pub fn taper_day(i: usize, count: usize, days: u32) -> u32 {
    if count == 0 || days == 0 {
        return 0;
    }
    let x = i as f64 / count as f64;
    let day = (f64::from(days) * (1.0 - (1.0 - x).powi(2))).floor();
    (day.max(0.0) as u32).min(days - 1)
}

/// Assign `count` sessions to days, honouring `max_per_day`.
///
/// Sessions are settled latest first: each takes the latest day at or
/// before its ideal day with room, else the earliest later day with room.
/// Returns `(day, slot)` pairs in time order, slot being the position within
/// that day.
pub(crate) fn place_days(count: usize, occupancy: &mut [u32], max_per_day: u32) -> Vec<(u32, u32)> {
    let days = occupancy.len() as u32;
    let mut assigned: Vec<u32> = Vec::with_capacity(count);
    let mut load = occupancy.to_vec();

    for i in (0..count).rev() {
        let ideal = taper_day(i, count, days);
        let day = (0..=ideal)
            .rev()
            .chain(ideal + 1..days)
            .find(|&d| load[d as usize] < max_per_day);
        // Callers never ask for more sessions than there is room for.
        let Some(day) = day else { continue };
        load[day as usize] += 1;
        assigned.push(day);
    }

    assigned.sort_unstable();
    assigned
        .into_iter()
        .map(|day| {
            let slot = occupancy[day as usize];
            occupancy[day as usize] += 1;
            (day, slot)
        })
        .collect()
}

/// Smooth weighted round robin over `rounds` picks. Index `i` is never
/// picked more than `limits[i]` times and a zero weight is never picked.
/// Ties go to the lower index.
fn interleave(weights: &[u32], limits: &[u32], rounds: usize) -> Vec<usize> {
    let mut current = vec![0i64; weights.len()];
    let mut taken = vec![0u32; weights.len()];
    let mut order = Vec::with_capacity(rounds);

    for _ in 0..rounds {
        let open: Vec<usize> = (0..weights.len())
            .filter(|&j| weights[j] > 0 && taken[j] < limits[j])
            .collect();
        let Some(&first) = open.first() else { break };

        let total: i64 = open.iter().map(|&j| i64::from(weights[j])).sum();
        for &j in &open {
            current[j] += i64::from(weights[j]);
        }
        let best = open
            .iter()
            .copied()
            .fold(first, |best, j| if current[j] > current[best] { j } else { best });
        current[best] -= total;
        taken[best] += 1;
        order.push(best);
    }
    order
}

/// Move sessions from the topic holding the most onto topics with a deficit
/// but none, while some topic can spare one. The largest deficits are served
/// first and the smaller deficit gives on ties.
fn give_every_topic_one(counts: &[u32], weights: &[u32]) -> Vec<u32> {
    let mut quotas = counts.to_vec();
    let mut empty: Vec<usize> = (0..weights.len())
        .filter(|&t| weights[t] > 0 && quotas[t] == 0)
        .collect();
    empty.sort_by(|a, b| weights[*b].cmp(&weights[*a]).then(a.cmp(b)));

    for t in empty {
        let donor = quotas
            .iter()
            .enumerate()
            .filter(|(_, q)| **q > 1)
            .max_by(|(a, qa), (b, qb)| {
                qa.cmp(qb)
                    .then(weights[*b].cmp(&weights[*a]))
                    .then(b.cmp(a))
            })
            .map(|(i, _)| i);
        let Some(donor) = donor else { break };
        quotas[donor] -= 1;
        quotas[t] = 1;
    }
    quotas
}

/// Give each session up to `per_session` cards in order, then spill what is
/// left onto the latest sessions.
fn deal_cards(deficit: u32, per_session: u32, idx: &[usize], planned: &mut [u32]) {
    if idx.is_empty() {
        return;
    }
    let mut remaining = deficit;
    for &i in idx {
        let take = remaining.min(per_session);
        planned[i] = take;
        remaining -= take;
    }
    for &i in idx.iter().rev().cycle() {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(per_session);
        planned[i] += take;
        remaining -= take;
    }
}

/// Anchor and end of day `day`'s window. The window ends at the earlier of
/// one day after the anchor and the target.
fn day_window(
    now: DateTime<Utc>,
    target: DateTime<Utc>,
    day: u32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let anchor = now + Duration::days(i64::from(day));
    (anchor, (anchor + Duration::days(1)).min(target))
}

/// Start time of slot `slot` in a day window. Slots are spread from the
/// anchor by the configured gap, squeezed so that every slot starts before
/// the window ends.
fn slot_start(
    anchor: DateTime<Utc>,
    window_end: DateTime<Utc>,
    slot: u32,
    p: &PlannerPolicy,
) -> DateTime<Utc> {
    let window = window_end - anchor;
    let per_slot = window / p.max_sessions_per_day.max(1) as i32;
    let gap = Duration::minutes(i64::from(p.slot_gap_minutes)).min(per_slot);
    anchor + gap * slot as i32
}

/// Move `start` past any session of the same topic it would overlap.
/// `None` when that pushes it to or beyond `limit`.
fn clear_of_topic<'s, I>(
    sessions: I,
    topic_id: i64,
    start: DateTime<Utc>,
    minutes: u32,
    limit: DateTime<Utc>,
) -> Option<DateTime<Utc>>
where
    I: Iterator<Item = &'s StudySession> + Clone,
{
    let mut start = start;
    loop {
        if start >= limit {
            return None;
        }
        let conflict = sessions
            .clone()
            .filter(|s| s.topic_id == topic_id && s.overlaps(start, minutes))
            .map(|s| s.ends_at())
            .max();
        match conflict {
            Some(end) if end > start => start = end,
            _ => return Some(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ReviewPolicy;
    use crate::models::{Card, CardKind, ReviewOutcome, ReviewRecord};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn learning_topic(id: i64, cards: i64) -> Topic {
        let policy = ReviewPolicy::default();
        Topic {
            id,
            name: format!("Topic {id}"),
            description: None,
            cards: (0..cards)
                .map(|n| {
                    let card_id = id * 1000 + n;
                    Card {
                        id: card_id,
                        topic_id: id,
                        question: format!("Q{n}"),
                        answer: format!("A{n}"),
                        kind: CardKind::Basic,
                        tags: vec![],
                        review: ReviewRecord::new(card_id, now(), &policy),
                    }
                })
                .collect(),
            review_count: 0,
            correct_count: 0,
        }
    }

    fn mastered(mut topic: Topic) -> Topic {
        for card in &mut topic.cards {
            card.review.history = std::iter::repeat(ReviewOutcome::Correct).take(6).collect();
            card.review.review_count = 6;
        }
        topic
    }

    fn plan(topics: &[Topic], days: i64, target: f64) -> Result<StudyPlan> {
        let planner = PlannerPolicy::default();
        let thresholds = MasteryThresholds::default();
        let clock = FixedClock(now());
        Allocator::new(&planner, &thresholds, &clock).generate_plan(
            "Exam",
            topics,
            now() + Duration::days(days),
            target,
        )
    }

    fn day_of(plan: &StudyPlan, s: &StudySession) -> i64 {
        (s.scheduled_at - plan.created_at).num_days()
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn past_deadline_is_invalid() {
            let err = plan(&[learning_topic(1, 5)], -1, 80.0).unwrap_err();
            assert!(matches!(err, PlanError::InvalidDeadline { .. }));
        }

        #[test]
        fn deadline_equal_to_now_is_invalid() {
            let err = plan(&[learning_topic(1, 5)], 0, 80.0).unwrap_err();
            assert!(matches!(err, PlanError::InvalidDeadline { .. }));
        }

        #[test]
        fn sub_second_deadline_is_insufficient_time() {
            let planner = PlannerPolicy::default();
            let thresholds = MasteryThresholds::default();
            let clock = FixedClock(now());
            let err = Allocator::new(&planner, &thresholds, &clock)
                .generate_plan(
                    "Exam",
                    &[learning_topic(1, 5)],
                    now() + Duration::milliseconds(400),
                    80.0,
                )
                .unwrap_err();
            assert!(matches!(err, PlanError::InsufficientTime { .. }));
        }

        #[test]
        fn target_out_of_range_is_rejected() {
            assert_eq!(
                plan(&[learning_topic(1, 5)], 5, 120.0).unwrap_err(),
                PlanError::InvalidTarget(120.0)
            );
            assert!(plan(&[learning_topic(1, 5)], 5, -1.0).is_err());
        }
    }

    mod helper_tests {
        use super::*;

        #[test]
        fn days_available_rounds_up() {
            assert_eq!(days_available(now(), now() + Duration::hours(1)), 1);
            assert_eq!(days_available(now(), now() + Duration::days(14)), 14);
            assert_eq!(days_available(now(), now() + Duration::days(14) + Duration::seconds(1)), 15);
            assert_eq!(days_available(now(), now()), 0);
        }

        #[test]
        fn taper_front_loads_spacing() {
            let days: Vec<u32> = (0..5).map(|i| taper_day(i, 5, 20)).collect();
            assert_eq!(days, vec![0, 7, 12, 16, 19]);
            let gaps: Vec<u32> = days.windows(2).map(|w| w[1] - w[0]).collect();
            assert!(gaps.windows(2).all(|g| g[0] >= g[1]));
        }

        #[test]
        fn interleave_respects_limits() {
            let order = interleave(&[3, 1], &[3, 1], 4);
            assert_eq!(order, vec![0, 0, 1, 0]);
            let order = interleave(&[2, 2], &[2, 2], 4);
            assert_eq!(order, vec![0, 1, 0, 1]);
            let order = interleave(&[45, 15], &[3, 1], 10);
            assert_eq!(order, vec![0, 0, 1, 0]);
        }

        #[test]
        fn interleave_skips_zero_weights() {
            let order = interleave(&[0, 10], &[0, 1], 3);
            assert_eq!(order, vec![1]);
        }

        #[test]
        fn small_topics_get_a_session() {
            let order = interleave(&[20, 1], &[2, 1], 2);
            assert_eq!(order, vec![0, 0]);
            assert_eq!(give_every_topic_one(&[2, 0], &[20, 1]), vec![1, 1]);
            // Nothing to spare
            assert_eq!(give_every_topic_one(&[1, 0, 0], &[9, 5, 4]), vec![1, 0, 0]);
            assert_eq!(give_every_topic_one(&[3, 0, 0], &[9, 5, 4]), vec![1, 1, 1]);
        }

        #[test]
        fn nudge_stops_at_limit() {
            let busy = StudySession {
                id: Uuid::new_v4(),
                scheduled_at: now(),
                topic_id: 1,
                duration_minutes: 120,
                planned_cards: 60,
                session_type: SessionType::Review,
                completed: false,
                completed_at: None,
                cards_reviewed: None,
                recalculation_tag: None,
            };
            let sessions = [busy];
            let start = now() + Duration::minutes(30);

            let moved = clear_of_topic(sessions.iter(), 1, start, 30, now() + Duration::hours(3));
            assert_eq!(moved, Some(now() + Duration::minutes(120)));
            let limit = now() + Duration::hours(1);
            assert_eq!(clear_of_topic(sessions.iter(), 1, start, 30, limit), None);
            assert_eq!(clear_of_topic(sessions.iter(), 2, start, 30, limit), Some(start));
        }

        #[test]
        fn deal_spills_onto_latest_sessions() {
            let mut planned = vec![0; 3];
            deal_cards(50, 15, &[0, 1, 2], &mut planned);
            assert_eq!(planned, vec![15, 15, 20]);

            let mut planned = vec![0; 2];
            deal_cards(20, 15, &[0, 1], &mut planned);
            assert_eq!(planned, vec![15, 5]);
        }

        #[test]
        fn place_days_never_exceeds_cap() {
            let mut occupancy = vec![0; 14];
            let slots = place_days(28, &mut occupancy, 2);
            assert_eq!(slots.len(), 28);
            assert!(occupancy.iter().all(|&n| n == 2));
        }

        #[test]
        fn place_days_respects_existing_load() {
            let mut occupancy = vec![2, 2, 1, 0];
            let slots = place_days(3, &mut occupancy, 2);
            assert_eq!(slots.len(), 3);
            assert!(occupancy.iter().all(|&n| n <= 2));
            assert!(slots.contains(&(2, 1)));
        }
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn thirty_learning_cards_follow_tapering_formula() {
            let topics = [learning_topic(1, 30)];
            let plan = plan(&topics, 14, 80.0).unwrap();

            // Independent recomputation: S = ceil(30 / 15) = 2 over 14 days.
            let s = (30f64 / 15.0).ceil() as usize;
            let expected: Vec<i64> = (0..s)
                .map(|i| {
                    let x = i as f64 / s as f64;
                    (14.0 * (1.0 - (1.0 - x) * (1.0 - x))).floor() as i64
                })
                .collect();
            assert_eq!(expected, vec![0, 10]);

            assert_eq!(plan.sessions.len(), s);
            let days: Vec<i64> = plan.sessions.iter().map(|x| day_of(&plan, x)).collect();
            assert_eq!(days, expected);

            assert_eq!(plan.sessions[0].session_type, SessionType::NewContent);
            assert_eq!(plan.sessions[1].session_type, SessionType::Review);
            assert!(plan.sessions.iter().all(|x| x.planned_cards == 15));
            assert!(plan.sessions.iter().all(|x| x.duration_minutes == 30));
            assert_eq!(plan.initial_mastery, 0.0);
            assert_eq!(plan.current_mastery, 0.0);
            assert!(plan.is_active);
        }

        #[test]
        fn sessions_never_exceed_daily_cap() {
            let topics = [learning_topic(1, 200), learning_topic(2, 150)];
            let plan = plan(&topics, 5, 100.0).unwrap();

            let mut per_day: HashMap<i64, u32> = HashMap::new();
            for s in &plan.sessions {
                *per_day.entry(day_of(&plan, s)).or_default() += 1;
            }
            assert!(per_day.values().all(|&n| n <= 2), "{per_day:?}");
            assert_eq!(plan.sessions.len(), 10);
        }

        #[test]
        fn overflow_spills_into_dense_catch_up_sessions() {
            let topics = [learning_topic(1, 100)];
            let plan = plan(&topics, 2, 100.0).unwrap();

            assert_eq!(plan.sessions.len(), 4);
            let total: u32 = plan.sessions.iter().map(|s| s.planned_cards).sum();
            assert_eq!(total, 100);

            let last = plan.sessions.last().unwrap();
            assert_eq!(last.session_type, SessionType::CatchUp);
            assert!(last.planned_cards > 15);
            assert_eq!(plan.sessions[0].session_type, SessionType::NewContent);
        }

        #[test]
        fn session_count_pools_topic_deficits() {
            let topics = [learning_topic(1, 16), learning_topic(2, 16)];
            let plan = plan(&topics, 14, 80.0).unwrap();

            let s = (32f64 / 15.0).ceil() as usize;
            assert_eq!(s, 3);
            assert_eq!(plan.sessions.len(), s);
            assert_eq!(plan.sessions.iter().map(|x| x.planned_cards).sum::<u32>(), 32);
            assert!(plan.sessions.iter().any(|x| x.topic_id == 1));
            assert!(plan.sessions.iter().any(|x| x.topic_id == 2));

            let days: Vec<i64> = plan.sessions.iter().map(|x| day_of(&plan, x)).collect();
            let expected: Vec<i64> = (0..s)
                .map(|i| {
                    let x = i as f64 / s as f64;
                    (14.0 * (1.0 - (1.0 - x) * (1.0 - x))).floor() as i64
                })
                .collect();
            assert_eq!(days, expected);
        }

        #[test]
        fn every_short_topic_gets_a_session() {
            let topics = [learning_topic(1, 20), learning_topic(2, 1)];
            let plan = plan(&topics, 14, 80.0).unwrap();
            assert_eq!(plan.sessions.len(), 2);
            let one = plan.sessions.iter().find(|s| s.topic_id == 2).unwrap();
            assert_eq!(one.planned_cards, 1);
            assert_eq!(one.session_type, SessionType::NewContent);
        }

        #[test]
        fn huge_deficit_stays_inside_deadline_and_cap() {
            let topics = [learning_topic(1, 2000)];
            let plan = plan(&topics, 2, 100.0).unwrap();

            assert!(plan.sessions.iter().all(|s| s.scheduled_at < plan.target_date));
            let mut per_day: HashMap<i64, u32> = HashMap::new();
            for s in &plan.sessions {
                *per_day.entry(day_of(&plan, s)).or_default() += 1;
            }
            assert!(per_day.values().all(|&n| n <= 2), "{per_day:?}");
            assert_eq!(plan.sessions.iter().map(|s| s.planned_cards).sum::<u32>(), 2000);
            assert!(plan
                .sessions
                .iter()
                .all(|s| s.duration_minutes == s.planned_cards * 2));
            for (i, a) in plan.sessions.iter().enumerate() {
                for b in plan.sessions.iter().skip(i + 1) {
                    assert!(!a.overlaps(b.scheduled_at, b.duration_minutes));
                }
            }
        }

        #[test]
        fn every_fourth_session_of_a_topic_is_a_quiz() {
            let topics = [learning_topic(1, 90)];
            let plan = plan(&topics, 30, 80.0).unwrap();
            let types: Vec<SessionType> = plan.sessions.iter().map(|s| s.session_type).collect();
            assert_eq!(
                types,
                vec![
                    SessionType::NewContent,
                    SessionType::Review,
                    SessionType::Review,
                    SessionType::Quiz,
                    SessionType::Review,
                    SessionType::Review,
                ]
            );
        }

        #[test]
        fn topics_interleave_by_deficit_share() {
            let topics = [learning_topic(1, 45), learning_topic(2, 15)];
            let plan = plan(&topics, 20, 50.0).unwrap();
            let order: Vec<i64> = plan.sessions.iter().map(|s| s.topic_id).collect();
            assert_eq!(order, vec![1, 1, 2, 1]);
            let first_of_two = plan.sessions.iter().find(|s| s.topic_id == 2).unwrap();
            assert_eq!(first_of_two.session_type, SessionType::NewContent);
        }

        #[test]
        fn mastered_topics_get_no_sessions() {
            let topics = [mastered(learning_topic(1, 20)), learning_topic(2, 10)];
            let plan = plan(&topics, 10, 80.0).unwrap();
            assert!(plan.sessions.iter().all(|s| s.topic_id == 2));
            assert_eq!(plan.sessions.len(), 1);
            assert_eq!(plan.sessions[0].planned_cards, 10);
            // 20 mastered cards (100) and 10 learning cards (0)
            assert!((plan.initial_mastery - 200.0 / 3.0).abs() < 1e-9);
            assert_eq!(plan.topic_ids.len(), 2);
        }

        #[test]
        fn no_deficit_yields_empty_schedule() {
            let topics = [mastered(learning_topic(1, 10))];
            let plan = plan(&topics, 10, 90.0).unwrap();
            assert!(plan.sessions.is_empty());
            assert_eq!(plan.current_mastery, 100.0);
        }

        #[test]
        fn sessions_are_time_ordered_and_before_deadline() {
            let topics = [learning_topic(1, 120), learning_topic(2, 80), learning_topic(3, 10)];
            let plan = plan(&topics, 7, 80.0).unwrap();
            assert!(plan.sessions.windows(2).all(|w| w[0].scheduled_at <= w[1].scheduled_at));
            assert!(plan.sessions.iter().all(|s| s.scheduled_at < plan.target_date));
            assert!(plan.sessions.iter().all(|s| s.scheduled_at >= plan.created_at));
        }

        #[test]
        fn same_topic_sessions_do_not_overlap() {
            let topics = [learning_topic(1, 300)];
            let plan = plan(&topics, 3, 100.0).unwrap();
            for (i, a) in plan.sessions.iter().enumerate() {
                for b in plan.sessions.iter().skip(i + 1) {
                    assert!(!a.overlaps(b.scheduled_at, b.duration_minutes));
                }
            }
        }
    }
}
