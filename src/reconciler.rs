//! Keeps a plan on its mastery trajectory as reviews come in.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocator::{days_available, Allocator};
use crate::clock::Clock;
use crate::config::{MasteryThresholds, PlannerPolicy, ReconcilerPolicy};
use crate::error::{PlanError, Result};
use crate::mastery::{aggregate_mastery, deficit_cards};
use crate::models::{SessionType, StudyPlan, StudySession, Topic};

pub struct Reconciler<'a> {
    pub planner: &'a PlannerPolicy,
    pub thresholds: &'a MasteryThresholds,
    pub policy: &'a ReconcilerPolicy,
    pub clock: &'a dyn Clock,
}

/// Where a plan stands against its expected trajectory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanProgress {
    pub expected_mastery: f64,
    pub current_mastery: f64,
    pub behind_by: f64,
    pub on_track: bool,
    pub completed_sessions: usize,
    pub remaining_sessions: usize,
    pub missed_sessions: usize,
    pub days_remaining: i64,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        planner: &'a PlannerPolicy,
        thresholds: &'a MasteryThresholds,
        policy: &'a ReconcilerPolicy,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            planner,
            thresholds,
            policy,
            clock,
        }
    }

    /// Refresh mastery from live card state and rebalance the uncompleted
    /// part of the schedule. Completed sessions are carried over untouched.
    pub fn recalculate(&self, plan: &StudyPlan, topics: &[Topic]) -> Result<StudyPlan> {
        if !plan.is_active {
            return Err(PlanError::PlanInactive(plan.id));
        }

        let now = self.clock.now();
        let live: Vec<&Topic> = topics
            .iter()
            .filter(|t| plan.topic_ids.contains(&t.id))
            .collect();

        let mut next = plan.clone();
        next.current_mastery = aggregate_mastery(live.iter().copied(), self.thresholds);
        next.last_recalculated_at = Some(now);

        if now >= plan.target_date {
            info!(plan_id = %plan.id, "target date passed, archiving plan");
            next.is_active = false;
            return Ok(next);
        }

        let expected = expected_mastery(plan, now);
        let behind = expected - next.current_mastery;
        let deficits: Vec<(i64, u32)> = live
            .iter()
            .map(|t| {
                let n = deficit_cards(t, plan.target_mastery, self.thresholds).count() as u32;
                (t.id, n)
            })
            .collect();

        debug!(
            plan_id = %plan.id,
            expected,
            actual = next.current_mastery,
            "recalculating plan"
        );

        if behind > self.policy.slack {
            self.insert_catch_up(&mut next, &deficits, now);
        } else {
            self.trim_catch_up(&mut next, &deficits, now);
        }

        Ok(next)
    }

    fn insert_catch_up(&self, plan: &mut StudyPlan, deficits: &[(i64, u32)], now: DateTime<Utc>) {
        let covered = upcoming_cards(&plan.sessions, now);
        let residual: Vec<(i64, u32)> = deficits
            .iter()
            .map(|&(id, n)| (id, n.saturating_sub(covered.get(&id).copied().unwrap_or(0))))
            .collect();

        if residual.iter().all(|&(_, n)| n == 0) {
            return;
        }

        let days = days_available(now, plan.target_date) as u32;
        let mut occupancy = vec![0u32; days as usize];
        for s in &plan.sessions {
            if s.is_pending(now) && s.scheduled_at < plan.target_date {
                let day = (s.scheduled_at - now).num_days().max(0) as usize;
                if let Some(slot) = occupancy.get_mut(day) {
                    *slot += 1;
                }
            }
        }

        let allocator = Allocator::new(self.planner, self.thresholds, self.clock);
        let inserted = allocator.allocate(
            &residual,
            now,
            plan.target_date,
            &mut occupancy,
            &plan.sessions,
            Some(now),
        );

        info!(
            plan_id = %plan.id,
            inserted = inserted.len(),
            residual = residual.iter().map(|(_, n)| n).sum::<u32>(),
            "inserting catch-up sessions"
        );

        plan.sessions.extend(inserted);

        // Anything the free slots could not absorb makes the topic's last
        // upcoming session denser.
        let covered = upcoming_cards(&plan.sessions, now);
        for &(topic_id, deficit) in deficits {
            let short = deficit.saturating_sub(covered.get(&topic_id).copied().unwrap_or(0));
            if short == 0 {
                continue;
            }
            let last = plan
                .sessions
                .iter_mut()
                .filter(|s| s.topic_id == topic_id && s.is_pending(now))
                .max_by_key(|s| s.scheduled_at);
            match last {
                Some(s) => {
                    s.planned_cards += short;
                    s.duration_minutes = s.planned_cards * self.planner.minutes_per_card;
                    s.session_type = SessionType::CatchUp;
                    s.recalculation_tag = Some(now);
                }
                None => warn!(
                    plan_id = %plan.id,
                    topic_id,
                    short,
                    "no room left to schedule catch-up cards"
                ),
            }
        }

        plan.sessions.sort_by_key(|s| s.scheduled_at);
    }

    fn trim_catch_up(&self, plan: &mut StudyPlan, deficits: &[(i64, u32)], now: DateTime<Utc>) {
        let mut covered = upcoming_cards(&plan.sessions, now);
        let needed: HashMap<i64, u32> = deficits.iter().copied().collect();

        let mut candidates: Vec<(DateTime<Utc>, Uuid, i64, u32)> = plan
            .sessions
            .iter()
            .filter(|s| {
                s.is_pending(now)
                    && s.recalculation_tag.is_some()
                    && s.session_type == SessionType::CatchUp
            })
            .map(|s| (s.scheduled_at, s.id, s.topic_id, s.planned_cards))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut dropped = Vec::new();
        for (_, id, topic_id, cards) in candidates {
            let have = covered.get(&topic_id).copied().unwrap_or(0);
            let need = needed.get(&topic_id).copied().unwrap_or(0);
            if have.saturating_sub(cards) >= need {
                covered.insert(topic_id, have - cards);
                dropped.push(id);
            }
        }

        if !dropped.is_empty() {
            info!(plan_id = %plan.id, dropped = dropped.len(), "trimming surplus catch-up sessions");
            plan.sessions.retain(|s| !dropped.contains(&s.id));
        }
    }

    /// Mark one session complete. Completed sessions are final.
    pub fn complete_session(
        &self,
        plan: &StudyPlan,
        session_id: Uuid,
        cards_reviewed: u32,
    ) -> Result<StudyPlan> {
        if !plan.is_active {
            return Err(PlanError::PlanInactive(plan.id));
        }
        let idx = plan
            .sessions
            .iter()
            .position(|s| s.id == session_id)
            .ok_or(PlanError::SessionNotFound(session_id))?;
        if plan.sessions[idx].completed {
            return Err(PlanError::SessionAlreadyCompleted(session_id));
        }

        let mut next = plan.clone();
        let session = &mut next.sessions[idx];
        session.completed = true;
        session.completed_at = Some(self.clock.now());
        session.cards_reviewed = Some(cards_reviewed);
        Ok(next)
    }

    pub fn progress(&self, plan: &StudyPlan, topics: &[Topic]) -> PlanProgress {
        let now = self.clock.now();
        let current = aggregate_mastery(
            topics.iter().filter(|t| plan.topic_ids.contains(&t.id)),
            self.thresholds,
        );
        let expected = expected_mastery(plan, now);
        let behind_by = expected - current;

        PlanProgress {
            expected_mastery: expected,
            current_mastery: current,
            behind_by,
            on_track: behind_by <= self.policy.slack,
            completed_sessions: plan.completed_sessions(),
            remaining_sessions: plan
                .sessions
                .iter()
                .filter(|s| s.is_pending(now))
                .count(),
            missed_sessions: plan
                .sessions
                .iter()
                .filter(|s| !s.completed && !s.is_pending(now))
                .count(),
            days_remaining: days_available(now, plan.target_date),
        }
    }
}

/// Archive a plan.
pub fn archive(plan: &StudyPlan) -> StudyPlan {
    StudyPlan {
        is_active: false,
        ..plan.clone()
    }
}

/// Linear interpolation from the creation-time mastery to the target over
/// the elapsed fraction of the plan's lifetime.
pub fn expected_mastery(plan: &StudyPlan, now: DateTime<Utc>) -> f64 {
    let total = (plan.target_date - plan.created_at).num_seconds();
    let fraction = if total <= 0 {
        1.0
    } else {
        let elapsed = (now - plan.created_at).num_seconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    };
    plan.initial_mastery + (plan.target_mastery - plan.initial_mastery) * fraction
}

/// Planned cards of sessions still pending, per topic.
fn upcoming_cards(sessions: &[StudySession], now: DateTime<Utc>) -> HashMap<i64, u32> {
    let mut covered = HashMap::new();
    for s in sessions.iter().filter(|s| s.is_pending(now)) {
        *covered.entry(s.topic_id).or_insert(0) += s.planned_cards;
    }
    covered
}
