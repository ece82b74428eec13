use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use uuid::Uuid;

use crate::config::ReviewPolicy;
use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Correct,
    Incorrect,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Correct => "correct",
            ReviewOutcome::Incorrect => "incorrect",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "correct" | "c" | "yes" | "y" | "pass" | "1" => Some(ReviewOutcome::Correct),
            "incorrect" | "i" | "no" | "n" | "fail" | "0" => Some(ReviewOutcome::Incorrect),
            _ => None,
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, ReviewOutcome::Correct)
    }

    // Single-character form used for compact history storage
    pub fn as_char(&self) -> char {
        match self {
            ReviewOutcome::Correct => 'c',
            ReviewOutcome::Incorrect => 'i',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' => Some(ReviewOutcome::Correct),
            'i' => Some(ReviewOutcome::Incorrect),
            _ => None,
        }
    }
}

/// Spaced-repetition state of one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub card_id: i64,
    pub ease_factor: f64,
    pub interval_days: u32,
    /// Consecutive correct reviews since the last lapse.
    pub repetitions: u32,
    pub review_count: u32,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub due: DateTime<Utc>,
    pub history: VecDeque<ReviewOutcome>,
}

impl ReviewRecord {
    pub fn new(card_id: i64, now: DateTime<Utc>, policy: &ReviewPolicy) -> Self {
        Self {
            card_id,
            ease_factor: policy.initial_ease,
            interval_days: 0,
            repetitions: 0,
            review_count: 0,
            last_reviewed: None,
            due: now,
            history: VecDeque::new(),
        }
    }

    /// Fraction of correct outcomes in the retained history, 0 when empty.
    pub fn success_rate(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            let correct = self.history.iter().filter(|o| o.is_correct()).count();
            correct as f64 / self.history.len() as f64
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    Learning,
    Developing,
    Proficient,
    Mastered,
}

impl MasteryLevel {
    pub const ALL: [MasteryLevel; 4] = [
        MasteryLevel::Learning,
        MasteryLevel::Developing,
        MasteryLevel::Proficient,
        MasteryLevel::Mastered,
    ];

    pub fn score(&self) -> f64 {
        match self {
            MasteryLevel::Learning => 0.0,
            MasteryLevel::Developing => 33.0,
            MasteryLevel::Proficient => 66.0,
            MasteryLevel::Mastered => 100.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MasteryLevel::Learning => "Learning",
            MasteryLevel::Developing => "Developing",
            MasteryLevel::Proficient => "Proficient",
            MasteryLevel::Mastered => "Mastered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Basic,
    Cloze,
    MultipleChoice,
}

impl CardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardKind::Basic => "basic",
            CardKind::Cloze => "cloze",
            CardKind::MultipleChoice => "multiple_choice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" | "b" => Some(CardKind::Basic),
            "cloze" => Some(CardKind::Cloze),
            "multiple_choice" | "multiple-choice" | "mc" => Some(CardKind::MultipleChoice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub topic_id: i64,
    pub question: String,
    pub answer: String,
    pub kind: CardKind,
    pub tags: Vec<String>,
    pub review: ReviewRecord,
}

/// A named group of cards with cumulative review counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cards: Vec<Card>,
    pub review_count: u64,
    pub correct_count: u64,
}

impl Topic {
    pub fn success_rate(&self) -> f64 {
        if self.review_count == 0 {
            0.0
        } else {
            self.correct_count as f64 / self.review_count as f64
        }
    }

    pub fn card(&self, card_id: i64) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    /// Review one child card, returning the topic with the card record and
    /// the topic counters updated together.
    pub fn apply_review(
        &self,
        card_id: i64,
        outcome: ReviewOutcome,
        latency: Option<std::time::Duration>,
        now: DateTime<Utc>,
        policy: &ReviewPolicy,
    ) -> Result<Topic> {
        let idx = self
            .cards
            .iter()
            .position(|c| c.id == card_id)
            .ok_or(PlanError::CardNotFound(card_id))?;

        let updated = crate::review::record_review(
            &self.cards[idx].review,
            outcome,
            latency,
            now,
            policy,
        )?;

        let mut topic = self.clone();
        topic.cards[idx].review = updated;
        topic.review_count += 1;
        if outcome.is_correct() {
            topic.correct_count += 1;
        }
        Ok(topic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Review,
    Quiz,
    NewContent,
    CatchUp,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Review => "review",
            SessionType::Quiz => "quiz",
            SessionType::NewContent => "new_content",
            SessionType::CatchUp => "catch_up",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "review" => Some(SessionType::Review),
            "quiz" => Some(SessionType::Quiz),
            "new_content" | "newcontent" | "new" => Some(SessionType::NewContent),
            "catch_up" | "catchup" => Some(SessionType::CatchUp),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionType::Review => "Review",
            SessionType::Quiz => "Quiz",
            SessionType::NewContent => "New content",
            SessionType::CatchUp => "Catch-up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub topic_id: i64,
    pub duration_minutes: u32,
    pub planned_cards: u32,
    pub session_type: SessionType,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub cards_reviewed: Option<u32>,
    /// Set on sessions inserted by a recalculation.
    pub recalculation_tag: Option<DateTime<Utc>>,
}

impl StudySession {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn overlaps(&self, start: DateTime<Utc>, minutes: u32) -> bool {
        let end = start + chrono::Duration::minutes(i64::from(minutes));
        self.scheduled_at < end && start < self.ends_at()
    }

    /// Not completed and not over yet. A session that has started but not
    /// ended still counts as capacity; once it ends unattended it is missed.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.ends_at() > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyPlan {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub target_date: DateTime<Utc>,
    pub target_mastery: f64,
    /// Aggregate mastery when the plan was generated.
    pub initial_mastery: f64,
    /// Cached; recomputed from card state on every recalculation.
    pub current_mastery: f64,
    pub topic_ids: BTreeSet<i64>,
    pub sessions: Vec<StudySession>,
    pub is_active: bool,
    pub last_recalculated_at: Option<DateTime<Utc>>,
}

impl StudyPlan {
    pub fn session(&self, id: Uuid) -> Option<&StudySession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn completed_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.completed).count()
    }
}

/// One row of the review log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLogEntry {
    pub card_id: i64,
    pub topic_id: i64,
    pub outcome: ReviewOutcome,
    pub latency_ms: Option<u64>,
    pub reviewed_at: DateTime<Utc>,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
