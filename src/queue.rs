use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::MasteryThresholds;
use crate::mastery::classify;
use crate::models::{Card, MasteryLevel, Topic};

/// Cards due at `now`, most overdue first.
pub fn due_cards(topics: &[Topic], now: DateTime<Utc>) -> Vec<&Card> {
    let mut due: Vec<&Card> = topics
        .iter()
        .flat_map(|t| t.cards.iter())
        .filter(|c| c.review.is_due(now))
        .collect();
    due.sort_by_key(|c| (c.review.due, c.id));
    due
}

// Weaker and more overdue cards are picked more often.
fn weight(card: &Card, now: DateTime<Utc>, t: &MasteryThresholds) -> f64 {
    let overdue_days = (now - card.review.due).num_days().max(0) as f64 + 1.0;
    let mastery_weight = match classify(&card.review, t) {
        MasteryLevel::Learning => 4.0,
        MasteryLevel::Developing => 3.0,
        MasteryLevel::Proficient => 2.0,
        MasteryLevel::Mastered => 1.0,
    };
    overdue_days * mastery_weight
}

/// Stochastic choice of the next card to review among those due.
pub fn pick_next<'a, R: Rng + ?Sized>(
    topics: &'a [Topic],
    now: DateTime<Utc>,
    t: &MasteryThresholds,
    rng: &mut R,
) -> Option<&'a Card> {
    let due = due_cards(topics, now);
    if due.is_empty() {
        return None;
    }

    let weights: Vec<f64> = due.iter().map(|c| weight(c, now, t)).collect();
    let total: f64 = weights.iter().sum();
    let mut point = rng.gen::<f64>() * total;

    for (card, w) in due.iter().zip(&weights) {
        point -= w;
        if point <= 0.0 {
            return Some(card);
        }
    }

    due.first().copied()
}
