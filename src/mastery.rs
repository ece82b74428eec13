use crate::config::MasteryThresholds;
use crate::models::{Card, MasteryLevel, ReviewRecord, Topic};

/// Derive the mastery level of a card from its review record.
///
/// Lower band bounds are inclusive; anything short of a bound falls to the
/// less confident level.
pub fn classify(record: &ReviewRecord, t: &MasteryThresholds) -> MasteryLevel {
    let rate = record.success_rate();

    if record.review_count < t.min_reviews || rate < t.developing_rate {
        MasteryLevel::Learning
    } else if rate < t.proficient_rate {
        MasteryLevel::Developing
    } else if rate < t.mastered_rate || record.review_count < t.mastered_min_reviews {
        MasteryLevel::Proficient
    } else {
        MasteryLevel::Mastered
    }
}

pub fn card_score(card: &Card, t: &MasteryThresholds) -> f64 {
    classify(&card.review, t).score()
}

/// Mean mastery score of a topic's cards; 0 for an empty topic.
pub fn topic_mastery(topic: &Topic, t: &MasteryThresholds) -> f64 {
    if topic.cards.is_empty() {
        return 0.0;
    }
    let total: f64 = topic.cards.iter().map(|c| card_score(c, t)).sum();
    total / topic.cards.len() as f64
}

/// Card-count-weighted mean of topic mastery across several topics.
pub fn aggregate_mastery<'a, I>(topics: I, t: &MasteryThresholds) -> f64
where
    I: IntoIterator<Item = &'a Topic>,
{
    let (sum, count) = topics
        .into_iter()
        .flat_map(|topic| topic.cards.iter())
        .fold((0.0, 0usize), |(sum, n), card| (sum + card_score(card, t), n + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Cards whose mastery score is below the target.
pub fn deficit_cards<'a>(
    topic: &'a Topic,
    target_mastery: f64,
    t: &'a MasteryThresholds,
) -> impl Iterator<Item = &'a Card> + 'a {
    topic
        .cards
        .iter()
        .filter(move |c| card_score(c, t) < target_mastery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewPolicy;
    use crate::models::{CardKind, ReviewOutcome};
    use chrono::{TimeZone, Utc};

    fn record_with(correct: usize, incorrect: usize, review_count: u32) -> ReviewRecord {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let mut r = ReviewRecord::new(1, now, &ReviewPolicy::default());
        r.history.extend(std::iter::repeat(ReviewOutcome::Correct).take(correct));
        r.history.extend(std::iter::repeat(ReviewOutcome::Incorrect).take(incorrect));
        r.review_count = review_count;
        r
    }

    fn card_with(id: i64, record: ReviewRecord) -> Card {
        Card {
            id,
            topic_id: 1,
            question: String::new(),
            answer: String::new(),
            kind: CardKind::Basic,
            tags: vec![],
            review: record,
        }
    }

    mod classify_tests {
        use super::*;

        fn level(correct: usize, incorrect: usize, count: u32) -> MasteryLevel {
            classify(&record_with(correct, incorrect, count), &MasteryThresholds::default())
        }

        #[test]
        fn too_few_reviews_is_learning() {
            assert_eq!(level(2, 0, 2), MasteryLevel::Learning);
            assert_eq!(level(0, 0, 0), MasteryLevel::Learning);
        }

        #[test]
        fn low_rate_is_learning() {
            assert_eq!(level(2, 3, 5), MasteryLevel::Learning);
        }

        #[test]
        fn rate_exactly_half_is_developing() {
            assert_eq!(level(2, 2, 4), MasteryLevel::Developing);
        }

        #[test]
        fn rate_just_below_three_quarters_is_developing() {
            assert_eq!(level(5, 2, 7), MasteryLevel::Developing);
        }

        #[test]
        fn rate_exactly_three_quarters_is_proficient() {
            assert_eq!(level(3, 1, 4), MasteryLevel::Proficient);
            assert_eq!(level(3, 1, 8), MasteryLevel::Proficient);
        }

        #[test]
        fn rate_exactly_nine_tenths_with_enough_reviews_is_mastered() {
            assert_eq!(level(9, 1, 10), MasteryLevel::Mastered);
        }

        #[test]
        fn high_rate_with_few_reviews_is_proficient() {
            assert_eq!(level(4, 0, 4), MasteryLevel::Proficient);
            assert_eq!(level(3, 0, 3), MasteryLevel::Proficient);
        }

        #[test]
        fn high_rate_with_five_reviews_is_mastered() {
            assert_eq!(level(5, 0, 5), MasteryLevel::Mastered);
        }

        #[test]
        fn custom_thresholds_are_respected() {
            let t = MasteryThresholds {
                mastered_rate: 0.95,
                ..MasteryThresholds::default()
            };
            assert_eq!(classify(&record_with(9, 1, 10), &t), MasteryLevel::Proficient);
        }
    }

    mod aggregate_tests {
        use super::*;

        fn topic(id: i64, cards: Vec<Card>) -> Topic {
            Topic {
                id,
                name: format!("T{id}"),
                description: None,
                cards,
                review_count: 0,
                correct_count: 0,
            }
        }

        #[test]
        fn empty_topic_scores_zero() {
            let t = MasteryThresholds::default();
            assert_eq!(topic_mastery(&topic(1, vec![]), &t), 0.0);
            assert_eq!(aggregate_mastery(&[], &t), 0.0);
        }

        #[test]
        fn topic_mastery_is_mean_of_card_scores() {
            let t = MasteryThresholds::default();
            let tp = topic(
                1,
                vec![card_with(1, record_with(5, 0, 5)), card_with(2, record_with(0, 0, 0))],
            );
            assert_eq!(topic_mastery(&tp, &t), 50.0);
        }

        #[test]
        fn aggregate_weights_topics_by_card_count() {
            let t = MasteryThresholds::default();
            let mastered = topic(1, vec![card_with(1, record_with(5, 0, 5))]);
            let learning = topic(
                2,
                (2..5).map(|id| card_with(id, record_with(0, 0, 0))).collect(),
            );
            // 100 + 0 + 0 + 0 over four cards
            assert_eq!(aggregate_mastery([&mastered, &learning], &t), 25.0);
        }

        #[test]
        fn deficit_excludes_cards_at_or_above_target() {
            let t = MasteryThresholds::default();
            let tp = topic(
                1,
                vec![
                    card_with(1, record_with(5, 0, 5)),
                    card_with(2, record_with(3, 1, 4)),
                    card_with(3, record_with(0, 0, 0)),
                ],
            );
            let ids: Vec<i64> = deficit_cards(&tp, 66.0, &t).map(|c| c.id).collect();
            assert_eq!(ids, vec![3]);
            assert_eq!(deficit_cards(&tp, 80.0, &t).count(), 2);
            assert_eq!(deficit_cards(&tp, 0.0, &t).count(), 0);
        }
    }
}
