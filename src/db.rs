use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use uuid::Uuid;

use crate::config::ReviewPolicy;
use crate::models::{
    Card, CardKind, ReviewLogEntry, ReviewOutcome, ReviewRecord, SessionType, StudyPlan,
    StudySession, Topic,
};

pub struct Database {
    conn: Connection,
}

/// A card as it arrives from the content source.
#[derive(Debug, Clone)]
pub struct NewCard<'a> {
    pub question: &'a str,
    pub answer: &'a str,
    pub kind: CardKind,
    pub tags: &'a [String],
}

const CARD_COLUMNS: &str = r#"
    c.id, c.topic_id, c.question, c.answer, c.kind,
    c.ease_factor, c.interval_days, c.repetitions, c.review_count,
    c.last_reviewed, c.due, c.history
"#;

const SESSION_COLUMNS: &str = r#"
    id, scheduled_at, topic_id, duration_minutes, planned_cards, session_type,
    completed, completed_at, cards_reviewed, recalculation_tag
"#;

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                review_count INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'basic' CHECK(kind IN ('basic', 'cloze', 'multiple_choice')),
                ease_factor REAL NOT NULL,
                interval_days INTEGER NOT NULL DEFAULT 0,
                repetitions INTEGER NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                last_reviewed TEXT,
                due TEXT NOT NULL,
                -- one character per outcome, oldest first: 'c' correct, 'i' incorrect
                history TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS card_tags (
                card_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (card_id, tag_id),
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS review_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                card_id INTEGER NOT NULL,
                topic_id INTEGER NOT NULL,
                outcome TEXT NOT NULL CHECK(outcome IN ('correct', 'incorrect')),
                latency_ms INTEGER,
                reviewed_at TEXT NOT NULL,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE,
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS plans (
                id BLOB PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                target_date TEXT NOT NULL,
                target_mastery REAL NOT NULL,
                initial_mastery REAL NOT NULL,
                current_mastery REAL NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_recalculated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS plan_topics (
                plan_id BLOB NOT NULL,
                topic_id INTEGER NOT NULL,
                PRIMARY KEY (plan_id, topic_id),
                FOREIGN KEY (plan_id) REFERENCES plans(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS study_sessions (
                id BLOB PRIMARY KEY,
                plan_id BLOB NOT NULL,
                scheduled_at TEXT NOT NULL,
                topic_id INTEGER NOT NULL,
                duration_minutes INTEGER NOT NULL,
                planned_cards INTEGER NOT NULL,
                session_type TEXT NOT NULL CHECK(session_type IN ('review', 'quiz', 'new_content', 'catch_up')),
                completed INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                cards_reviewed INTEGER,
                recalculation_tag TEXT,
                FOREIGN KEY (plan_id) REFERENCES plans(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_cards_topic ON cards(topic_id);
            CREATE INDEX IF NOT EXISTS idx_cards_due ON cards(due);
            CREATE INDEX IF NOT EXISTS idx_card_tags_card ON card_tags(card_id);
            CREATE INDEX IF NOT EXISTS idx_card_tags_tag ON card_tags(tag_id);
            CREATE INDEX IF NOT EXISTS idx_review_history_reviewed ON review_history(reviewed_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_plan ON study_sessions(plan_id);
            CREATE INDEX IF NOT EXISTS idx_plans_active ON plans(is_active);
            "#,
        )?;

        Ok(())
    }

    // Topic operations
    pub fn add_topic(&self, name: &str, description: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO topics (name, description) VALUES (?1, ?2)",
            params![name, description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// A topic with all of its cards.
    pub fn get_topic(&self, id: i64) -> Result<Option<Topic>> {
        let topic = self
            .conn
            .query_row(
                "SELECT id, name, description, review_count, correct_count FROM topics WHERE id = ?1",
                params![id],
                topic_from_row,
            )
            .optional()?;

        match topic {
            Some(mut t) => {
                t.cards = self.list_cards(Some(id), None)?;
                Ok(Some(t))
            }
            None => Ok(None),
        }
    }

    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, review_count, correct_count FROM topics ORDER BY name",
        )?;
        let mut topics = stmt
            .query_map([], topic_from_row)?
            .collect::<Result<Vec<_>>>()?;

        for topic in &mut topics {
            topic.cards = self.list_cards(Some(topic.id), None)?;
        }

        Ok(topics)
    }

    pub fn delete_topic(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM topics WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Card operations
    pub fn add_card(
        &self,
        topic_id: i64,
        card: &NewCard,
        now: DateTime<Utc>,
        policy: &ReviewPolicy,
    ) -> Result<i64> {
        let record = ReviewRecord::new(0, now, policy);
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO cards (topic_id, question, answer, kind, ease_factor, interval_days, due)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                topic_id,
                card.question,
                card.answer,
                card.kind.as_str(),
                record.ease_factor,
                record.interval_days,
                record.due
            ],
        )?;
        let card_id = tx.last_insert_rowid();

        for tag in card.tags {
            let tag_id = self.get_or_create_tag(tag)?;
            tx.execute(
                "INSERT OR IGNORE INTO card_tags (card_id, tag_id) VALUES (?1, ?2)",
                params![card_id, tag_id],
            )?;
        }

        tx.commit()?;
        Ok(card_id)
    }

    pub fn get_card(&self, id: i64) -> Result<Option<Card>> {
        let sql = format!("SELECT {CARD_COLUMNS} FROM cards c WHERE c.id = ?1");
        let card = self
            .conn
            .query_row(&sql, params![id], card_from_row)
            .optional()?;

        match card {
            Some(mut c) => {
                c.tags = self.get_card_tags(c.id)?;
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    /// Cards, optionally narrowed to one topic and/or one tag.
    pub fn list_cards(&self, topic_id: Option<i64>, tag_filter: Option<&str>) -> Result<Vec<Card>> {
        let sql = format!(
            r#"
            SELECT {CARD_COLUMNS}
            FROM cards c
            WHERE (?1 IS NULL OR c.topic_id = ?1)
              AND (?2 IS NULL OR EXISTS (
                    SELECT 1 FROM card_tags ct
                    JOIN tags tg ON ct.tag_id = tg.id
                    WHERE ct.card_id = c.id AND tg.name = ?2))
            ORDER BY c.id
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut cards = stmt
            .query_map(params![topic_id, tag_filter], card_from_row)?
            .collect::<Result<Vec<_>>>()?;

        for card in &mut cards {
            card.tags = self.get_card_tags(card.id)?;
        }

        Ok(cards)
    }

    fn get_or_create_tag(&self, name: &str) -> Result<i64> {
        let existing = self
            .conn
            .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;

        match existing {
            Some(id) => Ok(id),
            None => {
                self.conn
                    .execute("INSERT INTO tags (name) VALUES (?1)", params![name])?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    fn get_card_tags(&self, card_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT tg.name FROM tags tg
            JOIN card_tags ct ON tg.id = ct.tag_id
            WHERE ct.card_id = ?1
            ORDER BY tg.name
            "#,
        )?;
        let rows = stmt.query_map(params![card_id], |row| row.get(0))?;
        rows.collect()
    }

    // Review operations

    /// Persist a reviewed card, its topic counters and the log row together.
    /// `topic` is the aggregate returned by `Topic::apply_review`.
    pub fn save_review(
        &self,
        topic: &Topic,
        card_id: i64,
        outcome: ReviewOutcome,
        latency_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let card = topic
            .card(card_id)
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        let r = &card.review;
        let history: String = r.history.iter().map(|o| o.as_char()).collect();

        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            UPDATE cards
            SET ease_factor = ?1,
                interval_days = ?2,
                repetitions = ?3,
                review_count = ?4,
                last_reviewed = ?5,
                due = ?6,
                history = ?7
            WHERE id = ?8
            "#,
            params![
                r.ease_factor,
                r.interval_days,
                r.repetitions,
                r.review_count,
                r.last_reviewed,
                r.due,
                history,
                card_id
            ],
        )?;

        tx.execute(
            "UPDATE topics SET review_count = ?1, correct_count = ?2 WHERE id = ?3",
            params![topic.review_count as i64, topic.correct_count as i64, topic.id],
        )?;

        tx.execute(
            r#"
            INSERT INTO review_history (card_id, topic_id, outcome, latency_ms, reviewed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                card_id,
                topic.id,
                outcome.as_str(),
                latency_ms.map(|ms| ms as i64),
                now
            ],
        )?;

        tx.commit()
    }

    pub fn review_log(&self, topic_id: Option<i64>) -> Result<Vec<ReviewLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT card_id, topic_id, outcome, latency_ms, reviewed_at
            FROM review_history
            WHERE (?1 IS NULL OR topic_id = ?1)
            ORDER BY reviewed_at, id
            "#,
        )?;

        let rows = stmt.query_map(params![topic_id], |row| {
            let outcome: String = row.get(2)?;
            let latency: Option<i64> = row.get(3)?;
            Ok(ReviewLogEntry {
                card_id: row.get(0)?,
                topic_id: row.get(1)?,
                outcome: parse_column(2, &outcome, ReviewOutcome::from_str(&outcome))?,
                latency_ms: latency.map(|ms| ms.max(0) as u64),
                reviewed_at: row.get(4)?,
            })
        })?;

        rows.collect()
    }

    // Plan operations

    /// Insert or replace a plan together with its topic set and sessions.
    pub fn save_plan(&self, plan: &StudyPlan) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO plans (id, title, created_at, target_date, target_mastery,
                               initial_mastery, current_mastery, is_active, last_recalculated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                target_date = excluded.target_date,
                target_mastery = excluded.target_mastery,
                current_mastery = excluded.current_mastery,
                is_active = excluded.is_active,
                last_recalculated_at = excluded.last_recalculated_at
            "#,
            params![
                plan.id,
                plan.title,
                plan.created_at,
                plan.target_date,
                plan.target_mastery,
                plan.initial_mastery,
                plan.current_mastery,
                plan.is_active,
                plan.last_recalculated_at
            ],
        )?;

        tx.execute("DELETE FROM plan_topics WHERE plan_id = ?1", params![plan.id])?;
        for topic_id in &plan.topic_ids {
            tx.execute(
                "INSERT INTO plan_topics (plan_id, topic_id) VALUES (?1, ?2)",
                params![plan.id, topic_id],
            )?;
        }

        tx.execute("DELETE FROM study_sessions WHERE plan_id = ?1", params![plan.id])?;
        for s in &plan.sessions {
            tx.execute(
                r#"
                INSERT INTO study_sessions (id, plan_id, scheduled_at, topic_id, duration_minutes,
                    planned_cards, session_type, completed, completed_at, cards_reviewed,
                    recalculation_tag)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    s.id,
                    plan.id,
                    s.scheduled_at,
                    s.topic_id,
                    s.duration_minutes,
                    s.planned_cards,
                    s.session_type.as_str(),
                    s.completed,
                    s.completed_at,
                    s.cards_reviewed,
                    s.recalculation_tag
                ],
            )?;
        }

        tx.commit()
    }

    pub fn get_plan(&self, id: Uuid) -> Result<Option<StudyPlan>> {
        let plan = self
            .conn
            .query_row(
                r#"
                SELECT id, title, created_at, target_date, target_mastery, initial_mastery,
                       current_mastery, is_active, last_recalculated_at
                FROM plans WHERE id = ?1
                "#,
                params![id],
                plan_from_row,
            )
            .optional()?;

        match plan {
            Some(mut p) => {
                self.load_plan_children(&mut p)?;
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    /// Plans, newest first.
    pub fn list_plans(&self, active_only: bool) -> Result<Vec<StudyPlan>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, title, created_at, target_date, target_mastery, initial_mastery,
                   current_mastery, is_active, last_recalculated_at
            FROM plans
            WHERE (?1 = 0 OR is_active = 1)
            ORDER BY created_at DESC
            "#,
        )?;
        let mut plans = stmt
            .query_map(params![active_only], plan_from_row)?
            .collect::<Result<Vec<_>>>()?;

        for plan in &mut plans {
            self.load_plan_children(plan)?;
        }

        Ok(plans)
    }

    pub fn delete_plan(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM plans WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn load_plan_children(&self, plan: &mut StudyPlan) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT topic_id FROM plan_topics WHERE plan_id = ?1")?;
        plan.topic_ids = stmt
            .query_map(params![plan.id], |row| row.get(0))?
            .collect::<Result<BTreeSet<i64>>>()?;

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions WHERE plan_id = ?1 ORDER BY scheduled_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        plan.sessions = stmt
            .query_map(params![plan.id], session_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(())
    }
}

fn parse_column<T>(idx: usize, raw: &str, parsed: Option<T>) -> Result<T> {
    parsed.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unexpected value {raw:?}").into())
    })
}

fn topic_from_row(row: &Row) -> Result<Topic> {
    let review_count: i64 = row.get(3)?;
    let correct_count: i64 = row.get(4)?;
    Ok(Topic {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        cards: vec![],
        review_count: review_count.max(0) as u64,
        correct_count: correct_count.max(0) as u64,
    })
}

fn card_from_row(row: &Row) -> Result<Card> {
    let id: i64 = row.get(0)?;
    let kind: String = row.get(4)?;
    let history_str: String = row.get(11)?;
    let history = history_str
        .chars()
        .map(|c| parse_column(11, &history_str, ReviewOutcome::from_char(c)))
        .collect::<Result<VecDeque<_>>>()?;

    Ok(Card {
        id,
        topic_id: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        kind: parse_column(4, &kind, CardKind::from_str(&kind))?,
        tags: vec![],
        review: ReviewRecord {
            card_id: id,
            ease_factor: row.get(5)?,
            interval_days: row.get(6)?,
            repetitions: row.get(7)?,
            review_count: row.get(8)?,
            last_reviewed: row.get(9)?,
            due: row.get(10)?,
            history,
        },
    })
}

fn plan_from_row(row: &Row) -> Result<StudyPlan> {
    Ok(StudyPlan {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        target_date: row.get(3)?,
        target_mastery: row.get(4)?,
        initial_mastery: row.get(5)?,
        current_mastery: row.get(6)?,
        topic_ids: BTreeSet::new(),
        sessions: vec![],
        is_active: row.get(7)?,
        last_recalculated_at: row.get(8)?,
    })
}

fn session_from_row(row: &Row) -> Result<StudySession> {
    let session_type: String = row.get(5)?;
    Ok(StudySession {
        id: row.get(0)?,
        scheduled_at: row.get(1)?,
        topic_id: row.get(2)?,
        duration_minutes: row.get(3)?,
        planned_cards: row.get(4)?,
        session_type: parse_column(5, &session_type, SessionType::from_str(&session_type))?,
        completed: row.get(6)?,
        completed_at: row.get(7)?,
        cards_reviewed: row.get(8)?,
        recalculation_tag: row.get(9)?,
    })
}
