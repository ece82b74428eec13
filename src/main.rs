use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration as StdDuration;
use tracing::debug;
use uuid::Uuid;

use mnemo::analytics;
use mnemo::clock::{Clock, SystemClock};
use mnemo::config::Config;
use mnemo::db::{Database, NewCard};
use mnemo::logging::init_tracing;
use mnemo::mastery::{classify, topic_mastery};
use mnemo::models::{CardKind, JsonOutput, ReviewOutcome, StudyPlan, Topic};
use mnemo::queue;
use mnemo::reconciler::{self, Reconciler};
use mnemo::Allocator;

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Spaced repetition reviews and deadline-driven study plans")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage topics
    #[command(subcommand)]
    Topic(TopicCommands),

    /// Manage cards
    #[command(subcommand)]
    Card(CardCommands),

    /// Record a review outcome for a card
    Review {
        /// Card ID
        id: i64,

        /// Review outcome: correct/incorrect
        #[arg(long, short)]
        outcome: String,

        /// Time taken to answer, in milliseconds
        #[arg(long, short)]
        latency_ms: Option<u64>,
    },

    /// Get the next due card (stochastic selection)
    Next {
        /// Only consider cards of this topic
        #[arg(long, short)]
        topic: Option<i64>,
    },

    /// Manage study plans
    #[command(subcommand)]
    Plan(PlanCommands),

    /// Show learning statistics
    Stats,
}

#[derive(Subcommand)]
enum TopicCommands {
    /// List all topics
    List,

    /// Add a new topic
    Add {
        /// Topic name
        name: String,

        /// Topic description
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Show topic details
    Show {
        /// Topic ID
        id: i64,
    },

    /// Delete a topic and its cards
    Delete {
        /// Topic ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum CardCommands {
    /// Add a card to a topic
    Add {
        /// Topic ID
        topic: i64,

        #[arg(long, short)]
        question: String,

        #[arg(long, short)]
        answer: String,

        /// Card kind: basic/cloze/multiple_choice
        #[arg(long, short, default_value = "basic")]
        kind: String,

        /// Comma-separated tags
        #[arg(long, short)]
        tags: Option<String>,
    },

    /// List cards
    List {
        /// Filter by topic
        #[arg(long)]
        topic: Option<i64>,

        /// Filter by tag
        #[arg(long, short)]
        tag: Option<String>,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Generate a study plan toward a target mastery by a date
    Create {
        /// Plan title
        title: String,

        /// Exam date (YYYY-MM-DD or RFC 3339)
        #[arg(long, short = 'd')]
        target_date: String,

        /// Target mastery, 0-100
        #[arg(long, short, default_value_t = 80.0)]
        mastery: f64,

        /// Comma-separated topic IDs (default: all topics)
        #[arg(long, value_delimiter = ',')]
        topics: Vec<i64>,
    },

    /// List plans
    List {
        /// Include archived plans
        #[arg(long, short)]
        all: bool,
    },

    /// Show a plan with its sessions and progress
    Show {
        /// Plan ID
        id: Uuid,
    },

    /// Rebalance a plan against current mastery
    Recalc {
        /// Plan ID
        id: Uuid,
    },

    /// Mark a session as completed
    Complete {
        /// Plan ID
        plan: Uuid,

        /// Session ID
        session: Uuid,

        /// Cards reviewed during the session
        #[arg(long, short)]
        cards: u32,
    },

    /// Archive a plan
    Archive {
        /// Plan ID
        id: Uuid,
    },

    /// Delete a plan and its sessions
    Delete {
        /// Plan ID
        id: Uuid,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log.level);

    let json = cli.json;
    if let Err(e) = run(cli, &config) {
        if json {
            let out = JsonOutput::<()>::err(e.to_string());
            println!("{}", serde_json::to_string(&out).unwrap_or_default());
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = Config::db_path();
    debug!(path = %db_path.display(), "opening database");
    let db = Database::open(&db_path)?;
    let clock = SystemClock;

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Topic(topic_cmd) => match topic_cmd {
            TopicCommands::List => {
                let topics = db.list_topics()?;
                if cli.json {
                    let rows: Vec<_> = topics
                        .iter()
                        .map(|t| {
                            serde_json::json!({
                                "id": t.id,
                                "name": t.name,
                                "cards": t.cards.len(),
                                "mastery": topic_mastery(t, &config.mastery),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string(&JsonOutput::ok(rows))?);
                } else if topics.is_empty() {
                    println!("No topics found.");
                } else {
                    println!("{:<5} {:<40} {:>6} MASTERY", "ID", "NAME", "CARDS");
                    println!("{}", "-".repeat(70));
                    for topic in &topics {
                        println!(
                            "{:<5} {:<40} {:>6} {:.0}%",
                            topic.id,
                            truncate(&topic.name, 38),
                            topic.cards.len(),
                            topic_mastery(topic, &config.mastery)
                        );
                    }
                }
            }

            TopicCommands::Add { name, description } => {
                let id = db.add_topic(&name, description.as_deref())?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name
                        })))?
                    );
                } else {
                    println!("Added topic '{}' with ID: {}", name, id);
                }
            }

            TopicCommands::Show { id } => {
                if let Some(topic) = db.get_topic(id)? {
                    let mastery = topic_mastery(&topic, &config.mastery);
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "topic": topic,
                                "mastery": mastery
                            })))?
                        );
                    } else {
                        print_topic(&topic, mastery, config, clock.now());
                    }
                } else if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Topic not found"))?
                    );
                } else {
                    println!("Topic not found.");
                }
            }

            TopicCommands::Delete { id } => {
                if db.delete_topic(id)? {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Topic {} deleted.", id);
                    }
                } else if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::<()>::err("Topic not found"))?
                    );
                } else {
                    println!("Topic not found.");
                }
            }
        },

        Commands::Card(card_cmd) => match card_cmd {
            CardCommands::Add {
                topic,
                question,
                answer,
                kind,
                tags,
            } => {
                let kind = CardKind::from_str(&kind).ok_or_else(|| {
                    format!("Invalid kind '{}'. Use: basic, cloze, or multiple_choice", kind)
                })?;
                if db.get_topic(topic)?.is_none() {
                    return Err(format!("Topic {} not found", topic).into());
                }
                let tag_list: Vec<String> = tags
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default();

                let card = NewCard {
                    question: &question,
                    answer: &answer,
                    kind,
                    tags: &tag_list,
                };
                let id = db.add_card(topic, &card, clock.now(), &config.review)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({ "id": id })))?
                    );
                } else {
                    println!("Added card {} to topic {}.", id, topic);
                }
            }

            CardCommands::List { topic, tag } => {
                let cards = db.list_cards(topic, tag.as_deref())?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&cards))?);
                } else if cards.is_empty() {
                    println!("No cards found.");
                } else {
                    println!("{:<6} {:<6} {:<44} {:<12} DUE", "ID", "TOPIC", "QUESTION", "MASTERY");
                    println!("{}", "-".repeat(90));
                    for card in &cards {
                        println!(
                            "{:<6} {:<6} {:<44} {:<12} {}",
                            card.id,
                            card.topic_id,
                            truncate(&card.question, 42),
                            classify(&card.review, &config.mastery).label(),
                            card.review.due.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
            }
        },

        Commands::Review {
            id,
            outcome,
            latency_ms,
        } => {
            let review_outcome = ReviewOutcome::from_str(&outcome).ok_or_else(|| {
                format!("Invalid outcome '{}'. Use: correct or incorrect", outcome)
            })?;

            let card = db
                .get_card(id)?
                .ok_or_else(|| format!("Card {} not found", id))?;
            let topic = db
                .get_topic(card.topic_id)?
                .ok_or_else(|| format!("Topic {} not found", card.topic_id))?;

            let now = clock.now();
            let latency = latency_ms.map(StdDuration::from_millis);
            let updated = topic.apply_review(id, review_outcome, latency, now, &config.review)?;
            db.save_review(&updated, id, review_outcome, latency_ms, now)?;

            let record = updated
                .card(id)
                .map(|c| c.review.clone())
                .ok_or_else(|| format!("Card {} not found", id))?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&record))?);
            } else {
                println!("Review recorded for card {}.", id);
                println!(
                    "Mastery: {} (ease {:.2})",
                    classify(&record, &config.mastery).label(),
                    record.ease_factor
                );
                println!(
                    "Next review in {} day(s): {}",
                    record.interval_days,
                    record.due.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Next { topic } => {
            let topics: Vec<Topic> = db
                .list_topics()?
                .into_iter()
                .filter(|t| topic.map_or(true, |id| t.id == id))
                .collect();
            let mut rng = rand::thread_rng();

            if let Some(card) = queue::pick_next(&topics, clock.now(), &config.mastery, &mut rng) {
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(card))?);
                } else {
                    println!("=== Next Card to Review ===");
                    println!();
                    println!("Card {} (topic {})", card.id, card.topic_id);
                    println!("Q: {}", card.question);
                    println!();
                    println!(
                        "Current mastery: {}",
                        classify(&card.review, &config.mastery).label()
                    );
                    println!();
                    println!("After answering, record the outcome with:");
                    println!("  mnemo review {} --outcome <correct|incorrect>", card.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Nothing due for review.");
            }
        }

        Commands::Plan(plan_cmd) => {
            let reconciler = Reconciler::new(
                &config.planner,
                &config.mastery,
                &config.reconciler,
                &clock,
            );

            match plan_cmd {
                PlanCommands::Create {
                    title,
                    target_date,
                    mastery,
                    topics,
                } => {
                    let target = parse_target_date(&target_date)?;
                    let selected: Vec<Topic> = db
                        .list_topics()?
                        .into_iter()
                        .filter(|t| topics.is_empty() || topics.contains(&t.id))
                        .collect();
                    if selected.is_empty() {
                        return Err("No topics to plan for. Add some topics first!".into());
                    }

                    let allocator = Allocator::new(&config.planner, &config.mastery, &clock);
                    let plan = allocator.generate_plan(&title, &selected, target, mastery)?;
                    db.save_plan(&plan)?;

                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&plan))?);
                    } else {
                        println!(
                            "Created plan '{}' ({}) with {} sessions.",
                            plan.title,
                            plan.id,
                            plan.sessions.len()
                        );
                    }
                }

                PlanCommands::List { all } => {
                    let plans = db.list_plans(!all)?;
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&plans))?);
                    } else if plans.is_empty() {
                        println!("No plans found.");
                    } else {
                        println!("{:<36}  {:<24} {:<10} {:>8} STATUS", "ID", "TITLE", "TARGET", "MASTERY");
                        println!("{}", "-".repeat(96));
                        for plan in &plans {
                            println!(
                                "{:<36}  {:<24} {:<10} {:>7.0}% {}",
                                plan.id,
                                truncate(&plan.title, 22),
                                plan.target_date.format("%Y-%m-%d"),
                                plan.current_mastery,
                                if plan.is_active { "active" } else { "archived" }
                            );
                        }
                    }
                }

                PlanCommands::Show { id } => {
                    let plan = load_plan(&db, id)?;
                    let topics = db.list_topics()?;
                    let progress = reconciler.progress(&plan, &topics);

                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "plan": plan,
                                "progress": progress
                            })))?
                        );
                    } else {
                        print_plan(&plan, &topics);
                        println!();
                        println!(
                            "Mastery: {:.1}% now, {:.1}% expected ({})",
                            progress.current_mastery,
                            progress.expected_mastery,
                            if progress.on_track { "on track" } else { "behind" }
                        );
                        println!(
                            "Sessions: {} done, {} remaining, {} missed; {} day(s) left",
                            progress.completed_sessions,
                            progress.remaining_sessions,
                            progress.missed_sessions,
                            progress.days_remaining
                        );
                    }
                }

                PlanCommands::Recalc { id } => {
                    let plan = load_plan(&db, id)?;
                    let topics = db.list_topics()?;
                    let updated = reconciler.recalculate(&plan, &topics)?;
                    db.save_plan(&updated)?;

                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&updated))?);
                    } else if !updated.is_active {
                        println!("Target date has passed; plan archived.");
                    } else {
                        let added = updated.sessions.len() as i64 - plan.sessions.len() as i64;
                        println!(
                            "Plan recalculated: mastery {:.1}%, {} session(s) ({:+}).",
                            updated.current_mastery,
                            updated.sessions.len(),
                            added
                        );
                    }
                }

                PlanCommands::Complete {
                    plan,
                    session,
                    cards,
                } => {
                    let current = load_plan(&db, plan)?;
                    let updated = reconciler.complete_session(&current, session, cards)?;
                    db.save_plan(&updated)?;

                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Session {} completed ({} cards).", session, cards);
                    }
                }

                PlanCommands::Archive { id } => {
                    let plan = load_plan(&db, id)?;
                    db.save_plan(&reconciler::archive(&plan))?;

                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Plan {} archived.", id);
                    }
                }

                PlanCommands::Delete { id } => {
                    if db.delete_plan(id)? {
                        if cli.json {
                            println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                        } else {
                            println!("Plan {} deleted.", id);
                        }
                    } else if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::<()>::err("Plan not found"))?
                        );
                    } else {
                        println!("Plan not found.");
                    }
                }
            }
        }

        Commands::Stats => {
            let topics = db.list_topics()?;
            let log = db.review_log(None)?;
            let sessions: Vec<_> = db
                .list_plans(false)?
                .into_iter()
                .flat_map(|p| p.sessions)
                .collect();
            let stats = analytics::summarize(&topics, &log, &sessions, clock.now(), &config.mastery);

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Learning Statistics ===");
                println!("Topics: {}  Cards: {}", stats.total_topics, stats.total_cards);
                println!("Due for review: {}", stats.due_now);
                println!("Total reviews: {}", stats.total_reviews);
                println!("Current streak: {} day(s)", stats.current_streak);
                println!(
                    "Accuracy: {:.0}% overall, {:.0}% this week",
                    stats.overall_accuracy * 100.0,
                    stats.weekly_accuracy * 100.0
                );
                println!("Average mastery: {:.1}%", stats.average_mastery);
                for (level, count) in &stats.mastery_histogram {
                    println!("  {:<12} {}", level.label(), count);
                }
                println!(
                    "Last 7 days: {}",
                    stats
                        .daily_reviews
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                println!(
                    "Studied this week: {} session(s), {} min",
                    stats.study_time.sessions, stats.study_time.minutes
                );
            }
        }
    }

    Ok(())
}

fn load_plan(db: &Database, id: Uuid) -> Result<StudyPlan, Box<dyn std::error::Error>> {
    Ok(db
        .get_plan(id)?
        .ok_or_else(|| format!("Plan {} not found", id))?)
}

/// Accepts a calendar date (midnight UTC) or a full RFC 3339 timestamp.
fn parse_target_date(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD or RFC 3339", s))
}

fn print_topic(topic: &Topic, mastery: f64, config: &Config, now: DateTime<Utc>) {
    println!("Topic: {}", topic.name);
    println!("ID: {}", topic.id);
    if let Some(desc) = &topic.description {
        println!("Description: {}", desc);
    }
    println!();
    println!("--- Progress ---");
    println!("Mastery: {:.0}%", mastery);
    println!(
        "Reviews: {} ({:.0}% success rate)",
        topic.review_count,
        topic.success_rate() * 100.0
    );
    let due = topic.cards.iter().filter(|c| c.review.is_due(now)).count();
    println!("Cards: {} ({} due)", topic.cards.len(), due);
    let histogram = analytics::mastery_histogram(topic.cards.iter().map(|c| &c.review), &config.mastery);
    for (level, count) in histogram {
        println!("  {:<12} {}", level.label(), count);
    }
}

fn print_plan(plan: &StudyPlan, topics: &[Topic]) {
    println!("Plan: {} ({})", plan.title, plan.id);
    println!(
        "Target: {:.0}% by {}",
        plan.target_mastery,
        plan.target_date.format("%Y-%m-%d %H:%M")
    );
    println!("Status: {}", if plan.is_active { "active" } else { "archived" });
    println!();
    println!("{:<36}  {:<16} {:<20} {:<10} {:>5} STATUS", "SESSION", "WHEN", "TOPIC", "TYPE", "CARDS");
    println!("{}", "-".repeat(104));
    for s in &plan.sessions {
        let topic_name = topics
            .iter()
            .find(|t| t.id == s.topic_id)
            .map(|t| t.name.as_str())
            .unwrap_or("?");
        println!(
            "{:<36}  {:<16} {:<20} {:<10} {:>5} {}",
            s.id,
            s.scheduled_at.format("%Y-%m-%d %H:%M"),
            truncate(topic_name, 18),
            s.session_type.label(),
            s.planned_cards,
            if s.completed { "done" } else { "" }
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
