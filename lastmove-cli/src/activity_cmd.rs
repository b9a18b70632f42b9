use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use lastmove_core::time::parse_rfc3339_utc;
use lastmove_core::urgency::{days_since, urgency_percent};
use lastmove_core::{Frequency, FrequencyUnit};
use lastmove_store::activities;

use crate::state::open_store;

#[derive(Subcommand, Debug)]
pub enum ActivityCommand {
    /// Create a recurring activity
    Add {
        #[arg(long)]
        user: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        category: Option<String>,

        /// daily | weekly | monthly | quarterly | yearly
        #[arg(long, conflicts_with_all = ["every", "unit"])]
        preset: Option<String>,

        /// Custom period length, used with --unit
        #[arg(long, requires = "unit")]
        every: Option<u32>,

        /// days | weeks | months | quarters | years
        #[arg(long, requires = "every")]
        unit: Option<String>,
    },

    /// List a user's activities with their current urgency
    List {
        #[arg(long)]
        user: String,
    },

    /// Record that an activity was done
    Done {
        id: i64,

        /// When it was done (RFC3339, default: now)
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Stop analyzing an activity; history is kept
    Archive { id: i64 },
}

pub fn run(cmd: ActivityCommand) -> Result<()> {
    match cmd {
        ActivityCommand::Add {
            user,
            title,
            category,
            preset,
            every,
            unit,
        } => add(&user, &title, category.as_deref(), preset, every, unit),
        ActivityCommand::List { user } => list(&user),
        ActivityCommand::Done { id, at, notes } => done(id, at, notes),
        ActivityCommand::Archive { id } => archive(id),
    }
}

fn resolve_frequency(
    preset: Option<String>,
    every: Option<u32>,
    unit: Option<String>,
) -> Result<Frequency> {
    match (preset, every, unit) {
        (Some(p), None, None) => Frequency::preset(&p),
        (None, Some(n), Some(u)) => Frequency::custom(n, u.parse::<FrequencyUnit>()?),
        (None, None, None) => bail!("pass --preset or --every N --unit U"),
        _ => bail!("--preset cannot be combined with --every/--unit"),
    }
}

fn add(
    user: &str,
    title: &str,
    category: Option<&str>,
    preset: Option<String>,
    every: Option<u32>,
    unit: Option<String>,
) -> Result<()> {
    let frequency = resolve_frequency(preset, every, unit)?;
    let store = open_store()?;
    let a = activities::create_activity(store.conn(), user, title, category, frequency, Utc::now())
        .context("create activity")?;
    println!(
        "Created activity #{}: {} (every {})",
        a.id,
        a.title,
        a.frequency.text()
    );
    Ok(())
}

fn list(user: &str) -> Result<()> {
    let store = open_store()?;
    let rows = activities::list_activities(store.conn(), user)?;
    if rows.is_empty() {
        println!("No activities for {user}");
        return Ok(());
    }

    let now = Utc::now();
    for a in &rows {
        let last = activities::last_move(store.conn(), a.id)?.map(|m| m.executed_at);
        let urgency = urgency_percent(last, a.frequency.value, a.frequency.unit, now);
        let elapsed = match days_since(last, now) {
            Some(d) => format!("{d}d ago"),
            None => "never".to_string(),
        };
        println!(
            "#{:<4} {:<28} every {:<10} last: {:<9} urgency: {:>5.1}%{}",
            a.id,
            a.title,
            a.frequency.text(),
            elapsed,
            urgency,
            if a.is_active { "" } else { "  [archived]" }
        );
    }
    Ok(())
}

fn done(id: i64, at: Option<String>, notes: Option<String>) -> Result<()> {
    let now = Utc::now();
    let executed_at = match at {
        Some(s) => parse_rfc3339_utc(&s)?,
        None => now,
    };
    if executed_at > now {
        bail!("--at is in the future");
    }
    let store = open_store()?;
    let m = activities::record_move(store.conn(), id, executed_at, notes.as_deref(), now)?;
    println!("Recorded move #{} for activity #{id} at {}", m.id, m.executed_at.to_rfc3339());
    Ok(())
}

fn archive(id: i64) -> Result<()> {
    let store = open_store()?;
    activities::deactivate_activity(store.conn(), id)?;
    println!("Archived activity #{id}");
    Ok(())
}
