use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use lastmove_core::time::parse_rfc3339_utc;
use lastmove_core::{run_check, run_manual, EngagementPasses, NotificationStore, PassSummary, Priority};
use lastmove_push::{DispatchError, DispatchSummary, Dispatcher, GatewayTransport, ImmediateMessage};
use lastmove_store::{notifications, SqliteStore};

use crate::config::{load_config, Config};
use crate::state::open_store;

#[derive(Subcommand, Debug)]
pub enum NotifyCommand {
    /// Analyze if now is a regular check time, then dispatch
    Check {
        /// Pretend the current time is this RFC3339 instant
        #[arg(long)]
        now: Option<String>,
    },

    /// Analyze regardless of the time of day, then dispatch
    Trigger,

    /// Queue long-inactive nudges and streak celebrations, then dispatch
    Engage,

    /// Deliver due notifications
    Dispatch {
        /// List what would be sent; nothing is claimed
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Max records in one run (default from config push.batch_limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Local time, regular-time flag and queue size
    Status,

    /// Delivery statistics for one user over the last 30 days
    Stats {
        #[arg(long)]
        user: String,
    },

    /// Record that a delivered notification was opened
    Clicked {
        #[arg(long)]
        id: i64,
    },

    /// Push a one-off message to a user right away
    Send {
        #[arg(long)]
        user: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        body: String,

        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
}

pub async fn run(cmd: NotifyCommand) -> Result<()> {
    let cfg = load_config()?;
    let store = open_store()?;
    match cmd {
        NotifyCommand::Check { now } => {
            let now = match now {
                Some(s) => parse_rfc3339_utc(&s)?,
                None => Utc::now(),
            };
            check_and_dispatch(&cfg, &store, &dispatcher(&cfg, None)?, now).await
        }
        NotifyCommand::Trigger => trigger(&cfg, &store).await,
        NotifyCommand::Engage => engage(&cfg, &store).await,
        NotifyCommand::Dispatch { dry_run, limit } => dispatch(&cfg, &store, dry_run, limit).await,
        NotifyCommand::Status => status(&cfg, &store),
        NotifyCommand::Stats { user } => stats(&store, &user),
        NotifyCommand::Clicked { id } => {
            notifications::mark_clicked(store.conn(), id, Utc::now())?;
            println!("Marked notification #{id} as clicked");
            Ok(())
        }
        NotifyCommand::Send {
            user,
            title,
            body,
            priority,
        } => send(&cfg, &store, &user, title, body, priority).await,
    }
}

fn dispatcher(cfg: &Config, limit: Option<usize>) -> Result<Dispatcher<GatewayTransport>> {
    let mut settings = cfg.dispatch_settings();
    if let Some(limit) = limit {
        settings.batch_limit = limit;
    }
    Ok(Dispatcher::new(cfg.transport()?, settings))
}

/// Dispatch after an analysis run. Missing credentials are reported, not
/// raised: queued rows stay pending for a later run.
async fn dispatch_after_analysis(
    store: &SqliteStore,
    dispatcher: &Dispatcher<GatewayTransport>,
    now: DateTime<Utc>,
) -> Result<()> {
    match dispatcher.dispatch_pending(store, now).await {
        Ok(summary) => print_dispatch(&summary),
        Err(DispatchError::MissingCredentials { missing }) => {
            tracing::warn!(?missing, "push credentials missing; leaving notifications queued");
            println!("Push delivery not configured (missing: {}); notifications stay queued.", missing.join(", "));
        }
        Err(e) => return Err(e).context("dispatch pending notifications"),
    }
    Ok(())
}

fn engagement(cfg: &Config) -> Result<EngagementPasses> {
    Ok(EngagementPasses::new(cfg.analyzer()?.evaluator().timezone()))
}

/// Both engagement passes. A failing pass is logged and the other still runs.
fn run_engagement(cfg: &Config, store: &SqliteStore, now: DateTime<Utc>) -> Result<()> {
    let passes = engagement(cfg)?;
    match passes.long_inactive(store, now) {
        Ok(s) => print_pass("Long-inactive", &s),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "long-inactive pass failed"),
    }
    match passes.streaks(store, now) {
        Ok(s) => print_pass("Streaks", &s),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "streak pass failed"),
    }
    Ok(())
}

fn print_pass(name: &str, s: &PassSummary) {
    println!(
        "{name}: {} targets, {} queued, {} deduplicated, {} switched off, {} failed",
        s.targets, s.created, s.deduplicated, s.disabled, s.failed
    );
}

pub async fn check_and_dispatch(
    cfg: &Config,
    store: &SqliteStore,
    dispatcher: &Dispatcher<GatewayTransport>,
    now: DateTime<Utc>,
) -> Result<()> {
    let report = run_check(&cfg.schedule()?, &cfg.analyzer()?, store, now)?;
    println!("{}", report.message());
    if report.is_regular_time {
        run_engagement(cfg, store, now)?;
        dispatch_after_analysis(store, dispatcher, now).await?;
    }
    Ok(())
}

async fn trigger(cfg: &Config, store: &SqliteStore) -> Result<()> {
    let now = Utc::now();
    let summary = run_manual(&cfg.analyzer()?, store, now)?;
    println!(
        "Analyzed {} activities: {} targets, {} queued, {} deduplicated, {} muted, {} failed, {} anomalies",
        summary.analyzed_activities,
        summary.notification_targets,
        summary.created,
        summary.deduplicated,
        summary.muted,
        summary.failed_inserts,
        summary.anomalies
    );
    dispatch_after_analysis(store, &dispatcher(cfg, None)?, now).await
}

async fn engage(cfg: &Config, store: &SqliteStore) -> Result<()> {
    let now = Utc::now();
    run_engagement(cfg, store, now)?;
    dispatch_after_analysis(store, &dispatcher(cfg, None)?, now).await
}

async fn dispatch(cfg: &Config, store: &SqliteStore, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let now = Utc::now();
    if dry_run {
        let settings = cfg.dispatch_settings();
        let rows = store.list_pending(now, limit.unwrap_or(settings.batch_limit), settings.max_retries)?;
        if rows.is_empty() {
            println!("No due notifications.");
        }
        for r in &rows {
            println!(
                "[DRY RUN] would send #{} [{}] {} -> {} (attempt {})",
                r.id,
                r.priority,
                r.title,
                r.user_id,
                r.retry_count + 1
            );
        }
        return Ok(());
    }

    let summary = dispatcher(cfg, limit)?
        .dispatch_pending(store, now)
        .await
        .context("dispatch pending notifications")?;
    print_dispatch(&summary);
    Ok(())
}

fn print_dispatch(s: &DispatchSummary) {
    println!(
        "Dispatch complete. Claimed {}, sent {}, failed {} ({} exhausted), skipped {}.",
        s.claimed, s.sent, s.failed, s.exhausted, s.skipped
    );
}

fn status(cfg: &Config, store: &SqliteStore) -> Result<()> {
    let now = Utc::now();
    let schedule = cfg.schedule()?;
    let local = now.with_timezone(&schedule.timezone());
    let due = notifications::count_due(store.conn(), now, cfg.push.max_retries)?;
    let analyzer = cfg.analyzer()?;
    let units: Vec<&str> = analyzer.evaluator().policy().units().map(|u| u.as_str()).collect();

    println!("Local time:      {} ({})", local.format("%Y-%m-%d %H:%M:%S"), schedule.timezone());
    println!("Regular time:    {}", if schedule.is_regular_time(now) { "yes" } else { "no" });
    println!(
        "Next regular:    {}",
        schedule.next_regular_time(now).format("%Y-%m-%d %H:%M:%S")
    );
    println!("Policy units:    {}", units.join(", "));
    println!("Due to send:     {due}");

    let vapid = cfg.vapid();
    if vapid.is_complete() {
        println!("Push delivery:   configured ({})", cfg.transport()?.url());
    } else {
        println!("Push delivery:   not configured (missing: {})", vapid.missing().join(", "));
    }
    Ok(())
}

fn stats(store: &SqliteStore, user: &str) -> Result<()> {
    let s = store.user_stats(user, Utc::now())?;
    println!(
        "Last 30 days for {user}: {} total, {} sent, {} clicked, {} due, {} failed",
        s.total, s.sent, s.clicked, s.pending, s.failed_permanent
    );
    for r in &s.recent {
        let at = |t: Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string());
        println!(
            "- #{} [{}] {} | {} | {} | created {} | sent {} | clicked {}",
            r.id,
            r.status,
            r.title,
            r.kind.as_str(),
            r.priority,
            r.created_at.to_rfc3339(),
            at(r.sent_at),
            at(r.clicked_at)
        );
    }
    Ok(())
}

async fn send(
    cfg: &Config,
    store: &SqliteStore,
    user: &str,
    title: String,
    body: String,
    priority: Priority,
) -> Result<()> {
    let message = ImmediateMessage {
        title,
        body,
        priority,
    };
    let resp = dispatcher(cfg, None)?
        .send_immediate(store, user, &message, Utc::now())
        .await
        .with_context(|| format!("send to {user}"))?;
    println!("Sent to {user} (status {})", resp.status);
    Ok(())
}

/// Sleep until each regular time, then check and dispatch. Errors in one
/// round are logged and the loop carries on. One dispatcher lives for the
/// whole loop so deliveries it could not record are not pushed again.
pub async fn serve() -> Result<()> {
    let cfg = load_config()?;
    let store = open_store()?;
    let schedule = cfg.schedule()?;
    let dispatcher = dispatcher(&cfg, None)?;
    tracing::info!(timezone = %schedule.timezone(), "lastmove scheduler started");

    loop {
        let now = Utc::now();
        let next = schedule.next_regular_time(now).with_timezone(&Utc);
        let wait = (next - now).to_std().unwrap_or_default();
        println!("Next regular check at {}", next.with_timezone(&schedule.timezone()).format("%Y-%m-%d %H:%M"));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down scheduler");
                return Ok(());
            }
        }

        if let Err(e) = check_and_dispatch(&cfg, &store, &dispatcher, Utc::now()).await {
            tracing::error!(error = %format!("{e:#}"), "scheduled check failed");
        }
    }
}
