use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use lastmove_store::settings;
use std::fs;
use std::path::PathBuf;

use crate::state::open_store;

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Store a browser push subscription (the JSON from PushManager.subscribe)
    Subscribe {
        #[arg(long)]
        user: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Remove a user's push subscription
    Unsubscribe {
        #[arg(long)]
        user: String,
    },

    /// Show or change which notifications a user receives
    Settings {
        #[arg(long)]
        user: String,

        /// Urgency reminders from the regular checks
        #[arg(long)]
        daily: Option<bool>,

        /// Nudges for long-idle activities
        #[arg(long)]
        long_inactive: Option<bool>,

        /// Idle days before a nudge
        #[arg(long)]
        long_inactive_days: Option<u32>,

        /// Streak celebrations
        #[arg(long)]
        streaks: Option<bool>,
    },
}

pub fn run(cmd: UserCommand) -> Result<()> {
    let store = open_store()?;
    let now = Utc::now();
    match cmd {
        UserCommand::Subscribe { user, file } => {
            let raw = fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            settings::set_push_subscription(store.conn(), &user, raw.trim(), now)
                .with_context(|| format!("store subscription from {}", file.display()))?;
            println!("Saved push subscription for {user}");
        }
        UserCommand::Unsubscribe { user } => {
            settings::clear_push_subscription(store.conn(), &user, now)?;
            println!("Removed push subscription for {user}");
        }
        UserCommand::Settings {
            user,
            daily,
            long_inactive,
            long_inactive_days,
            streaks,
        } => {
            let update = settings::SettingsUpdate {
                daily_reminder_enabled: daily,
                long_inactive_enabled: long_inactive,
                long_inactive_days,
                streak_celebration_enabled: streaks,
            };
            let current = if update == settings::SettingsUpdate::default() {
                settings::notification_settings(store.conn(), &user)?
            } else {
                settings::update_notification_settings(store.conn(), &user, &update, now)?
            };
            let on_off = |b: bool| if b { "on" } else { "off" };
            println!("Notification settings for {user}:");
            println!("  daily reminders:      {}", on_off(current.daily_reminder_enabled));
            println!(
                "  long-inactive nudges: {} (after {} days)",
                on_off(current.long_inactive_enabled),
                current.long_inactive_days
            );
            println!("  streak celebrations:  {}", on_off(current.streak_celebration_enabled));
        }
    }
    Ok(())
}
