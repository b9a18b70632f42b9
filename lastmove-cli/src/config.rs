use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use lastmove_core::gate::DEFAULT_TOLERANCE_MINUTES;
use lastmove_core::time::{parse_timezone, parse_wall_clock, DEFAULT_TIMEZONE};
use lastmove_core::{BatchAnalyzer, DedupeMode, Evaluator, NotificationPolicy, RegularSchedule};
use lastmove_push::credentials::{PRIVATE_KEY_ENV, PUBLIC_KEY_ENV};
use lastmove_push::transport::DEFAULT_GATEWAY_URL;
use lastmove_push::{DispatchSettings, GatewayTransport, VapidCredentials};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::state::ensure_lastmove_home;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub push: PushSection,
    /// Replaces the built-in threshold table when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<NotificationPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeSetting {
    RelyOnGate,
    SkipOpenUnsent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub timezone: String,
    /// Local "HH:MM" slots at which `notify check` analyzes.
    pub regular_times: Vec<String>,
    pub tolerance_minutes: u32,
    pub dedupe: DedupeSetting,
    /// Only used with `dedupe = "skip_open_unsent"`.
    pub dedupe_window_hours: i64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            regular_times: vec!["19:00".into(), "21:00".into(), "23:00".into()],
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            dedupe: DedupeSetting::RelyOnGate,
            dedupe_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSection {
    pub gateway_url: String,
    pub vapid_subject: String,
    /// Overridden by `VAPID_PUBLIC_KEY` when set.
    pub vapid_public_key: String,
    /// Overridden by `VAPID_PRIVATE_KEY` when set.
    pub vapid_private_key: String,
    pub batch_limit: usize,
    pub max_retries: u32,
    pub ttl_seconds: u32,
    pub request_timeout_secs: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        let dispatch = DispatchSettings::default();
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            vapid_subject: "mailto:you@example.com".to_string(),
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            batch_limit: dispatch.batch_limit,
            max_retries: dispatch.max_retries,
            ttl_seconds: dispatch.ttl_seconds,
            request_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.engine.timezone)
    }

    pub fn schedule(&self) -> Result<RegularSchedule> {
        let times = self
            .engine
            .regular_times
            .iter()
            .map(|t| parse_wall_clock(t))
            .collect::<Result<Vec<_>>>()?;
        RegularSchedule::new(times, self.engine.tolerance_minutes, self.timezone()?)
    }

    pub fn dedupe_mode(&self) -> Result<DedupeMode> {
        match self.engine.dedupe {
            DedupeSetting::RelyOnGate => Ok(DedupeMode::RelyOnGate),
            DedupeSetting::SkipOpenUnsent => {
                if self.engine.dedupe_window_hours <= 0 {
                    bail!("engine.dedupe_window_hours must be positive");
                }
                Ok(DedupeMode::SkipOpenUnsent {
                    window_hours: self.engine.dedupe_window_hours,
                })
            }
        }
    }

    pub fn analyzer(&self) -> Result<BatchAnalyzer> {
        let policy = self.policy.clone().unwrap_or_default();
        let evaluator = Evaluator::new(policy, self.timezone()?);
        Ok(BatchAnalyzer::new(evaluator).with_dedupe(self.dedupe_mode()?))
    }

    pub fn vapid(&self) -> VapidCredentials {
        VapidCredentials::new(
            self.push.vapid_subject.clone(),
            resolve_secret(&self.push.vapid_public_key, std::env::var(PUBLIC_KEY_ENV).ok()),
            resolve_secret(&self.push.vapid_private_key, std::env::var(PRIVATE_KEY_ENV).ok()),
        )
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            batch_limit: self.push.batch_limit,
            max_retries: self.push.max_retries,
            ttl_seconds: self.push.ttl_seconds,
        }
    }

    pub fn transport(&self) -> Result<GatewayTransport> {
        GatewayTransport::new(
            self.push.gateway_url.clone(),
            self.vapid(),
            Duration::from_secs(self.push.request_timeout_secs),
        )
        .context("build push gateway client")
    }
}

/// Environment wins over the file when it holds a non-empty value.
fn resolve_secret(configured: &str, env: Option<String>) -> String {
    env.filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_lastmove_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    parse_config(&s)
}

pub fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config.toml")
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let cfg = Config::default();
    save_config(&cfg)?;
    println!("Wrote {}", p.display());
    Ok(())
}

pub fn show_config() -> Result<()> {
    let cfg = load_config()?;
    let mut shown = cfg.clone();
    if !shown.push.vapid_private_key.is_empty() {
        shown.push.vapid_private_key = "<redacted>".to_string();
    }
    println!("# {}", config_path()?.display());
    println!("{}", toml::to_string_pretty(&shown).context("serialize config")?);

    let missing = cfg.vapid().missing();
    if !missing.is_empty() {
        println!("# push delivery disabled; missing: {}", missing.join(", "));
        println!("# set them in [push] or via {PUBLIC_KEY_ENV} / {PRIVATE_KEY_ENV}");
    }
    Ok(())
}
