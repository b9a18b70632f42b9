use anyhow::{Context, Result};
use lastmove_store::SqliteStore;
use std::fs;
use std::path::PathBuf;

pub const HOME_ENV: &str = "LASTMOVE_HOME";

/// `$LASTMOVE_HOME`, else `~/.lastmove`.
pub fn lastmove_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".lastmove"))
}

pub fn ensure_lastmove_home() -> Result<PathBuf> {
    let dir = lastmove_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn database_path() -> Result<PathBuf> {
    Ok(ensure_lastmove_home()?.join("lastmove.db"))
}

pub fn open_store() -> Result<SqliteStore> {
    let p = database_path()?;
    SqliteStore::open(&p).with_context(|| format!("open database {}", p.display()))
}
