use std::path::{Path, PathBuf};
use std::process::Command;

/// Set by packagers building outside a git checkout.
const SHA_OVERRIDE_ENV: &str = "LASTMOVE_BUILD_SHA";

fn git(repo: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").arg("-C").arg(repo).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Short commit hash, suffixed with `-dirty` when tracked files are modified.
fn describe(repo: &Path) -> Option<String> {
    let sha = git(repo, &["rev-parse", "--short", "HEAD"]).filter(|s| !s.is_empty())?;
    let dirty = git(repo, &["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
    Some(if dirty { format!("{sha}-dirty") } else { sha })
}

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let workspace = manifest_dir.join("..");

    let sha = std::env::var(SHA_OVERRIDE_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| describe(&workspace))
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=LASTMOVE_BUILD_SHA={sha}");
    println!("cargo:rerun-if-env-changed={SHA_OVERRIDE_ENV}");
    for tracked in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={}", workspace.join(tracked).display());
    }
}
