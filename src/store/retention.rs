//! Retention cleanup for persisted events.
//!
//! One pass lists `*.jpg` artifacts once, oldest first by modification time,
//! and deletes an artifact (plus its `.json` sidecar) when it is older than
//! the age limit or when keeping it would leave more than `max_files`.
//! Files written after the listing are never considered.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::StorageSettings;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_files: usize,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, max_files: usize) -> Self {
        Self {
            max_age: Duration::from_secs(u64::from(max_age_days) * SECS_PER_DAY),
            max_files,
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.max_age_days, settings.max_files)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(7, 1000)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Artifacts present in the listing.
    pub scanned: usize,
    pub deleted: usize,
    /// Deletions that failed; retried on the next pass.
    pub failed: usize,
}

impl CleanupReport {
    pub fn remaining(&self) -> usize {
        self.scanned - self.deleted
    }
}

/// Apply `policy` to `dir` using the current time.
pub fn cleanup(dir: &Path, policy: &RetentionPolicy) -> Result<CleanupReport> {
    cleanup_at(dir, policy, SystemTime::now())
}

/// Apply `policy` to `dir` as if the current time were `now`.
pub fn cleanup_at(dir: &Path, policy: &RetentionPolicy, now: SystemTime) -> Result<CleanupReport> {
    if !dir.exists() {
        return Ok(CleanupReport::default());
    }
    let mut artifacts = list_artifacts(dir)?;
    artifacts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let cutoff = now.checked_sub(policy.max_age);
    let mut report = CleanupReport {
        scanned: artifacts.len(),
        ..CleanupReport::default()
    };

    for (path, modified) in &artifacts {
        let expired = cutoff.is_some_and(|cutoff| *modified < cutoff);
        let over_limit = report.remaining() > policy.max_files;
        if !(expired || over_limit) {
            continue;
        }
        match remove_artifact(path) {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                log::warn!("cleanup: failed to delete {}: {:#}", path.display(), err);
                report.failed += 1;
            }
        }
    }

    if report.deleted > 0 {
        log::info!(
            "cleanup: deleted {} of {} event artifacts in {}",
            report.deleted,
            report.scanned,
            dir.display()
        );
    }
    Ok(report)
}

fn list_artifacts(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut artifacts = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jpg") {
            continue;
        }
        // Vanished between listing and stat: a concurrent cleanup won.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .with_context(|| format!("no modification time for {}", path.display()))?;
        artifacts.push((path, modified));
    }
    Ok(artifacts)
}

fn remove_artifact(image: &Path) -> Result<()> {
    let sidecar = image.with_extension("json");
    match fs::remove_file(&sidecar) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("remove {}", sidecar.display()));
        }
    }
    fs::remove_file(image).with_context(|| format!("remove {}", image.display()))
}
