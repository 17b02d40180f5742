//! 🏷️ The error taxonomy — every way this migration can ruin your evening, with name tags.
//!
//! 🎬 *[courtroom drama music]* "Objection! That error is merely a `String`!"
//! "Overruled. In this crate, errors have *types*. And fields. And consequences."
//!
//! 📦 These are the typed failures the runner actually matches on to pick an exit
//! code. Everything else travels as `anyhow::Error` with context attached,
//! and gets downcast at the top when someone needs to know *which* disaster it was.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use thiserror::Error;

use crate::migrate::MigrationPhase;

/// 📡 A cluster API call went sideways — transport trouble or a non-2xx answer.
///
/// Carries method, path, status and body so a human at 3am can reconstruct the
/// crime scene without tcpdump. The client never retries; callers own that decision.
#[derive(Debug, Error)]
#[error("cluster request failed: {method} {path} → {status_label}: {body}")]
pub struct ClusterRequestError {
    pub method: String,
    pub path: String,
    /// HTTP status if we got far enough to receive one. `None` = transport-level sadness.
    pub status: Option<u16>,
    pub body: String,
    /// 🔧 precomputed for the Display impl — "HTTP 503" or "transport error"
    pub status_label: String,
}

impl ClusterRequestError {
    pub fn new(method: &str, path: &str, status: Option<u16>, body: String) -> Self {
        let status_label = match status {
            Some(code) => format!("HTTP {code}"),
            None => "transport error".to_string(),
        };
        Self {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body,
            status_label,
        }
    }
}

/// 🔄 The reindex said "done!" while quietly transferring nothing.
///
/// `created == 0` with `total > 0` is not a success, it is a cluster gaslighting
/// you. We refuse to delete anyone's original index on that basis.
#[derive(Debug, Error)]
#[error(
    "reindex integrity check failed for '{source_index}' → '{dest_index}': \
     total={total}, created={created} — refusing to treat this as success"
)]
pub struct ReindexIntegrityError {
    pub source_index: String,
    pub dest_index: String,
    pub total: u64,
    pub created: u64,
}

/// 📦 Not enough disk for the 2× working set. Preflight abort, distinct exit code.
#[derive(Debug, Error)]
#[error(
    "insufficient disk space: need {required_bytes} bytes (2× largest index \
     '{largest_index}' at {largest_size_bytes} bytes), but the most space-starved \
     node only has {available_bytes} bytes free"
)]
pub struct InsufficientSpaceError {
    pub largest_index: String,
    pub largest_size_bytes: u64,
    pub required_bytes: u64,
    pub available_bytes: u64,
}

/// 💀 Both the original and its staging copy are gone. This is the one error
/// nobody automates their way out of — it is logged as critical and surfaced
/// for a human with backups and a strong coffee.
#[derive(Debug, Error)]
#[error(
    "CRITICAL: both '{original}' and staging '{staging}' are missing — \
     possible data loss, restore from backup required"
)]
pub struct CriticalDataLossError {
    pub original: String,
    pub staging: String,
}

/// 🔧 Generic step wrapper: which index, which phase, and the underlying cause.
/// The phase is the whole point — it tells the operator exactly where the state
/// machine stopped and which recovery branch already ran.
#[derive(Debug, Error)]
#[error("migration step '{phase}' failed for index '{index}': {source}")]
pub struct MigrationStepError {
    pub index: String,
    pub phase: MigrationPhase,
    pub source: anyhow::Error,
}
