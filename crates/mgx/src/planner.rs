//! 📦 planner.rs — the disk-space preflight. Measure twice, reindex once.
//!
//! 🧮 The math is short and the stakes are tall: during a migration the
//! temporary staging copy and the recreated original briefly coexist, so we
//! need **2×** the largest candidate's primary footprint free — on the *most
//! space-starved node*, because any node could end up hosting those shards.
//!
//! ⚠️ Largest single candidate, not the sum: migrations run strictly one at a
//! time (see the runner), so only one index's working set exists on disk at
//! any moment. Summing would be cowardice. Expensive cowardice.

use anyhow::Result;
use tracing::info;

use crate::cluster::{ClusterClient, IndexDescriptor};
use crate::errors::InsufficientSpaceError;

/// 🧾 The plan: who's the biggest, what do they need, what have we got.
#[derive(Debug, Clone)]
pub struct DiskSpacePlan {
    /// `None` means zero candidates — the plan is a no-op success.
    pub largest_index: Option<String>,
    pub largest_size_bytes: u64,
    /// always `2 × largest_size_bytes`
    pub required_bytes: u64,
    /// minimum available bytes across all nodes
    pub available_bytes: u64,
}

impl DiskSpacePlan {
    /// ✅ Pure headroom verdict, separated from the I/O so it can be tested
    /// without waking up a cluster.
    pub fn check(&self) -> Result<(), InsufficientSpaceError> {
        let Some(largest) = &self.largest_index else {
            return Ok(()); // nothing to migrate, nothing to fear
        };
        if self.available_bytes < self.required_bytes {
            return Err(InsufficientSpaceError {
                largest_index: largest.clone(),
                largest_size_bytes: self.largest_size_bytes,
                required_bytes: self.required_bytes,
                available_bytes: self.available_bytes,
            });
        }
        Ok(())
    }
}

/// 📦 Converts bytes to something a human can read without counting zeros.
/// "1073741824 bytes" is a war crime in a log line.
pub fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.2}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2}PB")
}

/// 🧮 The planner. Borrows the client, owns no state, judges everyone's disk.
pub struct DiskSpacePlanner<'a> {
    client: &'a ClusterClient,
}

impl<'a> DiskSpacePlanner<'a> {
    pub fn new(client: &'a ClusterClient) -> Self {
        Self { client }
    }

    /// 📐 Build the plan: largest candidate by primary size vs the minimum
    /// node headroom. Does not pass judgment — call [`DiskSpacePlan::check`]
    /// for the verdict (the runner wants the plan for its report either way).
    pub async fn plan(&self, candidates: &[IndexDescriptor]) -> Result<DiskSpacePlan> {
        if candidates.is_empty() {
            info!("📦 No candidate indices — disk-space planning is a no-op. Easiest job all day.");
            return Ok(DiskSpacePlan {
                largest_index: None,
                largest_size_bytes: 0,
                required_bytes: 0,
                available_bytes: 0,
            });
        }

        for c in candidates {
            info!("📦 Candidate '{}' primary size: {}", c.name, human_bytes(c.size_bytes));
        }

        // -- max by primary size; ties broken by whoever the iterator met last, we don't care
        let Some(largest) = candidates.iter().max_by_key(|c| c.size_bytes) else {
            // unreachable past the empty check, but the compiler likes receipts
            return Ok(DiskSpacePlan {
                largest_index: None,
                largest_size_bytes: 0,
                required_bytes: 0,
                available_bytes: 0,
            });
        };

        let required = largest.size_bytes.saturating_mul(2);
        let available = self.client.min_available_bytes().await?;

        info!(
            "📦 Largest candidate: '{}' ({}) → required {} (2×), min available across nodes {}",
            largest.name,
            human_bytes(largest.size_bytes),
            human_bytes(required),
            human_bytes(available)
        );

        Ok(DiskSpacePlan {
            largest_index: Some(largest.name.clone()),
            largest_size_bytes: largest.size_bytes,
            required_bytes: required,
            available_bytes: available,
        })
    }
}
