//! 🔢 version.rs — decoding the cluster's cursed `version.created` integer.
//!
//! 📜 Ancient lore: every index carries an opaque integer stating which engine
//! version created it. It is XOR'd with a magic mask, zero-padded, and suffixed
//! with two digits of pure vibes. Someone designed this. They sleep fine.
//!
//! 🔧 The decoding ritual, in full:
//!   1. `decoded = raw ^ 0x0800_0000`
//!   2. drop the two-digit suffix: `version_num = decoded / 100`
//!   3. `version_num` is `XXYYZZ` — major, minor, patch, zero-padded pairs
//!
//! Real specimens from the wild:
//!   `135249527 ^ 0x0800_0000 = 1031799 → 10317 → 1.3.17`  (legacy 😱)
//!   `136327927 ^ 0x0800_0000 = 2110199 → 21101 → 2.11.1`  (fine 😌)
//!
//! ⚠️ Two historical decoders exist for this field. The other one divides by a
//! million and hopes. We use the XOR rule — it round-trips the documented
//! vectors and it is the one the monitoring stack already trusts.

/// 🎭 the XOR mask. do not tune. do not "fix". it is a ritual, not a parameter.
const VERSION_MASK: u64 = 0x0800_0000;

/// 🚧 everything below this `version_num` was created by a 1.x engine and must migrate.
pub const LEGACY_THRESHOLD: u64 = 20_000;

/// 📦 What we learned about an index's birth certificate.
///
/// `Unknown` means the settings had no parseable `version.created`. Unknown is
/// **not** legacy — we fail safe toward *not* migrating, because destroying an
/// index based on a guess is how you end up in a post-mortem with your name in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVersion {
    Known {
        major: u32,
        minor: u32,
        patch: u32,
        /// the comparable `XXYYZZ` form, kept around for threshold checks and logs
        version_num: u64,
    },
    Unknown,
}

impl IndexVersion {
    /// 🚨 Legacy iff we *know* the version and it predates the threshold.
    pub fn is_legacy(&self) -> bool {
        match self {
            IndexVersion::Known { version_num, .. } => *version_num < LEGACY_THRESHOLD,
            IndexVersion::Unknown => false,
        }
    }
}

impl std::fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexVersion::Known { major, minor, patch, .. } => {
                write!(f, "{major}.{minor}.{patch}")
            }
            IndexVersion::Unknown => write!(f, "unknown"),
        }
    }
}

/// 🔮 Decode a raw `version.created` integer into something humans can argue about.
///
/// Pure and total for well-formed input. Garbage in → [`IndexVersion::Unknown`] out,
/// never a panic, never a guess.
pub fn decode(raw: u64) -> IndexVersion {
    let decoded = raw ^ VERSION_MASK;
    let version_num = decoded / 100;
    // -- a plausible version fits in XXYYZZ; anything wider is not our encoding
    if version_num == 0 || version_num > 99_99_99 {
        return IndexVersion::Unknown;
    }
    IndexVersion::Known {
        major: (version_num / 10_000) as u32,
        minor: ((version_num / 100) % 100) as u32,
        patch: (version_num % 100) as u32,
        version_num,
    }
}

/// 🔮 Same ritual, but starting from the string the settings API actually hands us.
/// Absent or non-numeric input yields `Unknown` — see the fail-safe note above.
pub fn decode_str(raw: Option<&str>) -> IndexVersion {
    match raw.and_then(|s| s.trim().parse::<u64>().ok()) {
        Some(n) => decode(n),
        None => IndexVersion::Unknown,
    }
}
