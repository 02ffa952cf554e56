//! Placeholder identifiers for records the server has not confirmed yet.
//!
//! Format: `tmp~<kind>~<unix millis>~<counter>~<random>`. The counter makes
//! ids unique within a process even when the clock does not move; the random
//! suffix keeps two processes from colliding.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tally_core::{RecordId, TEMP_ID_PREFIX};
use uuid::Uuid;

pub use tally_core::is_temporary;

#[derive(Debug, Default)]
pub struct TempIdAllocator {
    counter: AtomicU64,
}

impl TempIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh placeholder id. `kind_hint` names the entity kind and
    /// only aids debugging.
    pub fn allocate(&self, kind_hint: &str) -> RecordId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = Uuid::new_v4().simple().to_string();
        let kind: String = kind_hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        RecordId::new(format!(
            "{}{}~{}~{}~{}",
            TEMP_ID_PREFIX,
            kind,
            Utc::now().timestamp_millis(),
            n,
            &random[..8]
        ))
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
