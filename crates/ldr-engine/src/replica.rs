//! Replica Identity (spec §4.1, C1).
//!
//! Produces a stable, globally-unique-with-very-high-probability name for
//! this process instance, used everywhere a "who holds this" attribution is
//! required (lease ownership, `LoadHistory.replicaName`, `:replicaId`).
//!
//! Generalizes a "stable-ish, non-sensitive host fingerprint" debug helper
//! into the authoritative identity spec §4.1 needs.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Derive the replica name once for this process.
///
/// Order (spec §4.1):
/// 1. the env var named by `name_env` (e.g. `replica.nameEnv` config,
///    default `LDR_REPLICA_NAME`), if set and non-blank;
/// 2. the resolvable host name;
/// 3. `hostname|pid-start-nanos|random-u64` as a last resort.
pub fn derive_replica_name(name_env: &str) -> String {
    if let Ok(v) = std::env::var(name_env) {
        let trimmed = v.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if let Ok(host) = hostname::get() {
        if let Some(host_str) = host.to_str() {
            if !host_str.trim().is_empty() {
                return host_str.to_string();
            }
        }
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let random: u64 = rand::thread_rng().next_u64();
    format!("unknown-host|{nanos}|{random:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_when_set() {
        std::env::set_var("LDR_TEST_REPLICA_NAME_OVERRIDE", "replica-7");
        let name = derive_replica_name("LDR_TEST_REPLICA_NAME_OVERRIDE");
        assert_eq!(name, "replica-7");
        std::env::remove_var("LDR_TEST_REPLICA_NAME_OVERRIDE");
    }

    #[test]
    fn blank_env_override_falls_through() {
        std::env::set_var("LDR_TEST_REPLICA_NAME_BLANK", "   ");
        let name = derive_replica_name("LDR_TEST_REPLICA_NAME_BLANK");
        assert!(!name.trim().is_empty());
        std::env::remove_var("LDR_TEST_REPLICA_NAME_BLANK");
    }

    #[test]
    fn is_stable_across_calls_in_same_process() {
        std::env::remove_var("LDR_TEST_REPLICA_NAME_STABLE");
        let a = derive_replica_name("LDR_TEST_REPLICA_NAME_STABLE");
        let b = derive_replica_name("LDR_TEST_REPLICA_NAME_STABLE");
        assert_eq!(a, b, "hostname-based derivation must be deterministic within a process");
    }
}
