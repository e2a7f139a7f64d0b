//! User and session identifiers
//!
//! - The user id is created once and persisted under
//!   [`USER_ID_STORAGE_KEY`]; it survives restarts for as long as the store does.
//! - The session id is minted for every collector construction and never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use uuid::Uuid;

use crate::store::{KeyValueStore, USER_ID_STORAGE_KEY};

/// Generate a random (version 4) UUID string.
///
/// Uses the operating system's CSPRNG. If that source is unavailable the bytes
/// come from [`fallback_random_bytes`] instead, which is NOT cryptographically
/// secure; identifiers produced that way are only fit for telemetry.
pub fn generate_uuid() -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        tracing::debug!(error = %e, "OS random source unavailable, using fallback generator");
        bytes = fallback_random_bytes();
    }

    // Sets the version nibble to 4 and the RFC 4122 variant bits
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

/// Pseudo-random bytes seeded from the clock, process id and a counter.
///
/// Not cryptographically secure: the seed is guessable.
fn fallback_random_bytes() -> [u8; 16] {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos
        ^ (u64::from(std::process::id()) << 32)
        ^ COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9E37_79B9_7F4A_7C15);

    let mut bytes = [0u8; 16];
    StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
    bytes
}

/// A fresh identifier for this collector's lifetime.
pub fn new_session_id() -> String {
    generate_uuid()
}

/// Resolve the durable user id, creating and persisting one if needed.
///
/// When the store cannot be written, the generated id is still returned and
/// simply lives as long as this collector does.
pub fn resolve_user_id(store: &dyn KeyValueStore) -> String {
    if let Err(e) = store.probe() {
        tracing::debug!(error = %e, "Storage unavailable, user id will not persist");
        return generate_uuid();
    }

    match store.get(USER_ID_STORAGE_KEY) {
        Ok(Some(id)) if !id.is_empty() => return id,
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "Failed to read stored user id"),
    }

    let id = generate_uuid();
    if let Err(e) = store.set(USER_ID_STORAGE_KEY, &id) {
        tracing::debug!(error = %e, "Failed to persist user id");
    }
    id
}

/// True if `id` parses as a version 4 UUID
pub fn is_uuid_v4(id: &str) -> bool {
    Uuid::parse_str(id)
        .map(|u| u.get_version_num() == 4)
        .unwrap_or(false)
}
