//! Object routing — a deterministic, non-cryptographic hash of an object's
//! name decides which server in a backend's server set owns it. Every
//! client and server must agree on this function, so it is pinned in
//! `strata-core` rather than left to each caller to reimplement.
//!
//! `xxhash-rust`'s xxh3 is used rather than `blake3` (which the rest of the
//! workspace favors for content hashing): routing is explicitly
//! non-cryptographic, and xxh3 is materially faster for a per-call hot-path
//! hash with no security requirement.

use xxhash_rust::xxh3::xxh3_64;

/// Index of the server in `[0, server_count)` that owns `name`. Panics if
/// `server_count` is zero — callers must not route against an empty
/// server set.
pub fn route_index(name: &str, server_count: u32) -> u32 {
    assert!(server_count > 0, "server_count must be nonzero");
    (xxh3_64(name.as_bytes()) % server_count as u64) as u32
}
