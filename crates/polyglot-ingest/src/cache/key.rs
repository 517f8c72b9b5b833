//! Cache key derivation.
//!
//! Keys embed the relay set sorted and deduplicated, so any permutation of
//! the same relays maps to the same key.

/// Sorted, deduplicated copy of a relay list.
pub fn sorted_relays<S: AsRef<str>>(relays: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = relays.iter().map(|r| r.as_ref().to_string()).collect();
    sorted.sort();
    sorted.dedup();
    sorted
}

fn relay_part<S: AsRef<str>>(relays: &[S]) -> String {
    sorted_relays(relays).join(",")
}

/// Key of a language index entry, shared with its records entry.
pub fn language_index_key<S: AsRef<str>>(relays: &[S], since: u64, until: u64) -> String {
    format!("langIndex:{}:{}:{}", relay_part(relays), since, until)
}

/// Key of a metrics entry.
pub fn metrics_key<S: AsRef<str>>(relays: &[S], since: u64, until: u64, window_days: u32) -> String {
    format!(
        "metrics:{}:{}:{}:{}",
        relay_part(relays),
        since,
        until,
        window_days
    )
}
