//! Bag-of-tokens Jaccard similarity used to rank pattern-memory candidates.

use std::collections::HashSet;

/// Lower-cased alphanumeric token set for a signature string.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Jaccard overlap between two token sets: `|A ∩ B| / |A ∪ B|`, 0.0 when both
/// are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
