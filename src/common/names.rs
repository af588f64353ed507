//! Unique names for cluster objects
//!
//! Test cases share one cluster and get no isolation beyond namespaces, so
//! every generated namespace or object name carries a random suffix.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of the random suffix appended to generated names
const SUFFIX_LEN: usize = 5;

/// Random lowercase alphanumeric suffix, valid inside a DNS-1123 label
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// `prefix-xxxxx`, truncated so the result stays within 63 characters
pub fn unique_name(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('-');
    let max_prefix = 63 - SUFFIX_LEN - 1;
    let prefix = if prefix.len() > max_prefix {
        &prefix[..max_prefix]
    } else {
        prefix
    };
    format!("{}-{}", prefix, random_suffix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_shape() {
        let name = unique_name("olm-e2e-");
        assert!(name.starts_with("olm-e2e-"));
        assert_eq!(name.len(), "olm-e2e-".len() + SUFFIX_LEN);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_unique_name_is_bounded() {
        let long = "x".repeat(100);
        assert_eq!(unique_name(&long).len(), 63);
    }

    #[test]
    fn test_suffixes_differ() {
        assert_ne!(random_suffix(), random_suffix());
    }
}
