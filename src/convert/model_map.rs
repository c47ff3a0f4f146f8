//! External model id to upstream model id catalog.
//!
//! Fixed table with prefix matching; unknown names pass through unchanged
//! so new upstream models work without a gateway release.

/// Ordered prefix table. More specific prefixes come first.
const PREFIX_TABLE: &[(&str, &str)] = &[
    ("claude-opus-4-5", "claude-opus-4.5"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-haiku-4-5", "claude-haiku-4.5"),
];

const EXACT_TABLE: &[(&str, &str)] = &[
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("auto", "claude-sonnet-4.5"),
];

/// External model ids advertised by `GET /v1/models`.
pub const CATALOG: &[&str] = &[
    "claude-opus-4-5",
    "claude-sonnet-4-5",
    "claude-sonnet-4",
    "claude-haiku-4-5",
    "claude-3-7-sonnet-20250219",
    "auto",
];

/// Resolve an external model id to the upstream id.
pub fn resolve(model: &str) -> String {
    for (name, internal) in EXACT_TABLE {
        if model == *name {
            return (*internal).to_string();
        }
    }
    for (prefix, internal) in PREFIX_TABLE {
        if model.starts_with(prefix) {
            return (*internal).to_string();
        }
    }
    model.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_mappings() {
        assert_eq!(resolve("auto"), "claude-sonnet-4.5");
        assert_eq!(
            resolve("claude-3-7-sonnet-20250219"),
            "CLAUDE_3_7_SONNET_20250219_V1_0"
        );
    }

    #[test]
    fn test_prefix_mappings() {
        assert_eq!(resolve("claude-opus-4-5"), "claude-opus-4.5");
        assert_eq!(resolve("claude-opus-4-5-20251101"), "claude-opus-4.5");
        assert_eq!(
            resolve("claude-sonnet-4-5"),
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
        assert_eq!(
            resolve("claude-sonnet-4-5-20250929"),
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
        assert_eq!(resolve("claude-haiku-4-5"), "claude-haiku-4.5");
    }

    #[test]
    fn test_sonnet_4_5_wins_over_sonnet_4() {
        // "claude-sonnet-4-5" also starts with "claude-sonnet-4"; the more
        // specific prefix must match first.
        assert_ne!(resolve("claude-sonnet-4-5"), "CLAUDE_SONNET_4_20250514_V1_0");
        assert_eq!(
            resolve("claude-sonnet-4-20250514"),
            "CLAUDE_SONNET_4_20250514_V1_0"
        );
    }

    #[test]
    fn test_unknown_passes_through() {
        assert_eq!(resolve("gpt-4o"), "gpt-4o");
        assert_eq!(resolve("claude-next"), "claude-next");
    }

    #[test]
    fn test_catalog_resolves() {
        for model in CATALOG {
            assert_ne!(resolve(model), "");
        }
    }
}
