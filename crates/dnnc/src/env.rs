use std::env;
use std::sync::OnceLock;

static DNNC_PASS_STATS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Per-pass statistics are logged at `info` instead of `debug`.
pub(crate) fn pass_stats_enabled() -> bool {
    *DNNC_PASS_STATS.get_or_init(|| match env::var("DNNC_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "On"] {
            assert!(parse_bool(value), "{value:?} should be true");
        }
        for value in ["0", "false", "off", "nope", ""] {
            assert!(!parse_bool(value), "{value:?} should be false");
        }
    }
}
