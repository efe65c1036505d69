//! Logging setup and helpers shared by every layer.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Maximum number of characters of raw tool output or response body to log.
pub const MAX_SNIPPET_CHARS: usize = 200;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbose mode enables debug output
/// for this crate.
pub fn init(verbose: bool, json: bool) {
    let default_filter = if verbose { "info,netpulse=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Truncate `text` to at most `max` characters, never splitting a
/// multi-byte character. Appends `...` when something was cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// [`truncate`] to [`MAX_SNIPPET_CHARS`], with surrounding whitespace removed.
pub fn snippet(text: &str) -> String {
    truncate(text.trim(), MAX_SNIPPET_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate("PING 8.8.8.8", 200), "PING 8.8.8.8");
        assert_eq!(truncate("", 10), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "日本語のテキスト";
        assert_eq!(truncate(text, 3), "日本語...");
    }

    #[test]
    fn test_snippet_trims_and_limits() {
        let long = format!("  {}  ", "x".repeat(500));
        let s = snippet(&long);
        assert_eq!(s.len(), MAX_SNIPPET_CHARS + 3);
        assert!(s.starts_with('x'));
    }
}
