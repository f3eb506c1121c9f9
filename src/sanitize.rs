//! Log sanitization for command strings that may carry secrets.
//!
//! Deliberately a plain substring scan rather than a `regex` — the
//! vocabulary is fixed and small, and a coarse whole-line redaction is
//! safer than a clever partial mask that might miss a variant spelling.

const SENSITIVE_TOKENS: &[&str] = &["password", "pre-shared-key", "secret", "community"];

const REDACTION_MARKER: &str = "<redacted: sensitive command>";

/// Returns the line as-is, or the fixed redaction marker if the line
/// contains any sensitive substring (case-insensitive).
pub fn sanitize_for_log(line: &str) -> String {
    let lower = line.to_lowercase();
    if SENSITIVE_TOKENS.iter().any(|t| lower.contains(t)) {
        REDACTION_MARKER.to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_lines_with_any_sensitive_token() {
        for token in SENSITIVE_TOKENS {
            let line = format!("set {token} foo");
            assert_eq!(sanitize_for_log(&line), REDACTION_MARKER);
        }
    }

    #[test]
    fn redaction_is_case_insensitive() {
        assert_eq!(sanitize_for_log("set PASSWORD hunter2"), REDACTION_MARKER);
        assert_eq!(sanitize_for_log("set Secret xyz"), REDACTION_MARKER);
    }

    #[test]
    fn passthrough_for_clean_lines() {
        let line = "show interface status";
        assert_eq!(sanitize_for_log(line), line);
    }

    #[test]
    fn partial_word_matches_still_redact() {
        // "community" is in the vocabulary verbatim; compound tokens like
        // "snmp community string" must still redact the whole line.
        assert_eq!(
            sanitize_for_log("set snmp community string public"),
            REDACTION_MARKER
        );
    }
}
