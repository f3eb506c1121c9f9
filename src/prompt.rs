//! Prompt Detector: classifies the tail of a byte buffer as a reached
//! prompt, an interactive password challenge, or "still streaming".
//!
//! Deliberately a handful of suffix checks rather than the teacher's
//! `RegexSet` state-machine graph — that graph encodes vendor-specific
//! mode transitions; this core only needs to know where one command's
//! output ends.

/// Outcome of matching the tail of a buffer against known prompt shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    /// Unprivileged shell prompt, ending in `>`.
    Unprivileged,
    /// Privileged shell prompt, ending in `#`.
    Privileged,
    /// An interactive password challenge (`Password:`, `Old_Password:`,
    /// `New_Password:`).
    PasswordChallenge,
    /// The pager's "press space to continue" marker, recognized
    /// defensively even though this crate disables paging at session
    /// open.
    Pager,
}

const PASSWORD_CHALLENGES: &[&str] = &["Password:", "Old_Password:", "New_Password:"];
const PAGER_MARKER: &str = "--more--";

/// Returns `Some((kind, prompt_string))` if the buffer's last non-empty
/// line (after trailing-whitespace trim) matches a recognized prompt
/// shape, else `None`.
pub fn detect_prompt(buf: &[u8]) -> Option<(PromptKind, String)> {
    let text = String::from_utf8_lossy(buf);
    let last_line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    let trimmed = last_line.trim_end();

    if trimmed.to_lowercase().contains(PAGER_MARKER) {
        return Some((PromptKind::Pager, trimmed.to_string()));
    }
    for challenge in PASSWORD_CHALLENGES {
        if trimmed.ends_with(challenge) {
            return Some((PromptKind::PasswordChallenge, trimmed.to_string()));
        }
    }
    if trimmed.ends_with('#') {
        return Some((PromptKind::Privileged, trimmed.to_string()));
    }
    if trimmed.ends_with('>') {
        return Some((PromptKind::Unprivileged, trimmed.to_string()));
    }
    None
}
