//! Post-processing: deterministic cleanup of raw OCR text before it is
//! written into a page PDF.
//!
//! Both OCR backends return text with quirks that render badly in a PDF
//! text run: carriage returns, runs of blank lines between detected blocks,
//! zero-width joiners from the cloud service, stray control characters.
//! Each rule below is a pure `&str → String` pass; the order matters only in
//! that line endings are normalised before any line-based rule runs.
//!
//! Rules never touch letters, digits or punctuation, so the character count
//! reported to the caller describes the recognised content.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to raw OCR output.
///
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible and control characters (BOM, soft hyphen, C0 controls)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to one
/// 5. Trim leading and trailing blank lines
pub fn clean_ocr_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip invisible characters ───────────────────────────────────────

/// Zero-width joiner/non-joiner (U+200C/U+200D) are kept: Devanagari uses
/// them to select conjunct forms.
fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            !matches!(c, '\u{FEFF}' | '\u{00AD}' | '\u{200B}' | '\u{2060}')
                && (c == '\n' || c == '\t' || !c.is_control())
        })
        .collect()
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_crlf() {
        assert_eq!(clean_ocr_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn strips_invisible_but_keeps_joiners() {
        let raw = "\u{FEFF}क्\u{200D}ष\u{200B}\u{0007}";
        assert_eq!(clean_ocr_text(raw), "क्\u{200D}ष");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_ocr_text("one\n\n\n\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn trims_edges_and_trailing_spaces() {
        assert_eq!(clean_ocr_text("\n\n  Hello   \nWorld\t\n\n"), "  Hello\nWorld");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(clean_ocr_text(""), "");
        assert_eq!(clean_ocr_text("\n \n"), "");
    }
}
