use unicode_normalization::UnicodeNormalization;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean raw user input for a new turn. `None` when nothing is left, which
/// makes the submit a no-op.
pub fn normalize_input(raw: &str) -> Option<String> {
    let t = clean_text(raw);
    if t.is_empty() { None } else { Some(t) }
}
