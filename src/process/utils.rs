/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Label for a header cell with no text, e.g. the one produced by the trailing
/// comma on legacy bhavcopy rows.
pub fn blank_header_label(position: usize) -> String {
    format!("Unnamed: {}", position)
}

/// Lower-case and trim a column label. The index stream also turns inner
/// spaces into underscores; the equity stream keeps them.
pub fn normalize_header(raw: &str, replace_spaces: bool) -> String {
    let label = raw.trim().to_lowercase();
    if replace_spaces {
        label.replace(' ', "_")
    } else {
        label
    }
}

/// Key used when comparing a series code or index name against its target:
/// outer whitespace dropped, inner runs of whitespace collapsed, upper-cased.
pub fn match_key(raw: &str) -> String {
    clean_str(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Parse a numeric cell. Anything that is not a finite number is missing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = clean_str(raw);
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
