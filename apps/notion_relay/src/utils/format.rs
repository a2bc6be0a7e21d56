use chrono::{DateTime, NaiveDate, Utc};

/// Substitutes `{key}` placeholders in a single pass.
/// Unknown keys and unbalanced braces are copied through untouched.
pub fn render_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after_open[..close];
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => {
                out.push_str(value);
                rest = &after_open[close + 1..];
            }
            None => {
                out.push('{');
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders an ISO date like `Mon Jan 01 2024`.
/// Date-times are converted to UTC first; anything unparseable is returned as-is.
pub fn human_date(iso: &str) -> String {
    let date = DateTime::parse_from_rfc3339(iso)
        .map(|value| value.with_timezone(&Utc).date_naive())
        .or_else(|_| NaiveDate::parse_from_str(iso, "%Y-%m-%d"));
    match date {
        Ok(date) => date.format("%a %b %d %Y").to_string(),
        Err(_) => iso.to_string(),
    }
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn clamp_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clamped: String = text.chars().take(max.saturating_sub(1)).collect();
    clamped.push('…');
    clamped
}
