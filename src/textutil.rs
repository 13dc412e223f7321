use once_cell::sync::Lazy;
use regex::Regex;

static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws run"));

/// Substitute `{{key}}` placeholders.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn collapse_whitespace(text: &str) -> String {
    WS_RUN_RE.replace_all(text.trim(), " ").into_owned()
}

/// Single-line preview for log output, cut at `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = collapse_whitespace(text);
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}
