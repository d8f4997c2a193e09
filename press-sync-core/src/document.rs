//! The generated Markdown document and its front matter.

use std::fmt::Write;

use chrono::{DateTime, NaiveDateTime};

/// Last front-matter line of every generated document; marks files this tool owns.
pub const GENERATOR_LINE: &str = "generator: press-sync";

/// Ordered front matter. Serialized in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub date: String,
    pub permalink: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

/// One output file: front matter plus Markdown body, keyed by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub identifier: String,
    pub front_matter: FrontMatter,
    pub body: String,
}

impl FrontMatter {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        let _ = writeln!(&mut buf, "---");
        let _ = writeln!(&mut buf, "title: {}", quote(&self.title));
        let _ = writeln!(&mut buf, "date: {}", self.date);
        let _ = writeln!(&mut buf, "permalink: {}", self.permalink);
        render_list(&mut buf, "categories", &self.categories);
        render_list(&mut buf, "tags", &self.tags);
        let _ = writeln!(&mut buf, "{GENERATOR_LINE}");
        let _ = writeln!(&mut buf, "---");
        buf
    }
}

impl MarkdownDocument {
    /// Full file contents: front matter, a blank line, the body, a final newline.
    pub fn render(&self) -> String {
        let mut out = self.front_matter.render();
        out.push('\n');
        let body = self.body.trim_end();
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
        out
    }
}

fn render_list(buf: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        let _ = writeln!(buf, "{key}: []");
        return;
    }
    let _ = writeln!(buf, "{key}:");
    for value in values {
        let _ = writeln!(buf, "  - {}", quote(value));
    }
}

/// Double-quoted YAML scalar with `\` and `"` escaped and line breaks flattened.
pub fn quote(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    format!(
        "\"{}\"",
        flat.trim().replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// Normalize a source timestamp to `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts WordPress' local `2024-03-01T09:30:00` and RFC 3339 values.
/// Anything else is kept as given.
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return naive.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return with_offset.naive_local().format("%Y-%m-%d %H:%M:%S").to_string();
    }
    raw.to_string()
}
