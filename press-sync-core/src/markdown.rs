//! Structural HTML → Markdown rendering.
//!
//! The HTML is parsed with `scraper` (html5ever) and the element tree is walked
//! once. Output conventions are fixed:
//!
//! | HTML | Markdown |
//! |---|---|
//! | `h1`..`h6` | ATX `#` headings |
//! | `ul` / `ol` | `- item` / `1. item` (honors `start`) |
//! | `strong`, `b` / `em`, `i` / `del`, `s` | `**x**` / `_x_` / `~~x~~` |
//! | `code` / `pre` | `` `x` `` / fenced block, `language-*` class kept |
//! | `blockquote` | `> ` prefixed lines |
//! | `hr` | `* * *` |
//! | `a` / `img` | `[text](href "title")` / `![alt](src "title")` |
//! | `br` | two-space hard break |
//! | `table` | GFM pipe table |
//! | `iframe`, `video`, `audio` | raw HTML passthrough |
//!
//! `script`, `style`, `noscript` and comments are dropped.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

static ORDERED_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\. ").expect("ordered marker regex should compile"));

const HARD_BREAK: &str = "  \n";

/// Render an HTML fragment as Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let rendered = render_children(fragment.root_element());
    normalize(&rendered)
}

/// Plain text of an HTML snippet: entities decoded, tags dropped, whitespace collapsed.
pub fn decode_html_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    collapse_whitespace(&text).trim().to_string()
}

fn render_children(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_text(&collapse_whitespace(text))),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    out.push_str(&render_element(child_element));
                }
            }
            _ => {}
        }
    }
    out
}

fn render_element(element: ElementRef<'_>) -> String {
    let name = element.value().name();
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let content = single_line(&render_children(element));
            if content.is_empty() {
                String::new()
            } else {
                block(&format!("{} {}", "#".repeat(level), content))
            }
        }
        "p" => paragraph(&render_children(element)),
        "div" | "section" | "article" | "main" | "header" | "footer" | "aside" | "nav"
        | "figure" | "figcaption" | "address" | "center" | "details" | "summary" | "dl"
        | "dt" | "dd" | "form" | "fieldset" => block(render_children(element).trim()),
        "br" => HARD_BREAK.to_string(),
        "hr" => block("* * *"),
        "strong" | "b" => wrap_inline(&render_children(element), "**"),
        "em" | "i" => wrap_inline(&render_children(element), "_"),
        "del" | "s" | "strike" => wrap_inline(&render_children(element), "~~"),
        "code" | "kbd" | "samp" | "tt" => inline_code(&element.text().collect::<String>()),
        "pre" => code_block(element),
        "a" => link(element),
        "img" => image(element),
        "ul" => list(element, false),
        "ol" => list(element, true),
        "li" => block(&list_item("-", &render_children(element), false)),
        "blockquote" => blockquote(&render_children(element)),
        "table" => table(element),
        "iframe" | "video" | "audio" => block(&element.html()),
        "script" | "style" | "noscript" | "template" | "head" | "title" | "meta" | "link" => {
            String::new()
        }
        _ => render_children(element),
    }
}

fn block(content: &str) -> String {
    if content.trim().is_empty() {
        String::new()
    } else {
        format!("\n\n{content}\n\n")
    }
}

/// Paragraph content cannot contain nested blocks, so each line can be trimmed
/// on the left and line-leading Markdown syntax escaped.
fn paragraph(content: &str) -> String {
    let lines: Vec<String> = content
        .trim()
        .split('\n')
        .map(|line| escape_line_start(line.trim_start()))
        .collect();
    block(&lines.join("\n"))
}

fn escape_line_start(line: &str) -> String {
    if line.starts_with('#')
        || line.starts_with('>')
        || line.starts_with("- ")
        || line.starts_with("+ ")
        || line.starts_with("= ")
    {
        return format!("\\{line}");
    }
    if let Some(caps) = ORDERED_MARKER_RE.captures(line) {
        let digits = &caps[1];
        return format!("{digits}\\.{}", &line[digits.len() + 1..]);
    }
    line.to_string()
}

fn single_line(content: &str) -> String {
    collapse_whitespace(&content.replace(HARD_BREAK, " "))
        .trim()
        .to_string()
}

fn wrap_inline(content: &str, delimiter: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return content.to_string();
    }
    let leading = &content[..content.len() - content.trim_start().len()];
    let trailing = &content[content.trim_end().len()..];
    format!("{leading}{delimiter}{trimmed}{delimiter}{trailing}")
}

fn inline_code(text: &str) -> String {
    let text = collapse_whitespace(text);
    if text.trim().is_empty() {
        return text;
    }
    if text.contains('`') {
        format!("`` {text} ``")
    } else {
        format!("`{text}`")
    }
}

fn code_block(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    let language = element
        .descendants()
        .filter_map(ElementRef::wrap)
        .chain(std::iter::once(element))
        .filter_map(|e| e.value().attr("class"))
        .flat_map(|class| class.split_whitespace())
        .find_map(|class| class.strip_prefix("language-"))
        .unwrap_or("");
    let fence = if text.contains("```") { "~~~" } else { "```" };
    let body = text.trim_end_matches(['\n', '\r']);
    block(&format!("{fence}{language}\n{body}\n{fence}"))
}

fn link(element: ElementRef<'_>) -> String {
    let content = render_children(element);
    let href = element.value().attr("href").unwrap_or("").trim();
    if href.is_empty() || content.trim().is_empty() {
        return content;
    }
    let title = title_suffix(element.value().attr("title"));
    format!("[{}]({href}{title})", content.trim())
}

fn image(element: ElementRef<'_>) -> String {
    let src = element.value().attr("src").unwrap_or("").trim();
    if src.is_empty() {
        return String::new();
    }
    let alt = element
        .value()
        .attr("alt")
        .map(|alt| escape_text(&collapse_whitespace(alt)))
        .unwrap_or_default();
    let title = title_suffix(element.value().attr("title"));
    format!("![{}]({src}{title})", alt.trim())
}

fn title_suffix(title: Option<&str>) -> String {
    match title.map(str::trim) {
        Some(title) if !title.is_empty() => {
            format!(" \"{}\"", collapse_whitespace(title).replace('"', "\\\""))
        }
        _ => String::new(),
    }
}

fn list(element: ElementRef<'_>, ordered: bool) -> String {
    let mut index = element
        .value()
        .attr("start")
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(1);
    let mut items = Vec::new();
    for child in element.children().filter_map(ElementRef::wrap) {
        let child_name = child.value().name();
        if child_name == "li" {
            let marker = if ordered {
                format!("{index}.")
            } else {
                "-".to_string()
            };
            index += 1;
            let loose = child
                .children()
                .filter_map(ElementRef::wrap)
                .any(|e| e.value().name() == "p");
            let item = list_item(&marker, &render_children(child), loose);
            if !item.is_empty() {
                items.push(item);
            }
        } else if child_name == "ul" || child_name == "ol" {
            // Sub-lists placed directly inside a list: nest them under the previous item.
            let nested = normalize(&render_element(child));
            if !nested.is_empty() {
                items.push(indent(&nested, "  "));
            }
        }
    }
    block(&items.join("\n"))
}

fn list_item(marker: &str, content: &str, loose: bool) -> String {
    let mut content = normalize(content);
    if content.is_empty() {
        return String::new();
    }
    if !loose {
        content = content.replace("\n\n", "\n");
    }
    let continuation = " ".repeat(marker.len() + 1);
    let mut lines = content.split('\n');
    let first = lines.next().unwrap_or("");
    let mut out = format!("{marker} {first}");
    for line in lines {
        out.push('\n');
        if !line.is_empty() {
            out.push_str(&continuation);
            out.push_str(line);
        }
    }
    out
}

fn indent(content: &str, prefix: &str) -> String {
    content
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn blockquote(content: &str) -> String {
    let content = normalize(content);
    let quoted = content
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    block(&quoted)
}

fn table(element: ElementRef<'_>) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for row in element
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
    {
        let cells: Vec<String> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|cell| matches!(cell.value().name(), "td" | "th"))
            .map(|cell| single_line(&normalize(&render_children(cell))).replace('|', "\\|"))
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }
    let format_row = |cells: &[String]| {
        let mut padded: Vec<&str> = cells.iter().map(String::as_str).collect();
        padded.resize(columns, "");
        format!("| {} |", padded.join(" | "))
    };
    let mut lines = vec![format_row(rows[0].as_slice())];
    lines.push(format!("|{}", " --- |".repeat(columns)));
    for row in &rows[1..] {
        lines.push(format_row(row.as_slice()));
    }
    block(&lines.join("\n"))
}

/// Collapse runs of ASCII whitespace to a single space. Non-breaking spaces are kept.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Backslash-escape Markdown inline syntax. Words that are bare URLs are left
/// untouched so they can still be matched and rewritten verbatim.
fn escape_text(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            if word.starts_with("http://") || word.starts_with("https://") {
                word.to_string()
            } else {
                let mut escaped = String::with_capacity(word.len());
                for c in word.chars() {
                    if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '<') {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tidy assembled output: blank-only lines become empty, at most one empty line
/// in a row, no leading or trailing blank lines. Fenced code is kept verbatim.
fn normalize(rendered: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;
    for line in rendered.split('\n') {
        let trimmed = line.trim_start();
        match fence {
            Some(open) => {
                lines.push(line);
                if trimmed.starts_with(open) {
                    fence = None;
                }
                continue;
            }
            None => {
                if trimmed.starts_with("```") {
                    fence = Some("```");
                } else if trimmed.starts_with("~~~") {
                    fence = Some("~~~");
                }
            }
        }
        if line.trim().is_empty() {
            if lines.last().is_some_and(|last| !last.is_empty()) {
                lines.push("");
            }
        } else {
            // Two trailing spaces are a hard break and must survive.
            if line.ends_with("  ") {
                lines.push(line);
            } else {
                lines.push(line.trim_end());
            }
        }
    }
    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
