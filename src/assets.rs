// ABOUTME: Asset handling for the slidefold application
// ABOUTME: Relocates ./-relative references and inlines data-load / data-load-code includes

use crate::config::Config;
use crate::errors::{FoldError, Result};
use crate::scan::{slash_path, Fragment};
use crate::utils;
use log::{debug, warn};
use regex::{Captures, Regex};
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Upper bound on inlined elements per document; include cycles hit it
const MAX_INCLUDES: usize = 256;

fn attr_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\b(src|href|poster|data-src|data-load|data-load-code|data-background-image|data-background-video|data-background-iframe)="\./"#,
        )
        .expect("valid attribute regex")
    })
}

fn markdown_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\]\(\./").expect("valid markdown link regex"))
}

fn open_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z][A-Za-z0-9-]*)(\s[^<>]*)?>").expect("valid tag regex"))
}

fn tag_boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9-]*)[\s/>]").expect("valid tag boundary regex"))
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("valid attribute regex")
    })
}

/// Language identifier used for syntax highlighting of inlined code
pub fn language_for(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let lang = match ext.as_str() {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "css" => "css",
        "html" => "html",
        "xml" => "xml",
        "json" => "json",
        "md" => "markdown",
        "sh" => "bash",
        "sql" => "sql",
        "java" => "java",
        "c" => "c",
        "cpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "mermaid" => "mermaid",
        "" => "text",
        other => other,
    };
    lang.to_string()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Relative path from `base` to `target`, both taken as directories
///
/// Both sides are resolved through [`utils::get_absolute_path`], so a base
/// directory that does not exist yet compares the same as an existing one.
pub fn relative_path(target: &Path, base: &Path) -> Result<PathBuf> {
    let target = utils::get_absolute_path(target)?;
    let base = utils::get_absolute_path(base)?;

    let target_parts: Vec<Component> = target.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let shared = target_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in shared..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[shared..] {
        rel.push(part.as_os_str());
    }
    Ok(rel)
}

/// Rewrite `./` references so they resolve from the output directory
pub fn relocate(content: &str, prefix: &str) -> String {
    let base = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix.trim_end_matches('/'))
    };
    let content = attr_ref_regex().replace_all(content, |caps: &Captures| {
        format!("{}=\"{}", &caps[1], base)
    });
    markdown_ref_regex()
        .replace_all(&content, |_: &Captures| format!("]({}", base))
        .into_owned()
}

/// Copy of `fragment` whose relative references point at its own folder
pub fn relocate_fragment(fragment: &Fragment, config: &Config) -> Result<Fragment> {
    let dir = match fragment.relative_path.parent() {
        Some(parent) => config.slides_dir.join(parent),
        None => config.slides_dir.clone(),
    };
    let prefix = slash_path(&relative_path(&dir, &config.output_dir())?);
    Ok(fragment.with_content(relocate(&fragment.content, &prefix)))
}

struct Include {
    start: usize,
    open_end: usize,
    tag: String,
    /// Opening tag attributes with the load attribute removed
    attrs: String,
    /// Every attribute as written, in order
    attr_list: Vec<Attribute>,
    path: String,
    as_code: bool,
    self_closing: bool,
}

struct Attribute {
    name: String,
    value: String,
    /// Byte span within the raw attribute text
    span: Range<usize>,
}

fn parse_attributes(raw: &str) -> Vec<Attribute> {
    attribute_regex()
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some(Attribute {
                name: caps[1].to_string(),
                value,
                span: whole.range(),
            })
        })
        .collect()
}

/// `raw` without the attribute at `span` and the whitespace before it
fn remove_attribute(raw: &str, span: &Range<usize>) -> String {
    let start = raw[..span.start].trim_end().len();
    format!("{}{}", &raw[..start], &raw[span.end..])
}

fn next_include(html: &str, from: usize) -> Option<Include> {
    for caps in open_tag_regex().captures_iter(&html[from..]) {
        let whole = caps.get(0)?;
        let raw_attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let attr_list = parse_attributes(raw_attrs);

        let Some(load) = attr_list
            .iter()
            .find(|a| a.name == "data-load" || a.name == "data-load-code")
        else {
            continue;
        };
        let as_code = load.name == "data-load-code";
        let path = load.value.clone();

        let stripped = remove_attribute(raw_attrs, &load.span);
        let self_closing = stripped.trim_end().ends_with('/');
        let attrs = if self_closing {
            stripped.trim_end().trim_end_matches('/').trim_end().to_string()
        } else {
            stripped
        };

        return Some(Include {
            start: from + whole.start(),
            open_end: from + whole.end(),
            tag: caps[1].to_string(),
            attrs,
            path,
            as_code,
            self_closing,
            attr_list,
        });
    }
    None
}

/// Span `(start, end)` of the tag closing the element opened before `from`
fn find_close(html: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    for caps in tag_boundary_regex().captures_iter(&html[from..]) {
        if !caps[2].eq_ignore_ascii_case(tag) {
            continue;
        }
        let m = caps.get(0)?;
        if caps[1].is_empty() {
            depth += 1;
        } else {
            depth -= 1;
            if depth == 0 {
                let start = from + m.start();
                let end = start + html[start..].find('>')? + 1;
                return Some((start, end));
            }
        }
    }
    None
}

fn body_contents(html: &str) -> &str {
    let lower = html.to_ascii_lowercase();
    let Some(open) = lower.find("<body") else {
        return html;
    };
    let Some(open_end) = lower[open..].find('>').map(|i| open + i + 1) else {
        return html;
    };
    match lower[open_end..].rfind("</body") {
        Some(close) => &html[open_end..open_end + close],
        None => &html[open_end..],
    }
}

fn code_block(include: &Include, content: &str) -> String {
    let mut code_attrs = String::new();
    for attr in &include.attr_list {
        let name = attr.name.as_str();
        if name.starts_with("data-") && name != "data-load-code" && name != "data-load" {
            if attr.value.is_empty() {
                code_attrs.push_str(&format!(" {}", name));
            } else {
                code_attrs.push_str(&format!(" {}=\"{}\"", name, escape_html(&attr.value)));
            }
        }
    }
    format!(
        "<pre><code class=\"language-{}\"{}>{}</code></pre>",
        language_for(Path::new(&include.path)),
        code_attrs,
        escape_html(content)
    )
}

fn render_include(include: &Include, content: &str) -> String {
    if include.as_code {
        return code_block(include, content);
    }
    let ext = Path::new(&include.path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => {
            let dir = include
                .path
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or("");
            relocate(body_contents(content), dir)
        }
        "mermaid" => format!(
            "<span class=\"diagram-data\" style=\"display: none\">{}</span><div class=\"diagram-display\"></div>",
            escape_html(content)
        ),
        _ => code_block(include, content),
    }
}

/// Inline every `data-load` and `data-load-code` element, resolving paths against `base_dir`
pub fn resolve_includes(html: &str, base_dir: &Path) -> Result<String> {
    let mut doc = html.to_string();
    let mut cursor = 0;
    let mut inlined = 0;

    while let Some(include) = next_include(&doc, cursor) {
        if include.path.contains("://") {
            warn!("Skipping remote include {}", include.path);
            cursor = include.open_end;
            continue;
        }

        let file = base_dir.join(include.path.trim_start_matches('/'));
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Include not found: {:?}", file);
                cursor = include.open_end;
                continue;
            }
            Err(e) => return Err(FoldError::read(file, e)),
        };

        let element_end = if include.self_closing {
            include.open_end
        } else {
            match find_close(&doc, &include.tag, include.open_end) {
                Some((_, end)) => end,
                None => {
                    warn!(
                        "Unclosed <{}> for include {}; leaving it in place",
                        include.tag, include.path
                    );
                    cursor = include.open_end;
                    continue;
                }
            }
        };

        inlined += 1;
        if inlined > MAX_INCLUDES {
            return Err(FoldError::ValidationError(format!(
                "More than {} includes resolved; is {} including itself?",
                MAX_INCLUDES, include.path
            )));
        }

        debug!("Inlining {:?} into <{}>", file, include.tag);
        let replacement = format!(
            "<{}{}>{}</{}>",
            include.tag,
            include.attrs,
            render_include(&include, &content),
            include.tag
        );
        doc.replace_range(include.start..element_end, &replacement);
        // Rescan the inserted markup for nested includes
        cursor = include.start;
    }

    Ok(doc)
}
