// ABOUTME: Slide merger for the slidefold application
// ABOUTME: Wraps scanned fragments in nested reveal.js section markers that mirror the folder tree

use crate::scan::{Fragment, FragmentKind};
use log::debug;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Separator regexes handed to the reveal.js markdown plugin
const HORIZONTAL_SEPARATOR: &str = r"^\r?\n---\r?\n$";
const VERTICAL_SEPARATOR: &str = r"^\r?\n--\r?\n$";

/// Placeholder the reveal.js markdown plugin turns back into `</script>`
const SCRIPT_END_PLACEHOLDER: &str = "__SCRIPT_END__";

fn script_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</script\s*>").expect("valid script end regex"))
}

/// All fragments folded into one slide document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDocument {
    pub content: String,

    /// Number of horizontal (top-level) slides
    pub sections: usize,

    pub fragments: usize,
}

/// Escape a value for use inside a double-quoted HTML attribute
pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Comment bodies cannot contain `--`
fn comment_safe(value: &str) -> String {
    value.replace("--", "- -")
}

struct MarkerStack {
    open: Vec<String>,
    out: String,
    sections: usize,
}

impl MarkerStack {
    fn close_to(&mut self, depth: usize) {
        while self.open.len() > depth {
            self.open.pop();
            self.out.push_str("</section>\n");
        }
    }

    fn open(&mut self, folder: &str) {
        if self.open.is_empty() {
            self.sections += 1;
        }
        self.open.push(folder.to_string());
        self.out.push_str(&format!(
            "<section data-folder=\"{}\">\n",
            escape_attr(&self.open.join("/"))
        ));
    }

    /// Move the open markers onto `folders`, closing and opening as needed
    fn align(&mut self, folders: &[String]) {
        let shared = self
            .open
            .iter()
            .zip(folders)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        self.close_to(shared);
        for folder in &folders[shared..] {
            self.open(folder);
        }
    }
}

/// Markdown as it sits inside the template script; only `</script>` can end it early
fn markdown_template_body(content: &str) -> Cow<'_, str> {
    script_end_regex().replace_all(content, SCRIPT_END_PLACEHOLDER)
}

fn push_fragment(out: &mut String, fragment: &Fragment) {
    out.push_str(&format!(
        "<!-- {} -->\n",
        comment_safe(&fragment.display_path())
    ));
    match fragment.kind {
        FragmentKind::Markdown => {
            out.push_str(&format!(
                "<section data-markdown data-separator=\"{}\" data-separator-vertical=\"{}\">\n",
                HORIZONTAL_SEPARATOR, VERTICAL_SEPARATOR
            ));
            out.push_str("<script type=\"text/template\">\n");
            let body = markdown_template_body(&fragment.content);
            out.push_str(&body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("</script>\n</section>\n");
        }
        FragmentKind::Html => {
            out.push_str(&fragment.content);
            if !fragment.content.ends_with('\n') {
                out.push('\n');
            }
        }
    }
}

/// Merge fragments, already in presentation order, into a single document
pub fn merge_fragments(fragments: &[Fragment]) -> MergedDocument {
    let mut stack = MarkerStack {
        open: Vec::new(),
        out: String::new(),
        sections: 0,
    };

    for fragment in fragments {
        stack.align(&fragment.folders);
        if fragment.folders.is_empty() {
            // Root-level files are horizontal slides of their own
            stack.sections += 1;
        }
        push_fragment(&mut stack.out, fragment);
    }
    stack.close_to(0);

    debug!(
        "Merged {} fragments into {} top-level sections",
        fragments.len(),
        stack.sections
    );

    MergedDocument {
        content: stack.out,
        sections: stack.sections,
        fragments: fragments.len(),
    }
}
