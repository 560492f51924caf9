// ABOUTME: Template rendering for the slidefold application
// ABOUTME: Substitutes {{placeholders}} in the base HTML template and injects the live reload client

use crate::assets::relative_path;
use crate::config::Config;
use crate::errors::{FoldError, Result};
use crate::merge::{escape_attr, MergedDocument};
use crate::scan::slash_path;
use crate::server::{RELOAD_POLL_PATH, RELOAD_SOCKET_PATH};
use log::debug;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

const LIVE_RELOAD_SCRIPT: &str = r#"<script>
(function () {
  var generation = null;
  function poll() {
    fetch("__POLL_PATH__" + (generation === null ? "" : "?since=" + generation), { cache: "no-store" })
      .then(function (response) { return response.json(); })
      .then(function (data) {
        if (generation !== null && data.reload) {
          window.location.reload();
          return;
        }
        generation = data.generation;
      })
      .catch(function () {})
      .finally(function () { setTimeout(poll, 1000); });
  }
  function connect() {
    if (!("WebSocket" in window)) {
      poll();
      return;
    }
    var scheme = window.location.protocol === "https:" ? "wss://" : "ws://";
    var socket = new WebSocket(scheme + window.location.host + "__SOCKET_PATH__");
    var opened = false;
    socket.onopen = function () { opened = true; };
    socket.onmessage = function (event) {
      if (event.data === "reload") {
        window.location.reload();
      }
    };
    socket.onclose = function () {
      if (opened) {
        setTimeout(connect, 1000);
      } else {
        poll();
      }
    };
  }
  connect();
})();
</script>
"#;

/// Named substitution points in the base template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Slides,
    Title,
    Theme,
    Plugins,
    PluginScripts,
    CustomCss,
    CustomScripts,
    Logo,
}

impl Placeholder {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "slides" => Placeholder::Slides,
            "title" => Placeholder::Title,
            "theme" => Placeholder::Theme,
            "plugins" => Placeholder::Plugins,
            "plugin_scripts" => Placeholder::PluginScripts,
            "custom_css" => Placeholder::CustomCss,
            "custom_scripts" => Placeholder::CustomScripts,
            "logo" => Placeholder::Logo,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Placeholder),
}

/// A parsed base template
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

fn legacy_slot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)(<div class="slides">)\s*</div>"#).expect("valid slides container regex")
    })
}

impl Template {
    /// Read and parse the template at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                FoldError::NotFoundError(path.to_path_buf())
            } else {
                FoldError::read(path, e)
            }
        })?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                FoldError::TemplateError(format!(
                    "Unterminated placeholder near {:?}",
                    after.chars().take(20).collect::<String>()
                ))
            })?;
            let name = after[..close].trim();
            let slot = Placeholder::from_name(name).ok_or_else(|| {
                FoldError::TemplateError(format!("Unknown placeholder {{{{{}}}}}", name))
            })?;

            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            segments.push(Segment::Slot(slot));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        if !segments.contains(&Segment::Slot(Placeholder::Slides)) {
            segments = Self::with_legacy_slot(segments)?;
        }

        Ok(Self { segments })
    }

    /// Templates written for plain reveal.js mark the slot with an empty slides container
    fn with_legacy_slot(segments: Vec<Segment>) -> Result<Vec<Segment>> {
        let re = legacy_slot_regex();
        let mut out = Vec::with_capacity(segments.len() + 2);
        let mut found = false;

        for segment in segments {
            match segment {
                Segment::Text(text) if !found => match re.captures(&text) {
                    Some(caps) => {
                        let whole = caps.get(0).expect("match has group 0");
                        out.push(Segment::Text(format!("{}{}\n", &text[..whole.start()], &caps[1])));
                        out.push(Segment::Slot(Placeholder::Slides));
                        out.push(Segment::Text(format!("</div>{}", &text[whole.end()..])));
                        found = true;
                    }
                    None => out.push(Segment::Text(text)),
                },
                other => out.push(other),
            }
        }

        if !found {
            return Err(FoldError::TemplateError(
                "Template has no {{slides}} placeholder".to_string(),
            ));
        }
        Ok(out)
    }

    pub fn has(&self, placeholder: Placeholder) -> bool {
        self.segments.contains(&Segment::Slot(placeholder))
    }

    /// Produce the final HTML for `doc`
    pub fn render(&self, doc: &MergedDocument, config: &Config) -> Result<String> {
        let logo = logo_html(config)?;
        let mut html = String::with_capacity(doc.content.len() + 4096);

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => html.push_str(text),
                Segment::Slot(Placeholder::Slides) => html.push_str(&doc.content),
                Segment::Slot(Placeholder::Title) => {
                    html.push_str(&escape_attr(&config.presentation_title()))
                }
                Segment::Slot(Placeholder::Theme) => html.push_str(&escape_attr(&config.theme)),
                Segment::Slot(Placeholder::Plugins) => html.push_str(
                    &config
                        .plugins
                        .iter()
                        .map(|p| p.identifier())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Segment::Slot(Placeholder::PluginScripts) => {
                    for plugin in &config.plugins {
                        html.push_str(&format!(
                            "<script src=\"{}\"></script>\n",
                            plugin.script_path()
                        ));
                    }
                }
                Segment::Slot(Placeholder::CustomCss) => {
                    for css in &config.custom_css {
                        html.push_str(&format!(
                            "<link rel=\"stylesheet\" href=\"{}\">\n",
                            escape_attr(css)
                        ));
                    }
                }
                Segment::Slot(Placeholder::CustomScripts) => {
                    for js in &config.custom_scripts {
                        html.push_str(&format!("<script src=\"{}\"></script>\n", escape_attr(js)));
                    }
                }
                Segment::Slot(Placeholder::Logo) => html.push_str(&logo),
            }
        }

        if config.live_reload {
            html = inject_live_reload(&html)?;
        }

        debug!("Rendered {} bytes of HTML", html.len());
        Ok(html)
    }
}

/// Logo element, or an empty string when no logo is configured
fn logo_html(config: &Config) -> Result<String> {
    let Some(logo) = &config.logo else {
        return Ok(String::new());
    };
    if !logo.is_file() {
        return Err(FoldError::NotFoundError(logo.clone()));
    }
    let dir = logo.parent().unwrap_or(Path::new("."));
    let mut src = slash_path(&relative_path(dir, &config.output_dir())?);
    if !src.is_empty() {
        src.push('/');
    }
    src.push_str(&logo.file_name().unwrap_or_default().to_string_lossy());
    Ok(format!(
        "<img class=\"logo\" src=\"{}\" alt=\"logo\">",
        escape_attr(&src)
    ))
}

/// Insert the reload client right before the closing body tag
pub fn inject_live_reload(html: &str) -> Result<String> {
    let at = html.to_ascii_lowercase().rfind("</body>").ok_or_else(|| {
        FoldError::TemplateError("Live reload needs a </body> tag in the template".to_string())
    })?;
    let script = LIVE_RELOAD_SCRIPT
        .replace("__POLL_PATH__", RELOAD_POLL_PATH)
        .replace("__SOCKET_PATH__", RELOAD_SOCKET_PATH);

    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..at]);
    out.push_str(&script);
    out.push_str(&html[at..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Plugin;
    use tempfile::TempDir;

    const BASE: &str = "<html><head><title>{{title}}</title>\
<link rel=\"stylesheet\" href=\"dist/theme/{{ theme }}.css\">{{custom_css}}</head>\
<body>{{logo}}<div class=\"reveal\"><div class=\"slides\">{{slides}}</div></div>\
{{plugin_scripts}}<script>Reveal.initialize({ plugins: [ {{plugins}} ] });</script>{{custom_scripts}}</body></html>";

    fn doc(content: &str) -> MergedDocument {
        MergedDocument {
            content: content.to_string(),
            sections: 1,
            fragments: 1,
        }
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::for_root(root);
        config.title = Some("Deck".to_string());
        config
    }

    #[test]
    fn test_render_substitutes_every_placeholder() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.theme = "moon".to_string();
        config.plugins = vec![Plugin::Markdown, Plugin::Zoom];
        config.custom_css = vec!["css/extra.css".to_string()];
        config.custom_scripts = vec!["js/extra.js".to_string()];

        let html = Template::parse(BASE)
            .unwrap()
            .render(&doc("<section>S</section>"), &config)
            .unwrap();

        assert!(html.contains("<title>Deck</title>"));
        assert!(html.contains("dist/theme/moon.css"));
        assert!(html.contains("<div class=\"slides\"><section>S</section></div>"));
        assert!(html.contains("plugins: [ RevealMarkdown, RevealZoom ]"));
        assert!(html.contains("<script src=\"plugin/zoom/zoom.js\"></script>"));
        assert!(html.contains("<link rel=\"stylesheet\" href=\"css/extra.css\">"));
        assert!(html.contains("<script src=\"js/extra.js\"></script>"));
        assert!(!html.contains("{{"));
        assert!(!html.contains("class=\"logo\""));
        assert!(!html.contains("WebSocket"));
    }

    #[test]
    fn test_missing_slides_placeholder_is_template_error() {
        let err = Template::parse("<html><body>{{theme}}</body></html>").unwrap_err();
        assert!(matches!(err, FoldError::TemplateError(_)));
    }

    #[test]
    fn test_unknown_and_unterminated_placeholders() {
        assert!(matches!(
            Template::parse("{{slides}} {{bogus}}"),
            Err(FoldError::TemplateError(_))
        ));
        assert!(matches!(
            Template::parse("{{slides}} {{theme"),
            Err(FoldError::TemplateError(_))
        ));
    }

    #[test]
    fn test_legacy_slides_container() {
        let template = Template::parse(
            "<body><div class=\"reveal\"><div class=\"slides\">\n  </div></div></body>",
        )
        .unwrap();
        assert!(template.has(Placeholder::Slides));

        let temp_dir = TempDir::new().unwrap();
        let html = template
            .render(&doc("<section>X</section>"), &config(temp_dir.path()))
            .unwrap();
        assert_eq!(
            html,
            "<body><div class=\"reveal\"><div class=\"slides\">\n<section>X</section></div></div></body>"
        );
    }

    #[test]
    fn test_live_reload_injected_before_body_close() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.live_reload = true;

        let html = Template::parse(BASE)
            .unwrap()
            .render(&doc(""), &config)
            .unwrap();
        let script = html.find(RELOAD_POLL_PATH).unwrap();
        assert!(html.contains(RELOAD_SOCKET_PATH));
        assert!(script < html.find("</body>").unwrap());
        assert!(html.ends_with("</script>\n</body></html>"));
    }

    #[test]
    fn test_live_reload_without_body_is_template_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.live_reload = true;

        let err = Template::parse("{{slides}}")
            .unwrap()
            .render(&doc(""), &config)
            .unwrap_err();
        assert!(matches!(err, FoldError::TemplateError(_)));
    }

    #[test]
    fn test_logo_rendered_relative_to_output() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("logo.png"), b"png").unwrap();
        let config = config(temp_dir.path());

        let html = Template::parse(BASE)
            .unwrap()
            .render(&doc(""), &config)
            .unwrap();
        assert!(html.contains("<img class=\"logo\" src=\"logo.png\" alt=\"logo\">"));
    }

    #[test]
    fn test_missing_logo_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.logo = Some(temp_dir.path().join("gone.png"));

        let err = Template::parse(BASE)
            .unwrap()
            .render(&doc(""), &config)
            .unwrap_err();
        assert!(matches!(err, FoldError::NotFoundError(_)));
    }

    #[test]
    fn test_load_missing_template() {
        let temp_dir = TempDir::new().unwrap();
        let err = Template::load(&temp_dir.path().join("base.html")).unwrap_err();
        assert!(matches!(err, FoldError::NotFoundError(_)));
    }
}
