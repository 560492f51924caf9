// ABOUTME: Configuration module for the slidefold application
// ABOUTME: Holds the build configuration, plugin set and environment variable handling

use crate::errors::{FoldError, Result};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8085;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_THEME: &str = "black";
pub const DEFAULT_SLIDES_DIR: &str = "slides";
pub const DEFAULT_TEMPLATE: &str = "base.html";
pub const DEFAULT_OUTPUT: &str = "index.html";
pub const DEFAULT_LOGO: &str = "logo.png";

/// Optional reveal.js plugins that the template can pull in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plugin {
    Markdown,
    Highlight,
    Notes,
    Math,
    Search,
    Zoom,
    Mermaid,
}

impl Plugin {
    pub const ALL: [Plugin; 7] = [
        Plugin::Markdown,
        Plugin::Highlight,
        Plugin::Notes,
        Plugin::Math,
        Plugin::Search,
        Plugin::Zoom,
        Plugin::Mermaid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Plugin::Markdown => "markdown",
            Plugin::Highlight => "highlight",
            Plugin::Notes => "notes",
            Plugin::Math => "math",
            Plugin::Search => "search",
            Plugin::Zoom => "zoom",
            Plugin::Mermaid => "mermaid",
        }
    }

    /// JavaScript global registered by the plugin bundle
    pub fn identifier(self) -> &'static str {
        match self {
            Plugin::Markdown => "RevealMarkdown",
            Plugin::Highlight => "RevealHighlight",
            Plugin::Notes => "RevealNotes",
            Plugin::Math => "RevealMath.KaTeX",
            Plugin::Search => "RevealSearch",
            Plugin::Zoom => "RevealZoom",
            Plugin::Mermaid => "RevealMermaid",
        }
    }

    /// Script path relative to the output directory
    pub fn script_path(self) -> &'static str {
        match self {
            Plugin::Markdown => "plugin/markdown/markdown.js",
            Plugin::Highlight => "plugin/highlight/highlight.js",
            Plugin::Notes => "plugin/notes/notes.js",
            Plugin::Math => "plugin/math/math.js",
            Plugin::Search => "plugin/search/search.js",
            Plugin::Zoom => "plugin/zoom/zoom.js",
            Plugin::Mermaid => "plugin/mermaid/mermaid.js",
        }
    }

    pub fn defaults() -> Vec<Plugin> {
        vec![Plugin::Markdown, Plugin::Highlight, Plugin::Notes]
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Plugin {
    type Err = FoldError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Plugin::ALL
            .iter()
            .copied()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| FoldError::ValidationError(format!("Unknown plugin: {}", s.trim())))
    }
}

/// Parse a comma separated plugin list, dropping duplicates but keeping order
pub fn parse_plugins(list: &[String]) -> Result<Vec<Plugin>> {
    let mut plugins = Vec::new();
    for item in list.iter().flat_map(|s| s.split(',')) {
        if item.trim().is_empty() {
            continue;
        }
        let plugin = item.parse::<Plugin>()?;
        if !plugins.contains(&plugin) {
            plugins.push(plugin);
        }
    }
    Ok(plugins)
}

/// Build configuration shared by every stage of the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; relative paths below are resolved against it
    pub project_root: PathBuf,

    /// Root folder holding the slide tree
    pub slides_dir: PathBuf,

    /// Base HTML template
    pub template_path: PathBuf,

    /// Generated presentation
    pub output_path: PathBuf,

    pub watch: bool,
    pub live_reload: bool,

    /// Serve the output directory over HTTP after building
    pub serve: bool,
    pub port: u16,

    pub theme: String,
    pub title: Option<String>,
    pub plugins: Vec<Plugin>,

    /// Stylesheets linked verbatim after the theme
    pub custom_css: Vec<String>,

    /// Scripts linked verbatim before the closing body tag
    pub custom_scripts: Vec<String>,

    pub logo: Option<PathBuf>,

    /// Quiet period before a rebuild starts
    pub debounce_ms: u64,

    /// Resolve data-load and data-load-code includes
    pub inline_includes: bool,

    /// Recognized slide file extensions, lowercase without the dot
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_root(".")
    }
}

impl Config {
    /// Create a configuration with the default layout under `root`
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let logo = root.join(DEFAULT_LOGO);
        Self {
            slides_dir: root.join(DEFAULT_SLIDES_DIR),
            template_path: root.join(DEFAULT_TEMPLATE),
            output_path: root.join(DEFAULT_OUTPUT),
            logo: logo.is_file().then_some(logo),
            project_root: root,
            watch: false,
            live_reload: false,
            serve: true,
            port: DEFAULT_PORT,
            theme: DEFAULT_THEME.to_string(),
            title: None,
            plugins: Plugin::defaults(),
            custom_css: Vec::new(),
            custom_scripts: Vec::new(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            inline_includes: true,
            extensions: ["md", "markdown", "html", "htm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Load configuration defaults from environment variables
    pub fn from_env(root: impl AsRef<Path>) -> Self {
        let mut config = Self::for_root(root);

        if let Some(port) = env::var("SLIDEFOLD_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            config.port = port;
        }
        if let Ok(theme) = env::var("SLIDEFOLD_THEME") {
            if !theme.trim().is_empty() {
                config.theme = theme.trim().to_string();
            }
        }
        if let Some(debounce) = env::var("SLIDEFOLD_DEBOUNCE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.debounce_ms = debounce;
        }

        config
    }

    /// Resolve a user supplied path against the project root
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Directory the dev server exposes
    pub fn output_dir(&self) -> PathBuf {
        match self.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Title used for the presentation, falling back to the project folder name
    pub fn presentation_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.project_root
            .canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Presentation".to_string())
    }

    /// Whether `name` carries a recognized slide extension
    pub fn is_slide_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    /// Check the startup invariants that make a build possible at all
    pub fn validate(&self) -> Result<()> {
        if !self.slides_dir.exists() {
            return Err(FoldError::NotFoundError(self.slides_dir.clone()));
        }
        if !self.slides_dir.is_dir() {
            return Err(FoldError::ValidationError(format!(
                "Slide root is not a directory: {:?}",
                self.slides_dir
            )));
        }
        if !self.template_path.is_file() {
            return Err(FoldError::NotFoundError(self.template_path.clone()));
        }
        if let Some(logo) = &self.logo {
            if !logo.is_file() {
                return Err(FoldError::NotFoundError(logo.clone()));
            }
        }
        if self.extensions.is_empty() {
            return Err(FoldError::ValidationError(
                "At least one slide extension is required".to_string(),
            ));
        }
        if self.output_path.file_name().is_none() {
            return Err(FoldError::ValidationError(format!(
                "Output path has no file name: {:?}",
                self.output_path
            )));
        }
        Ok(())
    }
}
