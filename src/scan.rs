// ABOUTME: Slide tree scanner for the slidefold application
// ABOUTME: Walks the slide root and produces fragments in deterministic presentation order

use crate::config::Config;
use crate::errors::{FoldError, Result};
use log::{debug, info};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// How a fragment's content is handed to reveal.js
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Markdown,
    Html,
}

impl FragmentKind {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("html") | Some("htm") => FragmentKind::Html,
            _ => FragmentKind::Markdown,
        }
    }
}

/// A single slide file discovered under the slide root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Path relative to the slide root
    pub relative_path: PathBuf,

    /// Position in scan order
    pub ordinal: usize,

    /// Folders between the slide root and the file, outermost first
    pub folders: Vec<String>,

    pub kind: FragmentKind,
    pub content: String,
}

impl Fragment {
    pub fn depth(&self) -> usize {
        self.folders.len()
    }

    /// Top-level folder, or `None` for files sitting directly in the root
    pub fn section(&self) -> Option<&str> {
        self.folders.first().map(String::as_str)
    }

    /// Relative path with forward slashes, for markers and logs
    pub fn display_path(&self) -> String {
        slash_path(&self.relative_path)
    }

    /// Same fragment with different content
    pub fn with_content(&self, content: String) -> Self {
        Self {
            content,
            ..self.clone()
        }
    }
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Hidden files and `_` partials are never slides
pub fn is_excluded_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

/// Sort key for a directory entry: folders compare by name, files by stem
pub fn sort_key(name: &str, is_dir: bool) -> (&str, u8, &str) {
    let stem = if is_dir {
        name
    } else {
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    };
    (stem, if is_dir { 0 } else { 1 }, name)
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_name = a.file_name().to_string_lossy();
    let b_name = b.file_name().to_string_lossy();
    sort_key(&a_name, a.file_type().is_dir()).cmp(&sort_key(&b_name, b.file_type().is_dir()))
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0 && is_excluded_name(&entry.file_name().to_string_lossy())
}

/// Scan the configured slide root for fragments
pub fn scan_slides(config: &Config) -> Result<Vec<Fragment>> {
    scan_dir(&config.slides_dir, config)
}

/// Scan `root` and return every recognized slide file in presentation order
pub fn scan_dir(root: &Path, config: &Config) -> Result<Vec<Fragment>> {
    if !root.exists() {
        return Err(FoldError::NotFoundError(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(FoldError::ValidationError(format!(
            "Slide root is not a directory: {:?}",
            root
        )));
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by(compare_entries)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    // The generated presentation may live inside the slide tree
    let output = fs::canonicalize(&config.output_path).ok();

    let mut fragments = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !config.is_slide_file(entry.path()) {
            continue;
        }
        if output.is_some() && fs::canonicalize(entry.path()).ok() == output {
            debug!("Skipping build output {:?}", entry.path());
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());

        let folders = relative_path
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let content =
            fs::read_to_string(entry.path()).map_err(|e| FoldError::read(entry.path(), e))?;

        debug!("Found fragment {:?}", relative_path);
        fragments.push(Fragment {
            kind: FragmentKind::from_path(&relative_path),
            ordinal: fragments.len(),
            relative_path,
            folders,
            content,
        });
    }

    info!("Scanned {} fragments under {:?}", fragments.len(), root);
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(fragments: &[Fragment]) -> Vec<String> {
        fragments.iter().map(Fragment::display_path).collect()
    }

    #[test]
    fn test_sort_key_puts_folders_before_same_named_files() {
        assert!(sort_key("intro", true) < sort_key("intro.md", false));
        assert!(sort_key("a.md", false) < sort_key("b", true));
        assert!(sort_key(".md", false) < sort_key("a", true));
    }

    #[test]
    fn test_scan_orders_lexically_and_nests() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "b/1.md", "B");
        write(root, "a/2.md", "A2");
        write(root, "a/1.md", "A1");
        write(root, "a/sub/1.md", "A-sub");
        write(root, "00-title.md", "Title");

        let fragments = scan_dir(root, &Config::default()).unwrap();
        assert_eq!(
            paths(&fragments),
            vec!["00-title.md", "a/1.md", "a/2.md", "a/sub/1.md", "b/1.md"]
        );
        assert_eq!(fragments[0].depth(), 0);
        assert_eq!(fragments[0].section(), None);
        assert_eq!(fragments[3].folders, vec!["a", "sub"]);
        assert_eq!(fragments[3].section(), Some("a"));
        assert_eq!(
            fragments.iter().map(|f| f.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_scan_folder_before_file_of_same_name() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "intro.md", "file");
        write(root, "intro/1.md", "folder");

        let fragments = scan_dir(root, &Config::default()).unwrap();
        assert_eq!(paths(&fragments), vec!["intro/1.md", "intro.md"]);
    }

    #[test]
    fn test_scan_skips_hidden_partials_and_unknown_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "a/1.md", "one");
        write(root, "a/.draft.md", "hidden");
        write(root, ".git/HEAD.md", "hidden dir");
        write(root, "a/_partial.html", "<p>partial</p>");
        write(root, "_shared/x.md", "partial dir");
        write(root, "a/diagram.mermaid", "graph TD");
        write(root, "a/notes.txt", "notes");

        let fragments = scan_dir(root, &Config::default()).unwrap();
        assert_eq!(paths(&fragments), vec!["a/1.md"]);
    }

    #[test]
    fn test_scan_empty_folders_yield_nothing() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("empty/deeper")).unwrap();
        let fragments = scan_dir(temp_dir.path(), &Config::default()).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_scan_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = scan_dir(&missing, &Config::default()).unwrap_err();
        assert!(matches!(err, FoldError::NotFoundError(p) if p == missing));
    }

    #[test]
    fn test_scan_non_utf8_fragment_is_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/1.md"), [0xffu8, 0xfe, 0xfd]).unwrap();

        let err = scan_dir(root, &Config::default()).unwrap_err();
        assert!(matches!(err, FoldError::ReadError { .. }));
    }

    #[test]
    fn test_scan_skips_build_output_inside_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "a/1.md", "one");
        write(root, "index.html", "<section>previous build</section>");

        let mut config = Config::default();
        config.output_path = root.join("index.html");
        let fragments = scan_dir(root, &config).unwrap();
        assert_eq!(paths(&fragments), vec!["a/1.md"]);

        // Any other HTML fragment is still picked up
        config.output_path = root.join("elsewhere.html");
        let fragments = scan_dir(root, &config).unwrap();
        assert_eq!(paths(&fragments), vec!["a/1.md", "index.html"]);
    }

    #[test]
    fn test_fragment_kind_from_extension() {
        assert_eq!(FragmentKind::from_path(Path::new("x/1.md")), FragmentKind::Markdown);
        assert_eq!(FragmentKind::from_path(Path::new("x/index.HTML")), FragmentKind::Html);
        assert_eq!(FragmentKind::from_path(Path::new("x/a.htm")), FragmentKind::Html);
    }
}
