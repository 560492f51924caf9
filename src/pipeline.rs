// ABOUTME: Build pipeline for the slidefold application
// ABOUTME: Runs scan, relocate, merge, include resolution and rendering, then writes the output atomically

use crate::assets::{relocate_fragment, resolve_includes};
use crate::config::Config;
use crate::errors::Result;
use crate::merge::{merge_fragments, MergedDocument};
use crate::scan::scan_slides;
use crate::template::Template;
use crate::utils;
use log::info;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Summary of a successful build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub output: PathBuf,
    pub fragments: usize,
    pub sections: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Produce the merged document with relocated references and resolved includes
pub fn merge_presentation(config: &Config) -> Result<MergedDocument> {
    let fragments = scan_slides(config)?
        .iter()
        .map(|fragment| relocate_fragment(fragment, config))
        .collect::<Result<Vec<_>>>()?;

    let merged = merge_fragments(&fragments);
    if !config.inline_includes {
        return Ok(merged);
    }

    Ok(MergedDocument {
        content: resolve_includes(&merged.content, &config.output_dir())?,
        ..merged
    })
}

/// Render the whole presentation in memory
pub fn render_presentation(config: &Config) -> Result<(MergedDocument, String)> {
    let template = Template::load(&config.template_path)?;
    let merged = merge_presentation(config)?;
    let html = template.render(&merged, config)?;
    Ok((merged, html))
}

/// Run one full build and replace the output file
///
/// On failure the previous output, if any, is left untouched.
pub fn build_presentation(config: &Config) -> Result<BuildReport> {
    let started = Instant::now();
    info!("Building presentation from {:?}", config.slides_dir);

    let (merged, html) = render_presentation(config)?;
    utils::write_atomic(&config.output_path, html.as_bytes())?;

    let report = BuildReport {
        output: config.output_path.clone(),
        fragments: merged.fragments,
        sections: merged.sections,
        bytes: html.len(),
        elapsed: started.elapsed(),
    };
    info!(
        "Built {:?}: {} fragments in {} sections ({} bytes, {:?})",
        report.output, report.fragments, report.sections, report.bytes, report.elapsed
    );
    Ok(report)
}
