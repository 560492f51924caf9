// ABOUTME: Library module for the slidefold program.
// ABOUTME: Contains the scan, merge, render and watch stages behind the CLI.

pub mod assets;
pub mod config;
pub mod errors;
pub mod merge;
pub mod pipeline;
pub mod scan;
pub mod server;
pub mod template;
pub mod utils;
pub mod watch;

// Reexport common types and functions
pub use config::{Config, Plugin};
pub use errors::{FoldError, Result};
pub use merge::{merge_fragments, MergedDocument};
pub use pipeline::{build_presentation, render_presentation, BuildReport};
pub use scan::{scan_dir, scan_slides, Fragment, FragmentKind};
pub use server::{DevServer, ReloadHub};
pub use template::Template;
pub use watch::{run_rebuild_loop, watch_slides, LoopMessage, RebuildScheduler, WatchState};
