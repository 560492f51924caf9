// ABOUTME: Main entry point for the slidefold program.
// ABOUTME: Parses CLI flags, builds the presentation and runs the dev server and watch loop.

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use slidefold::config::parse_plugins;
use slidefold::{Config, DevServer, LoopMessage, ReloadHub};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Watch the slide tree and rebuild on changes
    #[arg(long)]
    watch: bool,

    /// Reload connected browsers after each rebuild (implies --watch)
    #[arg(long)]
    live_reload: bool,

    /// Port for the dev server
    #[arg(short, long)]
    port: Option<u16>,

    /// Project root holding the slides folder and base template
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Folder containing the slide tree, relative to the root
    #[arg(long)]
    slides_dir: Option<PathBuf>,

    /// Base HTML template, relative to the root
    #[arg(long)]
    template: Option<PathBuf>,

    /// Generated presentation, relative to the root
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// reveal.js theme name
    #[arg(long)]
    theme: Option<String>,

    /// Presentation title (defaults to the project folder name)
    #[arg(long)]
    title: Option<String>,

    /// reveal.js plugins to enable
    #[arg(long, value_delimiter = ',')]
    plugins: Option<Vec<String>>,

    /// Extra stylesheets to link
    #[arg(long, value_delimiter = ',')]
    css: Option<Vec<String>>,

    /// Extra scripts to link
    #[arg(long, value_delimiter = ',')]
    js: Option<Vec<String>>,

    /// Logo image (defaults to logo.png in the root when present)
    #[arg(long, conflicts_with = "no_logo")]
    logo: Option<PathBuf>,

    /// Do not show a logo
    #[arg(long)]
    no_logo: bool,

    /// Quiet period before a rebuild, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Leave data-load / data-load-code elements untouched
    #[arg(long)]
    no_inline: bool,

    /// Build once and exit without serving
    #[arg(long, conflicts_with_all = ["watch", "live_reload"])]
    build_only: bool,
}

impl Cli {
    fn into_config(self) -> slidefold::Result<Config> {
        let mut config = Config::from_env(&self.root);

        if let Some(dir) = &self.slides_dir {
            config.slides_dir = config.resolve(dir);
        }
        if let Some(template) = &self.template {
            config.template_path = config.resolve(template);
        }
        if let Some(output) = &self.output {
            config.output_path = config.resolve(output);
        }
        if let Some(logo) = &self.logo {
            config.logo = Some(config.resolve(logo));
        }
        if self.no_logo {
            config.logo = None;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(theme) = self.theme {
            config.theme = theme;
        }
        if let Some(plugins) = &self.plugins {
            config.plugins = parse_plugins(plugins)?;
        }
        if let Some(debounce) = self.debounce_ms {
            config.debounce_ms = debounce;
        }

        config.title = self.title;
        config.custom_css = self.css.unwrap_or_default();
        config.custom_scripts = self.js.unwrap_or_default();
        config.live_reload = self.live_reload;
        config.watch = self.watch || self.live_reload;
        config.serve = !self.build_only;
        config.inline_includes = !self.no_inline;

        Ok(config)
    }
}

/// Forward Ctrl+C / SIGTERM to the main loop as a shutdown message
fn spawn_signal_listener(tx: Sender<LoopMessage>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    thread::spawn(move || {
        runtime.block_on(shutdown_signal());
        let _ = tx.send(LoopMessage::Shutdown);
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    config.validate().context("Cannot build presentation")?;

    let report = slidefold::build_presentation(&config).context("Initial build failed")?;
    println!(
        "Built {:?} with {} slides from {} fragments.",
        report.output, report.sections, report.fragments
    );

    if !config.serve {
        return Ok(());
    }

    let hub = config.live_reload.then(|| Arc::new(ReloadHub::new()));
    let server = DevServer::start(&config, hub.clone())?;
    let index = config
        .output_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    println!(
        "Serving on port {}. Open http://localhost:{}/{}",
        server.port(),
        server.port(),
        index
    );
    if config.live_reload {
        println!("Live reload enabled - browser will auto-refresh on file changes");
    }

    let (tx, rx) = mpsc::channel();
    spawn_signal_listener(tx.clone())?;

    let outcome = if config.watch {
        slidefold::watch_slides(&config, hub, tx, rx).context("Watch mode failed")
    } else {
        drop(tx);
        // Block until a shutdown signal arrives
        while let Ok(message) = rx.recv() {
            if message == LoopMessage::Shutdown {
                break;
            }
        }
        Ok(())
    };

    server.shutdown();
    info!("Shutdown complete");
    outcome
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
