// ABOUTME: Watch module for monitoring the slide tree and rebuilding the presentation
// ABOUTME: Debounces filesystem events, serializes rebuilds and triggers live reload

use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};

use crate::config::Config;
use crate::errors::Result;
use crate::pipeline::build_presentation;
use crate::server::ReloadHub;
use crate::utils;

/// Window used by notify-debouncer-full to collapse raw events before they
/// reach the rebuild scheduler
const EVENT_TICK: Duration = Duration::from_millis(50);

/// Messages consumed by the rebuild loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopMessage {
    /// Relevant paths changed on disk
    Changed(Vec<PathBuf>),

    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    WaitingDebounce { deadline: Instant },
    Building,
}

/// Debounce and serialization rules for rebuilds
///
/// Changes arriving while idle or waiting (re)arm the debounce deadline.
/// Changes arriving while a build runs are remembered and arm the deadline
/// once the build finishes, so exactly one follow-up build happens.
#[derive(Debug)]
pub struct RebuildScheduler {
    state: WatchState,
    debounce: Duration,
    pending: bool,
}

impl RebuildScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: WatchState::Idle,
            debounce,
            pending: false,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn on_change(&mut self, now: Instant) {
        match self.state {
            WatchState::Idle | WatchState::WaitingDebounce { .. } => {
                self.state = WatchState::WaitingDebounce {
                    deadline: now + self.debounce,
                };
            }
            WatchState::Building => self.pending = true,
        }
    }

    /// How long the loop may block before the scheduler needs attention;
    /// `None` means wait for the next message indefinitely
    pub fn wait_timeout(&self, now: Instant) -> Option<Duration> {
        match self.state {
            WatchState::WaitingDebounce { deadline } => {
                Some(deadline.saturating_duration_since(now))
            }
            WatchState::Idle | WatchState::Building => None,
        }
    }

    /// Enter `Building` when the debounce deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            WatchState::WaitingDebounce { deadline } if now >= deadline => {
                self.state = WatchState::Building;
                true
            }
            _ => false,
        }
    }

    pub fn finish_build(&mut self, now: Instant) {
        if self.state != WatchState::Building {
            return;
        }
        if std::mem::take(&mut self.pending) {
            self.state = WatchState::WaitingDebounce {
                deadline: now + self.debounce,
            };
        } else {
            self.state = WatchState::Idle;
        }
    }
}

/// Drive `rebuild` from the message channel until shutdown
///
/// Returns the number of rebuilds performed.
pub fn run_rebuild_loop<F>(rx: &Receiver<LoopMessage>, debounce: Duration, mut rebuild: F) -> usize
where
    F: FnMut(),
{
    let mut scheduler = RebuildScheduler::new(debounce);
    let mut builds = 0;

    loop {
        let message = match scheduler.wait_timeout(Instant::now()) {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(LoopMessage::Changed(paths)) => {
                debug!("Change detected in {:?}", paths);
                scheduler.on_change(Instant::now());
            }
            Ok(LoopMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if !scheduler.poll(Instant::now()) {
            continue;
        }

        rebuild();
        builds += 1;

        let mut shutdown = false;
        while let Ok(message) = rx.try_recv() {
            match message {
                LoopMessage::Changed(paths) => {
                    debug!("Change during rebuild in {:?}", paths);
                    scheduler.on_change(Instant::now());
                }
                LoopMessage::Shutdown => shutdown = true,
            }
        }
        scheduler.finish_build(Instant::now());
        if shutdown {
            break;
        }
    }

    builds
}

/// Paths whose changes should trigger a rebuild
#[derive(Debug, Clone)]
pub struct WatchTargets {
    pub slides_root: PathBuf,

    /// Individual files outside the slide tree (template, logo)
    pub files: Vec<PathBuf>,

    /// Generated output, never a trigger
    pub output: PathBuf,
}

impl WatchTargets {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut files = vec![utils::get_absolute_path(&config.template_path)?];
        if let Some(logo) = &config.logo {
            files.push(utils::get_absolute_path(logo)?);
        }
        Ok(Self {
            slides_root: utils::get_absolute_path(&config.slides_dir)?,
            files,
            output: utils::get_absolute_path(&config.output_path)?,
        })
    }

    /// Directories to watch non-recursively so the extra files are covered
    /// even when editors replace them
    pub fn file_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .filter(|dir| !dir.starts_with(&self.slides_root))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        if path == self.output.as_path() || utils::is_temp_artifact(path) {
            return false;
        }
        if self.files.iter().any(|f| f == path) {
            return true;
        }
        match path.strip_prefix(&self.slides_root) {
            Ok(rel) => !rel
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.')),
            Err(_) => false,
        }
    }
}

/// Watch the slide tree and rebuild until a [`LoopMessage::Shutdown`] arrives on `rx`
///
/// `tx` must feed `rx`; the watcher forwards filesystem changes through it.
pub fn watch_slides(
    config: &Config,
    hub: Option<Arc<ReloadHub>>,
    tx: Sender<LoopMessage>,
    rx: Receiver<LoopMessage>,
) -> Result<()> {
    let targets = WatchTargets::from_config(config)?;
    let filter = targets.clone();

    let mut debouncer = new_debouncer(EVENT_TICK, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events
                    .iter()
                    .flat_map(|event| event.paths.iter())
                    .filter(|path| filter.is_relevant(path))
                    .cloned()
                    .collect();
                if !paths.is_empty() && tx.send(LoopMessage::Changed(paths)).is_err() {
                    debug!("Rebuild loop has stopped; dropping change event");
                }
            }
            Err(errors) => {
                for e in errors {
                    error!("Watch error: {:?}", e);
                }
            }
        }
    })?;

    debouncer
        .watcher()
        .watch(&targets.slides_root, RecursiveMode::Recursive)?;
    for dir in targets.file_dirs() {
        debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive)?;
    }

    info!("Watching for changes in {:?}", targets.slides_root);
    println!(
        "Watching for changes in {:?} (Press Ctrl+C to stop)",
        config.slides_dir
    );

    let builds = run_rebuild_loop(&rx, config.debounce(), || {
        match build_presentation(config) {
            Ok(report) => {
                println!(
                    "Rebuilt {:?} ({} slides) in {:?}",
                    report.output, report.sections, report.elapsed
                );
                if let Some(hub) = &hub {
                    let clients = hub.notify_reload();
                    info!("Reload signal sent to {} connected clients", clients);
                }
            }
            // Keep serving the previous output; the next change retries
            Err(e) => error!("Rebuild failed: {}", e),
        }
    });

    info!("Watch loop stopped after {} rebuilds", builds);
    debouncer.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    const DEBOUNCE: Duration = Duration::from_millis(100);

    #[test]
    fn test_starts_idle_and_blocks() {
        let scheduler = RebuildScheduler::new(DEBOUNCE);
        assert_eq!(scheduler.state(), WatchState::Idle);
        assert_eq!(scheduler.wait_timeout(Instant::now()), None);
    }

    #[test]
    fn test_burst_of_changes_coalesces_into_one_build() {
        let mut scheduler = RebuildScheduler::new(DEBOUNCE);
        let start = Instant::now();
        let mut builds = 0;

        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 50);
            scheduler.on_change(now);
            if scheduler.poll(now) {
                builds += 1;
            }
        }
        assert_eq!(builds, 0);
        assert_eq!(
            scheduler.state(),
            WatchState::WaitingDebounce {
                deadline: start + Duration::from_millis(450) + DEBOUNCE
            }
        );

        let later = start + Duration::from_millis(600);
        assert!(scheduler.poll(later));
        assert_eq!(scheduler.state(), WatchState::Building);
        assert!(!scheduler.poll(later));
        scheduler.finish_build(later);
        assert_eq!(scheduler.state(), WatchState::Idle);
    }

    #[test]
    fn test_change_during_build_schedules_one_follow_up() {
        let mut scheduler = RebuildScheduler::new(DEBOUNCE);
        let start = Instant::now();

        scheduler.on_change(start);
        assert!(scheduler.poll(start + DEBOUNCE));

        scheduler.on_change(start + DEBOUNCE);
        scheduler.on_change(start + DEBOUNCE);
        assert_eq!(scheduler.state(), WatchState::Building);

        let finished = start + DEBOUNCE * 2;
        scheduler.finish_build(finished);
        assert_eq!(
            scheduler.state(),
            WatchState::WaitingDebounce {
                deadline: finished + DEBOUNCE
            }
        );
        assert!(scheduler.poll(finished + DEBOUNCE));
        scheduler.finish_build(finished + DEBOUNCE);
        assert_eq!(scheduler.state(), WatchState::Idle);
    }

    #[test]
    fn test_wait_timeout_counts_down() {
        let mut scheduler = RebuildScheduler::new(DEBOUNCE);
        let start = Instant::now();
        scheduler.on_change(start);
        assert_eq!(
            scheduler.wait_timeout(start + Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
        assert_eq!(
            scheduler.wait_timeout(start + Duration::from_millis(400)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_loop_coalesces_rapid_messages() {
        let (tx, rx) = mpsc::channel();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let handle = thread::spawn(move || {
            run_rebuild_loop(&rx, Duration::from_millis(200), || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        for _ in 0..5 {
            tx.send(LoopMessage::Changed(vec![PathBuf::from("a/1.md")]))
                .unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(700));
        tx.send(LoopMessage::Shutdown).unwrap();

        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loop_rebuilds_after_change_during_build() {
        let (tx, rx) = mpsc::channel();
        let inner_tx = tx.clone();
        let mut first = true;

        let handle = thread::spawn(move || {
            run_rebuild_loop(&rx, Duration::from_millis(50), || {
                if first {
                    first = false;
                    // An edit lands while the build is running
                    inner_tx
                        .send(LoopMessage::Changed(vec![PathBuf::from("a/2.md")]))
                        .unwrap();
                }
            })
        });

        tx.send(LoopMessage::Changed(vec![PathBuf::from("a/1.md")]))
            .unwrap();
        thread::sleep(Duration::from_millis(500));
        tx.send(LoopMessage::Shutdown).unwrap();

        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn test_loop_exits_on_disconnect() {
        let (tx, rx) = mpsc::channel::<LoopMessage>();
        drop(tx);
        assert_eq!(run_rebuild_loop(&rx, DEBOUNCE, || {}), 0);
    }

    #[test]
    fn test_relevance_filter() {
        let targets = WatchTargets {
            slides_root: PathBuf::from("/deck/slides"),
            files: vec![PathBuf::from("/deck/base.html")],
            output: PathBuf::from("/deck/index.html"),
        };

        assert!(targets.is_relevant(Path::new("/deck/slides/a/1.md")));
        assert!(targets.is_relevant(Path::new("/deck/slides/a/_part.html")));
        assert!(targets.is_relevant(Path::new("/deck/base.html")));
        assert!(!targets.is_relevant(Path::new("/deck/index.html")));
        assert!(!targets.is_relevant(Path::new("/deck/.index.html.1234.tmp")));
        assert!(!targets.is_relevant(Path::new("/deck/slides/.git/index")));
        assert!(!targets.is_relevant(Path::new("/deck/slides/a/.1.md.swp")));
        assert!(!targets.is_relevant(Path::new("/deck/notes.txt")));
        assert_eq!(targets.file_dirs(), vec![PathBuf::from("/deck")]);
    }
}
