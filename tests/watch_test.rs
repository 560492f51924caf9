use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slidefold::{build_presentation, watch_slides, Config, LoopMessage, ReloadHub};
use tempfile::TempDir;

const TEMPLATE: &str = "<html><body><div class=\"reveal\"><div class=\"slides\">{{slides}}</div></div></body></html>";

fn wait_for_output(path: &Path, needle: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if fs::read_to_string(path).is_ok_and(|html| html.contains(needle)) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_watch_rebuilds_and_announces_reload() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();
    fs::write(root.join("base.html"), TEMPLATE).unwrap();
    fs::create_dir_all(root.join("slides/intro")).unwrap();
    fs::write(root.join("slides/intro/1.md"), "# First").unwrap();

    let mut config = Config::for_root(root);
    config.debounce_ms = 100;
    config.watch = true;
    build_presentation(&config).unwrap();

    let hub = Arc::new(ReloadHub::new());
    let (tx, rx) = mpsc::channel();
    let shutdown = tx.clone();
    let watcher_config = config.clone();
    let watcher_hub = hub.clone();
    let handle = thread::spawn(move || watch_slides(&watcher_config, Some(watcher_hub), tx, rx));

    // Give the watcher time to register before editing
    thread::sleep(Duration::from_millis(500));
    fs::write(root.join("slides/intro/2.md"), "# Second").unwrap();

    let output = root.join("index.html");
    assert!(wait_for_output(&output, "# Second"));
    assert!(hub.generation() >= 1);

    // A broken template keeps the last good output
    let before = fs::read_to_string(&output).unwrap();
    fs::write(root.join("base.html"), "<html>{{nope}}</html>").unwrap();
    thread::sleep(Duration::from_millis(800));
    assert_eq!(fs::read_to_string(&output).unwrap(), before);

    fs::write(root.join("base.html"), TEMPLATE).unwrap();
    fs::write(root.join("slides/intro/3.md"), "# Third").unwrap();
    assert!(wait_for_output(&output, "# Third"));

    shutdown.send(LoopMessage::Shutdown).unwrap();
    handle.join().unwrap().unwrap();
}
