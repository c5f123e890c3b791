use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use hotkey_bindings::actions::{install_default_handlers, Recorder, RecordingController, WindowControl};
use hotkey_bindings::bindings::{default_bindings, BindingStore, JsonFileStore};
use hotkey_bindings::config::Config;
use hotkey_bindings::input::detector::{snapshot_from_line, ChordDetector, KeySnapshot};
use hotkey_bindings::input::GlobalHotkeyBackend;
use hotkey_bindings::{telemetry, ActionDispatcher, BindingCoordinator, ChordRegistry};

/// Stand-in for the audio capture backend
struct LoggingRecorder;

#[async_trait]
impl Recorder for LoggingRecorder {
    async fn start_record(&self) -> Result<()> {
        tracing::info!("start_record requested");
        Ok(())
    }

    async fn stop_record(&self) -> Result<()> {
        tracing::info!("stop_record requested");
        Ok(())
    }
}

/// Stand-in for the window layer
struct LoggingWindow;

impl WindowControl for LoggingWindow {
    fn toggle_visibility(&self) -> Result<()> {
        tracing::info!("toggle_visibility requested");
        Ok(())
    }
}

/// Feed stdin lines (space-separated held keys, empty line = release) to the detector
async fn feed_snapshots(tx: mpsc::Sender<KeySnapshot>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(snapshot_from_line(&line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    println!("✓ Config loaded from ~/.hotkey-bindings.toml");

    telemetry::init(&config.telemetry)?;
    tracing::info!("hotkey-bindings starting");

    // Actions
    let dispatcher = Arc::new(ActionDispatcher::new());
    let recording = Arc::new(RecordingController::spawn(
        Arc::new(LoggingRecorder),
        &Handle::current(),
    ));
    install_default_handlers(&dispatcher, recording, Arc::new(LoggingWindow));

    // Registry + store
    let backend = Arc::new(GlobalHotkeyBackend::spawn().context("failed to start hotkey backend")?);
    let registry = Arc::new(ChordRegistry::new(backend, Arc::clone(&dispatcher)));
    let store_path = Config::expand_path(&config.storage.path)?;
    let store = BindingStore::new(Arc::new(JsonFileStore::new(store_path)), default_bindings());
    let coordinator = BindingCoordinator::new(store, registry);

    coordinator.init().await.context("failed to register hotkeys")?;
    for binding in coordinator.list().await.iter() {
        println!("✓ Hotkey registered: {} = {}", binding.id, binding.key);
    }

    // Chord preview
    let detector = ChordDetector::with_max_len(config.detector.max_chord_len);
    let mut preview = detector.subscribe();
    let (snapshot_tx, snapshot_rx) = mpsc::channel(32);
    tokio::spawn(detector.run(snapshot_rx));
    tokio::spawn(feed_snapshots(snapshot_tx));
    tokio::spawn(async move {
        while preview.changed().await.is_ok() {
            let current = preview.borrow_and_update().clone();
            tracing::info!(
                keys = ?current.keys,
                pressing = current.is_pressing,
                completed = ?current.completed.as_ref().map(ToString::to_string),
                "chord preview"
            );
        }
    });

    tracing::info!("event loop starting (press Ctrl+C to exit)");
    println!("\nHotkey bindings are active. Type held keys on stdin to preview chords.");
    println!("Press Ctrl+C to exit.\n");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    println!("\nShutting down...");

    let report = coordinator.cleanup().await;
    if !report.is_clean() {
        tracing::warn!(failed = report.failed.len(), "some hotkeys could not be released");
    }

    Ok(())
}
