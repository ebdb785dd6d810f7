//! Test utilities for integration tests
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use mathlearn::backend::HttpBackend;
use mathlearn::media::FileMediaStore;
use mathlearn::session::ChatTranscriptController;

pub const DEMO_VIDEO: &[u8] = b"demo video bytes";

/// Creates a controller talking to `api_url` that writes generated
/// videos into a temporary directory. The directory also holds a demo
/// video for the fallback path and is removed when the returned
/// `TempDir` is dropped.
pub fn test_controller(api_url: &str) -> (ChatTranscriptController, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let demo_path = dir.path().join("demo-math-video.mp4");
    std::fs::write(&demo_path, DEMO_VIDEO).expect("Failed to write demo video");

    let store = FileMediaStore::new(&dir.path().join("media"), &demo_path);
    let controller =
        ChatTranscriptController::builder(Arc::new(HttpBackend::new(api_url)), Arc::new(store))
            .build();
    (controller, dir)
}

/// Number of generated videos currently on disk.
pub fn media_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir.join("media")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
