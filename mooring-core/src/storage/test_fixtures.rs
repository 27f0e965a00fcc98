//! Test fixtures for layout testing.
//!
//! Provides a temporary root with the three layout directories already
//! created, so tests start from the state a first run leaves behind.

use crate::config::LayoutConfig;

// Type alias for complex return type
type TempLayout = (tempfile::TempDir, LayoutConfig);

/// Creates a temporary root containing `data`, `downloading` and `downloaded`.
///
/// The returned `TempDir` must be kept alive for as long as the layout is used.
///
/// # Panics
///
/// Panics if temporary directory creation fails or if subdirectories cannot be created.
/// This is acceptable in test fixtures where failures indicate environment issues.
pub fn create_temp_layout() -> TempLayout {
    let temp_dir = tempfile::tempdir().unwrap();
    let layout = LayoutConfig::with_root(temp_dir.path());

    let directories = layout.directories();
    for dir in [
        &directories.data,
        &directories.downloading,
        &directories.downloaded,
    ] {
        std::fs::create_dir_all(dir).unwrap();
    }

    (temp_dir, layout)
}
