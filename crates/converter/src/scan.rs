//! Folder scanning for the monitor
//!
//! Recursively walks a directory for convertible media, skipping sources that
//! already have an MP4 next to them at any retry level.

use crate::policy::candidate_outputs;
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Checks if a file has one of `extensions` (case-insensitive, no leading dot).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// True if `<stem>.mp4`, `<stem>_retry1.mp4` or `<stem>_retry2.mp4` exists
pub fn has_existing_output(source: &Path) -> bool {
    candidate_outputs(source).iter().any(|p| p.exists())
}

/// Scan `root` for files that still need converting, in file-name order.
pub fn scan_directory(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_extension(path, extensions) {
            continue;
        }
        if has_existing_output(path) {
            debug!("Skipping {}, MP4 version already exists", path.display());
            continue;
        }
        found.push(path.to_path_buf());
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn default_exts() -> Vec<String> {
        crate::config::MonitorConfig::default().extensions
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("mkv"), Just("MKV"), Just("Mkv"),
                Just("avi"), Just("mov"), Just("FLV"), Just("wmv"),
                Just("mpeg"), Just("mpg"), Just("ts"), Just("M2TS"),
                Just("mp4"), Just("txt"), Just("srt"), Just("jpg"), Just("nfo"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));
            let expected = matches!(
                ext.to_lowercase().as_str(),
                "mkv" | "avi" | "mov" | "flv" | "wmv" | "mpeg" | "mpg" | "ts" | "m2ts"
            );
            prop_assert_eq!(has_extension(&path, &default_exts()), expected);
        }

        // A source is reported iff none of its three possible outputs exist
        #[test]
        fn prop_existing_output_skips(name in "[a-z]{1,10}", which in 0usize..4) {
            let dir = TempDir::new().unwrap();
            let source = dir.path().join(format!("{}.mkv", name));
            File::create(&source).unwrap();
            let outputs = [
                format!("{}.mp4", name),
                format!("{}_retry1.mp4", name),
                format!("{}_retry2.mp4", name),
            ];
            if which < 3 {
                File::create(dir.path().join(&outputs[which])).unwrap();
            }

            let found = scan_directory(dir.path(), &default_exts()).unwrap();
            prop_assert_eq!(found.contains(&source), which == 3);
        }
    }

    #[test]
    fn test_movie_with_mp4_is_skipped() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("movie.mkv")).unwrap();
        File::create(dir.path().join("movie.mp4")).unwrap();
        File::create(dir.path().join("other.mkv")).unwrap();

        let found = scan_directory(dir.path(), &default_exts()).unwrap();
        assert_eq!(found, vec![dir.path().join("other.mkv")]);
    }

    #[test]
    fn test_scan_is_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        let season = dir.path().join("Show").join("Season 1");
        fs::create_dir_all(&season).unwrap();
        File::create(season.join("b.mkv")).unwrap();
        File::create(season.join("a.avi")).unwrap();
        File::create(season.join("a.srt")).unwrap();

        let found = scan_directory(dir.path(), &default_exts()).unwrap();
        assert_eq!(found, vec![season.join("a.avi"), season.join("b.mkv")]);
    }

    #[test]
    fn test_scan_rejects_non_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.mkv");
        File::create(&file).unwrap();
        assert!(matches!(
            scan_directory(&file, &default_exts()),
            Err(ScanError::NotADirectory(_))
        ));
    }
}
