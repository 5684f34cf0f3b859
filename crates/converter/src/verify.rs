//! Post-conversion output checks
//!
//! ffmpeg can exit 0 and still leave an empty or truncated file behind, so
//! the original is only deleted once the output looks plausible.

use std::fs;
use std::path::Path;

/// Result of checking a converted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Output exists and is larger than the threshold
    Ok { size: u64 },
    Missing,
    TooSmall { size: u64, min: u64 },
    Unreadable(String),
}

impl Verification {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verification::Ok { .. })
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verification::Ok { size } => write!(f, "verified ({} bytes)", size),
            Verification::Missing => write!(f, "output file is missing"),
            Verification::TooSmall { size, min } => {
                write!(f, "output is only {} bytes (expected more than {})", size, min)
            }
            Verification::Unreadable(e) => write!(f, "could not read output metadata: {}", e),
        }
    }
}

/// Check that `output` exists and is strictly larger than `min_bytes`
pub fn verify_output(output: &Path, min_bytes: u64) -> Verification {
    match fs::metadata(output) {
        Ok(meta) if !meta.is_file() => Verification::Missing,
        Ok(meta) if meta.len() > min_bytes => Verification::Ok { size: meta.len() },
        Ok(meta) => Verification::TooSmall {
            size: meta.len(),
            min: min_bytes,
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Verification::Missing,
        Err(e) => Verification::Unreadable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_threshold_is_strict(size in 0u64..4096, min in 0u64..4096) {
            let dir = TempDir::new().unwrap();
            let out = dir.path().join("out.mp4");
            fs::write(&out, vec![0u8; size as usize]).unwrap();
            let result = verify_output(&out, min);
            prop_assert_eq!(result.is_ok(), size > min);
        }
    }

    #[test]
    fn test_missing_and_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(verify_output(&dir.path().join("nope.mp4"), 0), Verification::Missing);
        assert_eq!(verify_output(dir.path(), 0), Verification::Missing);
    }

    #[test]
    fn test_display_mentions_sizes() {
        let v = Verification::TooSmall { size: 12, min: 10 * 1024 * 1024 };
        assert!(v.to_string().contains("12 bytes"));
    }
}
