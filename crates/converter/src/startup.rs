//! Tool resolution and availability checks
//!
//! Locates ffmpeg and ffprobe before a batch starts:
//! - configured paths win
//! - then a bundled copy next to the executable (`ffmpeg/bin/ffmpeg`, `ffmpeg/ffmpeg`)
//! - then plain `ffmpeg` from `PATH`

use crate::config::Config;
use log::info;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error types for tool checks
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not available at {path}: {reason}")]
    Unavailable {
        tool: &'static str,
        path: PathBuf,
        reason: String,
    },
}

/// Resolved locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

fn exe_name(stem: &str) -> String {
    format!("{}{}", stem, std::env::consts::EXE_SUFFIX)
}

/// Candidate bundled ffmpeg locations under `app_dir`, in lookup order
pub fn bundled_candidates(app_dir: &Path) -> Vec<PathBuf> {
    let name = exe_name("ffmpeg");
    vec![
        app_dir.join("ffmpeg").join("bin").join(&name),
        app_dir.join("ffmpeg").join(&name),
    ]
}

/// Pick the ffmpeg binary: configured, bundled next to `app_dir`, or `PATH`
pub fn resolve_ffmpeg(configured: Option<&Path>, app_dir: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    if let Some(dir) = app_dir {
        if let Some(found) = bundled_candidates(dir).into_iter().find(|p| p.is_file()) {
            return found;
        }
    }
    PathBuf::from(exe_name("ffmpeg"))
}

/// Derive the ffprobe path from the ffmpeg path
///
/// Only the file-name component is rewritten, so directories that happen to
/// contain "ffmpeg" (e.g. `/opt/ffmpeg/bin/ffmpeg`) are left alone.
pub fn derive_ffprobe(ffmpeg: &Path) -> PathBuf {
    let Some(name) = ffmpeg.file_name() else {
        return PathBuf::from(exe_name("ffprobe"));
    };
    let name = name.to_string_lossy();
    let replaced = if name.contains("ffmpeg") {
        name.replacen("ffmpeg", "ffprobe", 1)
    } else {
        exe_name("ffprobe")
    };
    ffmpeg.with_file_name(OsString::from(replaced))
}

/// Resolve both tools from the configuration
pub fn resolve_tools(cfg: &Config) -> ToolPaths {
    let app_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let ffmpeg = resolve_ffmpeg(cfg.tools.ffmpeg_bin.as_deref(), app_dir.as_deref());
    let ffprobe = cfg
        .tools
        .ffprobe_bin
        .clone()
        .unwrap_or_else(|| derive_ffprobe(&ffmpeg));
    ToolPaths { ffmpeg, ffprobe }
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    // Look for "<tool> version" followed by the version string
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let version_part = version_line
        .to_lowercase()
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    // Handle n-prefixed versions (e.g., "n8.0-...")
    let version_str = version_part.trim_start_matches('n');

    // Extract major version (before first '.' or '-')
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Run `<bin> -version` and return the first line of its banner
pub async fn check_tool(tool: &'static str, bin: &Path) -> Result<String, ToolError> {
    let output = Command::new(bin)
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ToolError::Unavailable {
            tool,
            path: bin.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ToolError::Unavailable {
            tool,
            path: bin.to_path_buf(),
            reason: format!("-version exited with {:?}", output.status.code()),
        });
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    let first_line = banner.lines().next().unwrap_or("(empty)").trim().to_string();
    match parse_ffmpeg_version(&banner) {
        Some(major) => info!("{} {} (major version {})", tool, bin.display(), major),
        None => info!("{} {}: {}", tool, bin.display(), first_line),
    }
    Ok(first_line)
}

/// Check ffmpeg and ffprobe
///
/// A missing ffprobe is not fatal (progress becomes indeterminate), so only
/// the ffmpeg result is returned as an error.
pub async fn check_tools(tools: &ToolPaths) -> Result<(), ToolError> {
    check_tool("ffmpeg", &tools.ffmpeg).await?;
    if let Err(e) = check_tool("ffprobe", &tools.ffprobe).await {
        log::warn!("{}; progress will be indeterminate", e);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        // The ffprobe path always differs from ffmpeg only in its file name
        #[test]
        fn prop_derive_ffprobe_keeps_directory(dir in "/[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
            let ffmpeg = PathBuf::from(&dir).join(exe_name("ffmpeg"));
            let ffprobe = derive_ffprobe(&ffmpeg);
            prop_assert_eq!(ffprobe.parent(), ffmpeg.parent());
            prop_assert_eq!(ffprobe.file_name().unwrap().to_string_lossy(), exe_name("ffprobe"));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_multiline() {
        let output = r#"ffmpeg version n6.1-5-g1234567 Copyright (c) 2000-2023
built with gcc 12.2.0
configuration: --enable-gpl"#;
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_derive_ffprobe() {
        assert_eq!(derive_ffprobe(Path::new("ffmpeg")), PathBuf::from("ffprobe"));
        assert_eq!(
            derive_ffprobe(Path::new("/opt/ffmpeg/bin/ffmpeg")),
            PathBuf::from("/opt/ffmpeg/bin/ffprobe")
        );
        assert_eq!(
            derive_ffprobe(Path::new("C:/tools/ffmpeg.exe")),
            PathBuf::from("C:/tools/ffprobe.exe")
        );
        assert_eq!(
            derive_ffprobe(Path::new("/usr/bin/avconv")),
            PathBuf::from("/usr/bin").join(exe_name("ffprobe"))
        );
    }

    #[test]
    fn test_resolve_prefers_configured() {
        let dir = TempDir::new().unwrap();
        let configured = Path::new("/custom/ffmpeg");
        assert_eq!(
            resolve_ffmpeg(Some(configured), Some(dir.path())),
            configured.to_path_buf()
        );
    }

    #[test]
    fn test_resolve_bundled_order() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_ffmpeg(None, Some(dir.path())), PathBuf::from(exe_name("ffmpeg")));

        let flat = dir.path().join("ffmpeg").join(exe_name("ffmpeg"));
        std::fs::create_dir_all(flat.parent().unwrap()).unwrap();
        std::fs::write(&flat, b"").unwrap();
        assert_eq!(resolve_ffmpeg(None, Some(dir.path())), flat);

        let nested = dir.path().join("ffmpeg").join("bin").join(exe_name("ffmpeg"));
        std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
        std::fs::write(&nested, b"").unwrap();
        assert_eq!(resolve_ffmpeg(None, Some(dir.path())), nested);
    }

    #[test]
    fn test_resolve_tools_from_config() {
        let mut cfg = Config::default();
        cfg.tools.ffmpeg_bin = Some(PathBuf::from("/opt/x/ffmpeg"));
        let tools = resolve_tools(&cfg);
        assert_eq!(tools.ffmpeg, PathBuf::from("/opt/x/ffmpeg"));
        assert_eq!(tools.ffprobe, PathBuf::from("/opt/x/ffprobe"));

        cfg.tools.ffprobe_bin = Some(PathBuf::from("/elsewhere/probe"));
        assert_eq!(resolve_tools(&cfg).ffprobe, PathBuf::from("/elsewhere/probe"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_tools_with_fake_binaries() {
        let _guard = crate::test_support::PROCESS_LOCK.lock().await;
        let dir = TempDir::new().unwrap();
        let tools = crate::test_support::fake_tools(dir.path());
        let banner = check_tool("ffmpeg", &tools.ffmpeg).await.unwrap();
        assert!(banner.starts_with("ffmpeg version n6.1"));
        assert!(check_tools(&tools).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_tool_missing() {
        let _guard = crate::test_support::PROCESS_LOCK.lock().await;
        let err = check_tool("ffmpeg", Path::new("/nonexistent/ffmpeg")).await.unwrap_err();
        assert!(err.to_string().contains("ffmpeg not available"));
    }
}
