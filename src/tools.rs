// External tool resolver for ffmpeg
//
// Resolution order:
// 1) PORCHLIGHT_FFMPEG_PATH override
// 2) Binary next to the executable (or in its bin/ subdirectory)
// 3) PATH fallback

use std::env;
use std::path::PathBuf;

use crate::constants::FFMPEG_ENV_KEY;

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
        log::warn!("{} points at missing file {}, ignoring", env_key, v);
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        for candidate in [dir.join(&filename), dir.join("bin").join(&filename)] {
            if candidate.exists() {
                return candidate;
            }
        }
    }

    PathBuf::from(default_name)
}

/// Path to the ffmpeg binary used by stream and still sources
pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(FFMPEG_ENV_KEY, "ffmpeg")
}

/// Whether ffmpeg can actually be launched
pub fn is_ffmpeg_available() -> bool {
    let path = ffmpeg_path();
    if path.exists() {
        return true;
    }

    std::process::Command::new(&path)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
