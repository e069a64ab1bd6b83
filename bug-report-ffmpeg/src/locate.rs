use std::env;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the encoder binary search.
pub const FFMPEG_PATH_ENV: &str = "BUG_REPORT_FFMPEG";

#[cfg(windows)]
const BINARY_NAME: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const BINARY_NAME: &str = "ffmpeg";

fn platform_dir() -> &'static str {
    match env::consts::OS {
        "windows" => "windows",
        "macos" => "mac",
        _ => "linux",
    }
}

/// Candidate locations under one search root, most preferred first.
pub fn candidates(root: &Path) -> Vec<PathBuf> {
    vec![
        root.join("bin").join(BINARY_NAME),
        root.join("third_party").join("ffmpeg").join(platform_dir()).join(BINARY_NAME),
    ]
}

/// Finds the ffmpeg binary.
///
/// Order: `BUG_REPORT_FFMPEG`, then the bundled locations under each of
/// `search_roots`, then every directory on `PATH`.
pub fn locate_ffmpeg(search_roots: &[PathBuf]) -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(FFMPEG_PATH_ENV).map(PathBuf::from) {
        if explicit.is_file() {
            return Some(explicit);
        }
        log::warn!(
            "{} points to {}, which is not a file",
            FFMPEG_PATH_ENV,
            explicit.display()
        );
    }

    let bundled = search_roots.iter().flat_map(|root| candidates(root));
    let on_path = env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).map(|dir| dir.join(BINARY_NAME)).collect::<Vec<_>>())
        .unwrap_or_default();

    let found = bundled.chain(on_path).find(|candidate| candidate.is_file());
    match &found {
        Some(path) => log::info!("using ffmpeg at {}", path.display()),
        None => log::error!("ffmpeg not found"),
    }
    found
}
