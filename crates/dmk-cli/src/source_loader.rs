use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dmk_core::SmError;
use log::debug;
use walkdir::WalkDir;

use crate::{map_cli_source_path, map_cli_source_read, map_cli_source_scan};

const SCRIPT_EXTENSIONS: [&str; 2] = ["dmk", "txt"];

pub(crate) fn resolve_path(raw: &str) -> Result<PathBuf, SmError> {
    let path = PathBuf::from(raw);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(map_cli_source_path)?
            .join(path)
    };

    if !absolute.exists() {
        return Err(SmError::new(
            "CLI_SOURCE_NOT_FOUND",
            format!("path does not exist: {}", absolute.display()),
        ));
    }
    Ok(absolute)
}

pub(crate) fn read_script_file(raw: &str) -> Result<String, SmError> {
    let path = resolve_path(raw)?;
    if !path.is_file() {
        return Err(SmError::new(
            "CLI_SOURCE_NOT_FILE",
            format!("script is not a file: {}", path.display()),
        ));
    }
    fs::read_to_string(&path).map_err(map_cli_source_read)
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| SCRIPT_EXTENSIONS.contains(&extension))
}

/// Reads every script under `scripts_dir`, keyed by `/`-separated relative path.
pub(crate) fn read_scripts_from_dir(scripts_dir: &str) -> Result<BTreeMap<String, String>, SmError> {
    let root = resolve_path(scripts_dir)?;
    if !root.is_dir() {
        return Err(SmError::new(
            "CLI_SOURCE_NOT_DIR",
            format!("scripts-dir is not a directory: {}", root.display()),
        ));
    }

    let mut scripts = BTreeMap::new();
    for entry in WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !is_script(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&root)
            .map_err(map_cli_source_scan)?
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(entry.path()).map_err(map_cli_source_read)?;
        debug!("loaded script {}", relative);
        scripts.insert(relative, content);
    }

    if scripts.is_empty() {
        return Err(SmError::new(
            "CLI_SOURCE_EMPTY",
            format!("No .dmk/.txt scripts under {}", root.display()),
        ));
    }
    Ok(scripts)
}
