//! Shared helpers for locating the workspace.

use std::path::{Path, PathBuf};

use kiln_config::CONFIG_FILE_NAME;

use crate::GlobalArgs;

/// Walks up from `start` to the first directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE_NAME} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the workspace root from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `kiln.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn global(config: Option<String>) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config,
        }
    }

    #[test]
    fn finds_root_in_parent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("kiln.toml"), "[workspace]\nname = \"t\"\n").unwrap();
        let nested = tmp.path().join("Source/Game");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).unwrap(), tmp.path());
    }

    #[test]
    fn missing_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_project_root(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("could not find kiln.toml"));
    }

    #[test]
    fn config_flag_selects_root() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("kiln.toml");
        fs::write(&file, "[workspace]\nname = \"t\"\n").unwrap();

        let from_file = resolve_project_root(&global(Some(file.display().to_string()))).unwrap();
        assert_eq!(from_file, tmp.path());
        let from_dir =
            resolve_project_root(&global(Some(tmp.path().display().to_string()))).unwrap();
        assert_eq!(from_dir, tmp.path());
    }
}
