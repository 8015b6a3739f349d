//! Dotenv files
//!
//! Writes the `.env` file a mode asks for through `dependencies.dotenv` and
//! loads the launch directory's `.env` into the base environment.

use crate::constants::DOTENV_FILE;
use crate::error::{HydraError, Result};
use crate::template::value_to_env_string;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// `KEY=VALUE` lines joined by `\n`, without a trailing newline
pub fn render(entries: &BTreeMap<String, Value>) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{}={}", key, value_to_env_string(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write `entries` to `<dir>/.env`, replacing any previous file
pub fn write(dir: &Path, entries: &BTreeMap<String, Value>) -> Result<PathBuf> {
    let path = dir.join(DOTENV_FILE);
    fs::write(&path, render(entries))?;
    Ok(path)
}

/// The process environment, completed by `path` when that file exists
///
/// Variables already set in the process win over the file.
pub fn base_environment(path: Option<&Path>) -> Result<HashMap<String, String>> {
    let mut env: HashMap<String, String> = HashMap::new();

    if let Some(path) = path.filter(|p| p.exists()) {
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            HydraError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| {
                HydraError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            env.insert(key, value);
        }
        tracing::debug!("Loaded {} variables from {}", env.len(), path.display());
    }

    env.extend(
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?))),
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_without_trailing_newline() {
        let entries: BTreeMap<String, Value> = [
            ("PORT".to_string(), json!(3000)),
            ("API_URL".to_string(), json!("http://localhost:3000")),
        ]
        .into();
        assert_eq!(render(&entries), "API_URL=http://localhost:3000\nPORT=3000");
        assert_eq!(render(&BTreeMap::new()), "");
    }

    #[test]
    fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "OLD=1\nSTALE=2\n").unwrap();

        let entries: BTreeMap<String, Value> = [("K".to_string(), json!("v"))].into();
        let path = write(dir.path(), &entries).unwrap();

        assert_eq!(path, dir.path().join(".env"));
        assert_eq!(fs::read_to_string(path).unwrap(), "K=v");
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let entries: BTreeMap<String, Value> = [("K".to_string(), json!("v"))].into();
        assert!(matches!(
            write(Path::new("/nonexistent/hydra"), &entries),
            Err(HydraError::Io(_))
        ));
    }

    #[test]
    fn test_base_environment_prefers_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "HYDRA_TEST_ONLY_IN_FILE=file\nPATH=/from/file\n").unwrap();

        let env = base_environment(Some(&path)).unwrap();
        assert_eq!(env["HYDRA_TEST_ONLY_IN_FILE"], "file");
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok().as_ref());
    }

    #[test]
    fn test_base_environment_without_file() {
        let env = base_environment(Some(Path::new("/nonexistent/.env"))).unwrap();
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok().as_ref());
        assert!(!env.contains_key("HYDRA_TEST_ONLY_IN_FILE"));
    }
}
