//! Config file loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pool_core::config::GlobalConfig;

/// `$XDG_CONFIG_HOME/poolctl/config.toml`, falling back to `~/.config`.
pub fn default_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
    };
    Some(base.join("poolctl").join("config.toml"))
}

/// Read the named config file, or the default one when it exists. Without
/// either, everything comes from command-line flags.
pub fn load(explicit: Option<&Path>) -> Result<GlobalConfig> {
    if let Some(path) = explicit {
        return read(path);
    }
    match default_path() {
        Some(path) if path.is_file() => read(&path),
        _ => {
            tracing::debug!("no config file, using command-line settings only");
            Ok(GlobalConfig::default())
        }
    }
}

fn read(path: &Path) -> Result<GlobalConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read config file {}", path.display()))?;
    let config: GlobalConfig = toml::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), services = ?config.service_names(), "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "user = \"alice\"\n[services.ns]\ntype = \"nspooler\"\nurl = \"https://ns.example.com\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.defaults.user.as_deref(), Some("alice"));
        assert_eq!(config.service_names(), vec!["ns"]);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("could not read config file"));
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "services = [").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
