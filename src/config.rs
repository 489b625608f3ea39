use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::capture::{DEFAULT_DEADLINE, TEMP_LOAD_FILENAME, TEMP_SAVE_FILENAME};
use crate::cli::Cli;
use crate::files;
use crate::store::codec::DEFAULT_FORMAT;

const DEFAULT_SAVE_ROOT: &str = "data/Saved/Builds";
const DEFAULT_FOLDER: &str = "autosave";
const MIN_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const MAX_FOLDER_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid duration for {key}: {source}")]
    Duration {
        key: &'static str,
        source: humantime::DurationError,
    },
}

/// The config file as written by the user. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    pub save_root: Option<PathBuf>,
    pub enabled: Option<bool>,
    pub save_interval: Option<String>,
    pub autokeep_interval: Option<String>,
    pub num_saves: Option<usize>,
    pub folder: Option<String>,
    pub filename_format: Option<String>,
    pub check_brick_count: Option<bool>,
    pub announce_save: Option<bool>,
    pub broadcast: Option<bool>,
    pub load_on_start: Option<bool>,
    pub only_authorized: Option<bool>,
    pub authorized_users: Option<Vec<String>>,
    pub capture_timeout: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub save_root: PathBuf,
    pub enabled: bool,
    pub save_interval: Duration,
    pub autokeep_interval: Duration,
    /// retention floor, 0 disables culling
    pub num_saves: usize,
    pub folder: String,
    pub filename_format: String,
    pub check_brick_count: bool,
    pub announce_save: bool,
    pub broadcast: bool,
    pub load_on_start: bool,
    pub only_authorized: bool,
    pub authorized_users: Vec<String>,
    pub capture_timeout: Duration,
}

/// Where everything lives on disk, derived from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePaths {
    pub root: PathBuf,
    pub dest_dir: PathBuf,
    pub temp_file: PathBuf,
    pub temp_load_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            save_root: PathBuf::from(DEFAULT_SAVE_ROOT),
            enabled: true,
            save_interval: Duration::from_secs(15 * 60),
            autokeep_interval: Duration::ZERO,
            num_saves: 10,
            folder: DEFAULT_FOLDER.to_string(),
            filename_format: DEFAULT_FORMAT.to_string(),
            check_brick_count: true,
            announce_save: false,
            broadcast: true,
            load_on_start: false,
            only_authorized: false,
            authorized_users: Vec::new(),
            capture_timeout: DEFAULT_DEADLINE,
        }
    }
}

impl Config {
    /// Load the config file named on the command line, or the default one if
    /// it exists, then apply command line overrides.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => FileConfig::default(),
            },
        };

        let mut config = Config::from_file(file)?;
        if let Some(root) = &cli.save_root {
            config.save_root = root.clone();
        }
        Ok(config)
    }

    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let save_interval =
            parse_duration("save-interval", file.save_interval.as_deref(), defaults.save_interval)?
                .max(MIN_SAVE_INTERVAL);
        let autokeep_interval = parse_duration(
            "autokeep-interval",
            file.autokeep_interval.as_deref(),
            defaults.autokeep_interval,
        )?;
        let capture_timeout = parse_duration(
            "capture-timeout",
            file.capture_timeout.as_deref(),
            defaults.capture_timeout,
        )?;

        Ok(Config {
            save_root: file.save_root.unwrap_or(defaults.save_root),
            enabled: file.enabled.unwrap_or(defaults.enabled),
            save_interval,
            autokeep_interval,
            num_saves: file.num_saves.unwrap_or(defaults.num_saves),
            folder: file.folder.map(|f| sanitize_folder(&f)).unwrap_or(defaults.folder),
            filename_format: file.filename_format.unwrap_or(defaults.filename_format),
            check_brick_count: file.check_brick_count.unwrap_or(defaults.check_brick_count),
            announce_save: file.announce_save.unwrap_or(defaults.announce_save),
            broadcast: file.broadcast.unwrap_or(defaults.broadcast),
            load_on_start: file.load_on_start.unwrap_or(defaults.load_on_start),
            only_authorized: file.only_authorized.unwrap_or(defaults.only_authorized),
            authorized_users: file.authorized_users.unwrap_or(defaults.authorized_users),
            capture_timeout,
        })
    }

    /// The on-disk layout. A relative save root is resolved against the
    /// working directory, since watcher events always carry absolute paths.
    pub fn paths(&self) -> SavePaths {
        let root = std::path::absolute(&self.save_root).unwrap_or_else(|_| self.save_root.clone());
        SavePaths::under(root, &self.folder)
    }

    /// Create the save root if needed and pin it to its canonical path, so
    /// hosts built from this config list saves under the same prefix the
    /// registry filters on.
    pub fn resolve_root(&mut self) -> io::Result<()> {
        files::ensure_dir(&self.save_root)?;
        self.save_root = std::fs::canonicalize(&self.save_root)?;
        Ok(())
    }
}

impl SavePaths {
    fn under(root: PathBuf, folder: &str) -> Self {
        SavePaths {
            dest_dir: root.join(folder),
            temp_file: root.join(TEMP_SAVE_FILENAME),
            temp_load_file: root.join(TEMP_LOAD_FILENAME),
            root,
        }
    }

    /// Same layout under the canonical form of `root`, which must exist.
    pub fn canonicalize(&self) -> io::Result<Self> {
        let root = std::fs::canonicalize(&self.root)?;
        let rebase = |path: &Path| match path.strip_prefix(&self.root) {
            Ok(rest) => root.join(rest),
            Err(_) => path.to_path_buf(),
        };

        Ok(SavePaths {
            dest_dir: rebase(&self.dest_dir),
            temp_file: rebase(&self.temp_file),
            temp_load_file: rebase(&self.temp_load_file),
            root,
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "autosaver")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_duration(
    key: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(text) => humantime::parse_duration(text.trim())
            .map_err(|source| ConfigError::Duration { key, source }),
        None => Ok(default),
    }
}

/// Folder names end up in paths the host resolves, keep them boring.
pub fn sanitize_folder(name: &str) -> String {
    name.chars()
        .filter(|&c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-'))
        .take(MAX_FOLDER_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_file(toml::from_str("").unwrap()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.save_interval, Duration::from_secs(900));
        assert_eq!(config.autokeep_interval, Duration::ZERO);
        assert_eq!(config.num_saves, 10);
        assert_eq!(config.folder, "autosave");
        assert_eq!(config.filename_format, "autosave_$DATE");
        assert_eq!(config.capture_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parses_kebab_case_keys_and_durations() {
        let file: FileConfig = toml::from_str(
            r#"
            save-root = "/srv/brickadia/Saved/Builds"
            save-interval = "5m"
            autokeep-interval = "6h"
            num-saves = 3
            filename-format = "castle_$DATE"
            authorized-users = ["abc-123"]
            only-authorized = true
            "#,
        )
        .unwrap();
        let config = Config::from_file(file).unwrap();

        assert_eq!(config.save_root, PathBuf::from("/srv/brickadia/Saved/Builds"));
        assert_eq!(config.save_interval, Duration::from_secs(300));
        assert_eq!(config.autokeep_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.num_saves, 3);
        assert_eq!(config.filename_format, "castle_$DATE");
        assert_eq!(config.authorized_users, vec!["abc-123"]);
        assert!(config.only_authorized);
    }

    #[test]
    fn save_interval_has_a_floor() {
        let file: FileConfig = toml::from_str(r#"save-interval = "5s""#).unwrap();
        assert_eq!(Config::from_file(file).unwrap().save_interval, Duration::from_secs(60));
    }

    #[test]
    fn bad_duration_names_the_key() {
        let file: FileConfig = toml::from_str(r#"autokeep-interval = "soon""#).unwrap();
        let err = Config::from_file(file).unwrap_err();
        assert!(err.to_string().contains("autokeep-interval"));
    }

    #[test]
    fn folder_is_sanitized() {
        assert_eq!(sanitize_folder("../../etc"), "etc");
        assert_eq!(sanitize_folder("my saves!"), "mysaves");
        assert_eq!(sanitize_folder("a-very-long-folder-name-indeed"), "a-very-long-folder-n");
    }

    #[test]
    fn paths_hang_off_the_save_root() {
        let mut config = Config::default();
        config.save_root = PathBuf::from("/saves");
        let paths = config.paths();

        assert_eq!(paths.dest_dir, PathBuf::from("/saves/autosave"));
        assert_eq!(paths.temp_file, PathBuf::from("/saves/autosaver_temp.brs"));
        assert_eq!(paths.temp_load_file, PathBuf::from("/saves/autosaver_temp_load.brs"));
    }

    #[test]
    fn relative_save_root_becomes_absolute() {
        let mut config = Config::default();
        config.save_root = PathBuf::from("data/Saved/Builds");
        let paths = config.paths();

        assert!(paths.root.is_absolute());
        assert!(paths.temp_file.is_absolute());
        assert!(paths.dest_dir.ends_with("data/Saved/Builds/autosave"));
    }

    #[test]
    fn resolve_root_creates_and_canonicalizes() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.save_root = dir.path().join("server").join(".").join("builds");

        config.resolve_root().unwrap();

        assert!(config.save_root.is_dir());
        assert_eq!(config.save_root, std::fs::canonicalize(dir.path()).unwrap().join("server/builds"));
    }
}
