//! On-disk daemon configuration (SPEC_FULL §1 ambient stack), grounded on
//! `server`'s `ConfigFile`/`ServerConfig` split: a `toml` file holding
//! operator-tunable values, loaded with the same enforced-0600 convention,
//! plus a small struct for where the daemon keeps its files.

use std::{
    fs::File,
    io::prelude::*,
    net::SocketAddr,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use wgmesh_types::{DEFAULT_DEBOUNCE_WINDOW_MS, HEARTBEAT_INTERVAL_SECS, SESSION_QUEUE_TTL_SECS};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    /// Address the agent transport listens on.
    pub listen_address: SocketAddr,

    /// Path to the sqlite database file (created on first run).
    pub database_path: PathBuf,

    /// Reconciler debounce window, milliseconds (spec §4.7 default 200).
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    /// Agent heartbeat cadence, seconds (spec §4.6 default 20).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Closed session queue retention, seconds (spec §4.6 default 600).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_debounce_window_ms() -> u64 {
    DEFAULT_DEBOUNCE_WINDOW_MS
}

fn default_heartbeat_interval_secs() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}

fn default_session_ttl_secs() -> u64 {
    SESSION_QUEUE_TTL_SECS
}

impl ConfigFile {
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut file = File::create(&path)?;
        chmod(&file, 0o600)?;
        file.write_all(toml::to_string(self)?.as_bytes())?;
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if chmod(&file, 0o600)? {
            log::warn!("updated permissions for {} to 0600", path.display());
        }
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Updates a file's permissions, returning whether a change was needed.
/// Grounded on `shared::chmod` - kept local rather than depending on the
/// whole teacher `shared` crate for one helper.
fn chmod(file: &File, new_mode: u32) -> std::io::Result<bool> {
    let metadata = file.metadata()?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode() & 0o777;
    if mode == new_mode {
        return Ok(false);
    }
    permissions.set_mode(new_mode);
    file.set_permissions(permissions)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controld.toml");
        let config = ConfigFile {
            listen_address: "127.0.0.1:9090".parse().unwrap(),
            database_path: dir.path().join("mesh.db"),
            debounce_window_ms: 200,
            heartbeat_interval_secs: 20,
            session_ttl_secs: 600,
        };
        config.write_to_path(&path).unwrap();

        let loaded = ConfigFile::from_file(&path).unwrap();
        assert_eq!(loaded.listen_address, config.listen_address);
        assert_eq!(loaded.database_path, config.database_path);
    }

    #[test]
    fn write_to_path_enforces_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controld.toml");
        let config = ConfigFile {
            listen_address: "127.0.0.1:9090".parse().unwrap(),
            database_path: dir.path().join("mesh.db"),
            debounce_window_ms: 200,
            heartbeat_interval_secs: 20,
            session_ttl_secs: 600,
        };
        config.write_to_path(&path).unwrap();

        let mode = File::open(&path).unwrap().metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
