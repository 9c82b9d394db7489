//! State files on the local filesystem.
//!
//! Each deployment owns one JSON file named after its resource group and
//! gateway, so several gateways can share a state directory. The previous
//! file is kept as `.bak` on every save.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StateError, VpnError};

use super::store::StateStore;
use super::types::DeploymentState;

/// Default state directory, next to the configuration file.
pub const STATE_DIR: &str = ".halldyll";

/// Suffix of every state file.
const STATE_SUFFIX: &str = "vpn-state.json";

/// JSON state file for one deployment.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    path: PathBuf,
}

fn write_failed(path: &Path, e: &std::io::Error) -> VpnError {
    VpnError::State(StateError::WriteFailed {
        message: format!("{}: {e}", path.display()),
    })
}

fn corrupted(path: &Path, detail: impl std::fmt::Display) -> VpnError {
    VpnError::State(StateError::Corrupted {
        message: format!("{}: {detail}", path.display()),
    })
}

impl LocalStateStore {
    /// State file of the gateway `gateway` in `resource_group`, under `dir`.
    #[must_use]
    pub fn for_deployment(dir: impl AsRef<Path>, resource_group: &str, gateway: &str) -> Self {
        Self::at(
            dir.as_ref()
                .join(format!("{resource_group}.{gateway}.{STATE_SUFFIX}")),
        )
    }

    /// State file at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path the previous state is copied to on save.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }

    /// Writes `content` to a sibling temp file, then renames it over the state file.
    async fn write_atomic(&self, content: &[u8]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| write_failed(dir, &e))?;
        }

        let temp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| write_failed(&temp, &e))?;
        file.write_all(content)
            .await
            .map_err(|e| write_failed(&temp, &e))?;
        file.sync_all().await.map_err(|e| write_failed(&temp, &e))?;
        drop(file);

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| write_failed(&self.path, &e))
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(corrupted(&self.path, e)),
        };

        let state: DeploymentState =
            serde_json::from_str(&content).map_err(|e| corrupted(&self.path, e))?;
        state.check_version()?;

        debug!(
            "Loaded state for {}/{} ({} nodes)",
            state.resource_group,
            state.gateway_name,
            state.nodes.len()
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| VpnError::State(StateError::serialization(e.to_string())))?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup)
                .await
                .map_err(|e| write_failed(&backup, &e))?;
        }

        self.write_atomic(&content).await?;
        info!("State saved to {}", self.path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        for path in [self.path.clone(), self.backup_path()] {
            match fs::remove_file(&path).await {
                Ok(()) => info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(write_failed(&path, &e)),
            }
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        fs::try_exists(&self.path)
            .await
            .map_err(|e| corrupted(&self.path, e))
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeState, ProviderHandle, ResourceKind};
    use crate::state::NodeRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalStateStore {
        LocalStateStore::for_deployment(dir.path().join("nested"), "rg-vpn", "vpn-gw")
    }

    #[test]
    fn test_file_is_named_after_deployment() {
        let store = LocalStateStore::for_deployment(".halldyll", "rg-vpn", "vpn-gw");
        assert_eq!(
            store.path(),
            Path::new(".halldyll/rg-vpn.vpn-gw.vpn-state.json")
        );
        assert_eq!(
            store.backup_path(),
            Path::new(".halldyll/rg-vpn.vpn-gw.vpn-state.json.bak")
        );
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut state = DeploymentState::new("rg-vpn", "vpn-gw");
        state.nodes.insert(
            String::from("public_ip/pip1"),
            NodeRecord {
                kind: ResourceKind::PublicIp,
                key: String::from("pip1"),
                name: String::from("pip-1"),
                state: NodeState::Created,
                handle: Some(ProviderHandle::new("/pip-1").with_attribute("ip_address", "20.0.0.4")),
                updated_at: Utc::now(),
            },
        );
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().expect("state should exist");
        assert_eq!(loaded.resource_group, "rg-vpn");
        assert_eq!(loaded.created_handles().len(), 1);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut state = DeploymentState::new("rg-vpn", "vpn-gw");
        state.config_hash = String::from("first");
        store.save(&state).await.unwrap();
        assert!(!store.backup_path().exists());

        state.config_hash = String::from("second");
        store.save(&state).await.unwrap();

        let backup = std::fs::read_to_string(store.backup_path()).unwrap();
        assert!(backup.contains("\"first\""));
        assert_eq!(store.load().await.unwrap().unwrap().config_hash, "second");
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_backup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.exists().await.unwrap());

        let state = DeploymentState::new("rg-vpn", "vpn-gw");
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();
        assert!(store.exists().await.unwrap());

        store.delete().await.unwrap();
        assert!(!store.exists().await.unwrap());
        assert!(!store.backup_path().exists());
        store.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, VpnError::State(StateError::Corrupted { .. })));
    }
}
