/*!
 * State Store
 * Per-tenant orchestration records for resume and audit
 *
 * One JSON file per tenant, written atomically (temp file + rename) so a
 * crash mid-write never leaves a truncated record. Terminal records stay on
 * disk; deletion is an operator concern.
 */

use crate::core::errors::OrchestratorError;
use crate::core::types::TenantId;
use crate::lifecycle::types::StartupInstance;
use log::warn;
use std::path::{Path, PathBuf};

/// Durable store of per-tenant lifecycle records
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, tenant: TenantId) -> PathBuf {
        self.dir.join(format!("{}.json", tenant.simple()))
    }

    /// Persist a tenant record, replacing any previous version
    pub fn save(&self, instance: &StartupInstance) -> Result<(), OrchestratorError> {
        let path = self.path_for(instance.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(instance)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load one tenant record
    pub fn load(&self, tenant: TenantId) -> Result<Option<StartupInstance>, OrchestratorError> {
        let path = self.path_for(tenant);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Load every stored record (resume path)
    ///
    /// Unparseable files are skipped with a warning rather than poisoning
    /// the whole resume.
    pub fn load_all(&self) -> Result<Vec<StartupInstance>, OrchestratorError> {
        let mut instances = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(OrchestratorError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(OrchestratorError::from))
            {
                Ok(instance) => instances.push(instance),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::types::{PhaseSpec, StartupConfig, StartupState};
    use crate::resources::ResourceRequirements;

    fn instance() -> StartupInstance {
        let id = TenantId::new_v4();
        let config = StartupConfig::new("acme", vec![PhaseSpec::new("scaffold", "codegen")])
            .with_requirements(ResourceRequirements::new(1, 128, 1, 1));
        let allocation = crate::resources::ResourceAllocation {
            tenant_id: id,
            ports: [40001u16].into_iter().collect(),
            memory_mb: 128,
            cpu_cores: 1,
            storage_gb: 1,
            namespace: "tenant-test".into(),
            workspace_dir: std::env::temp_dir().join("tenant-test"),
            allocated_at: time::OffsetDateTime::now_utc(),
            expires_at: None,
        };
        StartupInstance::new(id, config, allocation)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let instance = instance();

        store.save(&instance).unwrap();
        let loaded = store.load(instance.id).unwrap().unwrap();
        assert_eq!(loaded.id, instance.id);
        assert_eq!(loaded.status, StartupState::ResourceAllocated);
        assert_eq!(loaded.config.name, "acme");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert!(store.load(TenantId::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_load_all_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.save(&instance()).unwrap();
        store.save(&instance()).unwrap();
        std::fs::write(dir.path().join("junk.json"), b"not json").unwrap();

        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let mut instance = instance();
        store.save(&instance).unwrap();

        instance.status = StartupState::Completed;
        instance.allocation = None;
        store.save(&instance).unwrap();

        let loaded = store.load(instance.id).unwrap().unwrap();
        assert_eq!(loaded.status, StartupState::Completed);
        assert!(loaded.allocation.is_none());
    }
}
