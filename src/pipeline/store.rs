//! Durable pipeline state keyed by run id

use std::path::Path;
use tracing::debug;

use super::state::{MintStage, PipelineState};
use crate::errors::MintError;

const TREE_NAME: &str = "pipeline_runs";

/// sled-backed store of [`PipelineState`] values, JSON encoded
#[derive(Clone)]
pub struct PipelineStore {
    tree: sled::Tree,
    db: sled::Db,
}

impl PipelineStore {
    /// Open (or create) a store under `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MintError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            MintError::state(format!(
                "Cannot open state store at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_db(db)
    }

    /// Store that lives only as long as the process
    pub fn temporary() -> Result<Self, MintError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| MintError::state(format!("Cannot open temporary store: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, MintError> {
        let tree = db
            .open_tree(TREE_NAME)
            .map_err(|e| MintError::state(format!("Cannot open tree: {}", e)))?;
        Ok(Self { tree, db })
    }

    /// Write the state and flush it to disk
    pub fn save(&self, state: &PipelineState) -> Result<(), MintError> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| MintError::state(format!("Cannot encode state: {}", e)))?;
        self.tree
            .insert(state.run_id.as_bytes(), bytes)
            .map_err(|e| MintError::state(format!("Cannot write state: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| MintError::state(format!("Cannot flush state: {}", e)))?;
        debug!(run_id = %state.run_id, stage = %state.stage, "State persisted");
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<PipelineState>, MintError> {
        let Some(bytes) = self
            .tree
            .get(run_id.as_bytes())
            .map_err(|e| MintError::state(format!("Cannot read state: {}", e)))?
        else {
            return Ok(None);
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| MintError::state(format!("Corrupt state for {}: {}", run_id, e)))?;
        Ok(Some(state))
    }

    /// Run ids with their current stage
    pub fn list(&self) -> Result<Vec<(String, MintStage)>, MintError> {
        let mut runs = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) =
                item.map_err(|e| MintError::state(format!("Cannot scan store: {}", e)))?;
            match serde_json::from_slice::<PipelineState>(&bytes) {
                Ok(state) => runs.push((state.run_id, state.stage)),
                Err(e) => debug!(error = %e, "Skipping undecodable run"),
            }
        }
        Ok(runs)
    }

    pub fn remove(&self, run_id: &str) -> Result<bool, MintError> {
        let removed = self
            .tree
            .remove(run_id.as_bytes())
            .map_err(|e| MintError::state(format!("Cannot remove state: {}", e)))?;
        Ok(removed.is_some())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::MintRequest;
    use crate::types::{FileAsset, MetadataRecord};
    use solana_sdk::pubkey::Pubkey;

    fn state(id: &str) -> PipelineState {
        PipelineState::new(
            id,
            Pubkey::new_unique(),
            MintRequest::new(
                MetadataRecord::new("Sunrise", "SUN", 2000),
                vec![FileAsset::from_bytes("a.png", "image/png", vec![1])],
            ),
        )
    }

    #[test]
    fn test_save_load_remove() {
        let store = PipelineStore::temporary().unwrap();
        let mut s = state("run-a");
        s.advance(MintStage::PaymentStaged).unwrap();
        store.save(&s).unwrap();

        let loaded = store.load("run-a").unwrap().unwrap();
        assert_eq!(loaded.stage, MintStage::PaymentStaged);
        assert_eq!(loaded.payer, s.payer);
        assert!(store.load("missing").unwrap().is_none());

        assert_eq!(store.list().unwrap(), vec![("run-a".to_string(), MintStage::PaymentStaged)]);
        assert!(store.remove("run-a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PipelineStore::open(dir.path().join("state")).unwrap();
        store.save(&state("run-b")).unwrap();
        store.save(&state("run-c")).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.load("run-b").unwrap().is_some());
    }
}
