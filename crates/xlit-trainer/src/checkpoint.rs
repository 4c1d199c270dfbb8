//! Rotating per-epoch checkpoints under `temp_models/`.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use xlit_core::model::SequenceModel;
use xlit_core::{Result, XlitError};

/// Checkpoints kept on disk at any time.
pub const KEEP_CHECKPOINTS: usize = 3;

/// Saves `my_model-<epoch>.safetensors` files and deletes the oldest once
/// more than `keep` exist.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    keep: usize,
    saved: VecDeque<usize>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| XlitError::io(&dir, e))?;
        Ok(Self {
            dir,
            keep: KEEP_CHECKPOINTS,
            saved: VecDeque::new(),
        })
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("my_model-{epoch}.safetensors"))
    }

    /// Epochs currently on disk, oldest first.
    pub fn saved_epochs(&self) -> Vec<usize> {
        self.saved.iter().copied().collect()
    }

    pub fn save<M: SequenceModel + ?Sized>(&mut self, model: &M, epoch: usize) -> Result<PathBuf> {
        let path = self.path_for(epoch);
        save_atomically(model, &path)?;

        self.saved.retain(|&e| e != epoch);
        self.saved.push_back(epoch);
        while self.saved.len() > self.keep {
            let Some(oldest) = self.saved.pop_front() else {
                break;
            };
            let stale = self.path_for(oldest);
            match fs::remove_file(&stale) {
                Ok(()) => debug!(path = %stale.display(), "removed old checkpoint"),
                Err(e) => warn!("Could not remove old checkpoint {}: {}", stale.display(), e),
            }
        }

        info!("Saved checkpoint for epoch {} to {}", epoch, path.display());
        Ok(path)
    }

    /// Load the checkpoint saved at `epoch` into `model`.
    pub fn restore<M: SequenceModel + ?Sized>(
        &self,
        model: &mut M,
        epoch: usize,
    ) -> Result<PathBuf> {
        let path = self.path_for(epoch);
        if !path.exists() {
            return Err(XlitError::CheckpointMissing { epoch, path });
        }
        model.load(&path)?;
        info!("Restored checkpoint for epoch {} from {}", epoch, path.display());
        Ok(path)
    }
}

/// Write `final_model_epochs_<epochs>.safetensors` into `dir`.
pub fn save_final<M: SequenceModel + ?Sized>(
    model: &M,
    dir: &Path,
    epochs: usize,
) -> Result<PathBuf> {
    let path = dir.join(format!("final_model_epochs_{epochs}.safetensors"));
    save_atomically(model, &path)?;
    info!("Saved final model to {}", path.display());
    Ok(path)
}

fn save_atomically<M: SequenceModel + ?Sized>(model: &M, path: &Path) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    model.save(&tmp)?;
    fs::rename(&tmp, path).map_err(|e| XlitError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use xlit_core::beam::BeamSearch;
    use xlit_core::lang::Lang;
    use xlit_core::model::{Hypothesis, Objective, ObjectiveBatch};
    use xlit_core::sequence::SequenceBatch;

    /// Persists a single number; `load` records what it read.
    #[derive(Default)]
    struct FileModel {
        value: u32,
        loaded: RefCell<Vec<u32>>,
    }

    impl SequenceModel for FileModel {
        fn compute_loss(&self, _: &Objective, _: ObjectiveBatch<'_>) -> Result<f32> {
            Ok(0.0)
        }

        fn apply_update(&mut self, _: &Objective, _: ObjectiveBatch<'_>) -> Result<()> {
            Ok(())
        }

        fn beam_decode(
            &self,
            _: &Lang,
            _: &Lang,
            _: &SequenceBatch,
            _: &BeamSearch,
        ) -> Result<Vec<Vec<Hypothesis>>> {
            Ok(Vec::new())
        }

        fn save(&self, path: &Path) -> Result<()> {
            fs::write(path, self.value.to_string()).map_err(|e| XlitError::io(path, e))
        }

        fn load(&mut self, path: &Path) -> Result<()> {
            let text = fs::read_to_string(path).map_err(|e| XlitError::io(path, e))?;
            self.value = text.parse().map_err(|_| XlitError::Backend(text.clone()))?;
            self.loaded.borrow_mut().push(self.value);
            Ok(())
        }
    }

    #[test]
    fn keeps_three_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("temp_models")).unwrap();
        let mut model = FileModel::default();
        for epoch in 1..=5 {
            model.value = epoch as u32;
            store.save(&model, epoch).unwrap();
        }
        assert_eq!(store.saved_epochs(), vec![3, 4, 5]);
        assert!(!store.path_for(1).exists());
        assert!(!store.path_for(2).exists());
        assert!(store.path_for(3).exists());

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn restore_loads_saved_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path()).unwrap();
        let mut model = FileModel {
            value: 7,
            ..Default::default()
        };
        store.save(&model, 2).unwrap();
        model.value = 9;
        store.restore(&mut model, 2).unwrap();
        assert_eq!(model.value, 7);
        assert_eq!(*model.loaded.borrow(), vec![7]);
    }

    #[test]
    fn restoring_missing_epoch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut model = FileModel::default();
        assert!(matches!(
            store.restore(&mut model, 4),
            Err(XlitError::CheckpointMissing { epoch: 4, .. })
        ));
    }

    #[test]
    fn final_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_final(&FileModel::default(), dir.path(), 12).unwrap();
        assert_eq!(path, dir.path().join("final_model_epochs_12.safetensors"));
        assert!(path.exists());
    }
}
