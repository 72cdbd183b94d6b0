// ModelCache - ref counted store of loaded WorldModels

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::WorldModel;
use crate::types::ModelFlags;

struct ManagedModel {
    model: Arc<WorldModel>,
    ref_count: u32,
}

/// Shares one `WorldModel` per file name between every tile and game
/// object that references it. An entry lives exactly as long as its
/// reference count is above zero.
pub struct ModelCache {
    base_path: PathBuf,
    models: Mutex<HashMap<String, ManagedModel>>,
}

impl ModelCache {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the shared model for `filename`, loading `<filename>.vmo` on
    /// first use. `None` when the file cannot be read.
    pub fn acquire_model_instance(&self, filename: &str, flags: ModelFlags) -> Option<Arc<WorldModel>> {
        let mut models = self.models.lock();
        if let Some(entry) = models.get_mut(filename) {
            entry.ref_count += 1;
            return Some(Arc::clone(&entry.model));
        }

        let path = self.base_path.join(format!("{}.vmo", filename));
        let model = match WorldModel::read_file(&path) {
            Ok(model) => Arc::new(model.with_flags(flags)),
            Err(e) => {
                tracing::error!("VMapManager: could not load '{}': {}", path.display(), e);
                return None;
            }
        };
        tracing::debug!("VMapManager: loading file '{}'", path.display());
        models.insert(
            filename.to_string(),
            ManagedModel {
                model: Arc::clone(&model),
                ref_count: 1,
            },
        );
        Some(model)
    }

    pub fn release_model_instance(&self, filename: &str) {
        let mut models = self.models.lock();
        let Some(entry) = models.get_mut(filename) else {
            tracing::error!("VMapManager: trying to unload non-loaded file '{}'", filename);
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            tracing::debug!("VMapManager: unloading file '{}'", filename);
            models.remove(filename);
        }
    }

    /// Current reference count of `filename`, 0 when not cached.
    pub fn ref_count(&self, filename: &str) -> u32 {
        self.models.lock().get(filename).map_or(0, |entry| entry.ref_count)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.models.lock().contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AaBox, MeshTriangle};
    use crate::model::GroupModel;
    use glam::Vec3;
    use tempfile::TempDir;

    fn write_model(dir: &Path, name: &str) {
        let vertices = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let group = GroupModel::new(
            0,
            1,
            AaBox::new(Vec3::ZERO, Vec3::ONE),
            vertices,
            vec![MeshTriangle::new(0, 1, 2)],
            None,
        );
        WorldModel::new(1, ModelFlags::empty(), vec![group])
            .write_file(&dir.join(format!("{}.vmo", name)))
            .unwrap();
    }

    #[test]
    fn test_acquire_release_round_trip() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "tree.m2");
        let cache = ModelCache::new(dir.path());

        let first = cache.acquire_model_instance("tree.m2", ModelFlags::M2).unwrap();
        let second = cache.acquire_model_instance("tree.m2", ModelFlags::M2).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.flags().contains(ModelFlags::M2));
        assert_eq!(cache.ref_count("tree.m2"), 2);

        cache.release_model_instance("tree.m2");
        assert_eq!(cache.ref_count("tree.m2"), 1);
        assert!(cache.contains("tree.m2"));

        cache.release_model_instance("tree.m2");
        assert!(!cache.contains("tree.m2"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::new(dir.path());
        assert!(cache.acquire_model_instance("nope.wmo", ModelFlags::empty()).is_none());
        assert!(cache.is_empty());

        // releasing an unknown name is ignored
        cache.release_model_instance("nope.wmo");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_reload_after_eviction() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), "rock.m2");
        let cache = ModelCache::new(dir.path());

        let first = cache.acquire_model_instance("rock.m2", ModelFlags::empty()).unwrap();
        cache.release_model_instance("rock.m2");
        let second = cache.acquire_model_instance("rock.m2", ModelFlags::empty()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.ref_count("rock.m2"), 1);
    }
}
