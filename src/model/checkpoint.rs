//! Model Checkpointing
//!
//! Save and load module parameters with burn's named MessagePack recorder.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::Result;

/// Extension the recorder puts on every checkpoint file
pub const CHECKPOINT_EXTENSION: &str = "mpk";

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// File actually written for a checkpoint stored under `path`.
///
/// The recorder replaces any existing extension.
pub fn checkpoint_file(path: &Path) -> PathBuf {
    path.with_extension(CHECKPOINT_EXTENSION)
}

/// Save a module's parameters under `path`
pub fn save_module<B, M>(module: &M, path: &Path) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = Recorder::new();
    module.clone().save_file(path.to_path_buf(), &recorder)?;

    debug!(path = %checkpoint_file(path).display(), "checkpoint saved");
    Ok(())
}

/// Load parameters stored under `path` into `module`
pub fn load_module<B, M>(module: M, path: &Path, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = Recorder::new();
    let module = module.load_file(path.to_path_buf(), &recorder, device)?;

    debug!(path = %checkpoint_file(path).display(), "checkpoint loaded");
    Ok(module)
}

/// Named checkpoints inside one directory (by default `<cache_dir>/model_cache`)
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    /// Maximum checkpoints kept by [`CheckpointStore::prune`]
    max_checkpoints: Option<usize>,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_checkpoints: None,
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self::new(config.model_cache_dir()?))
    }

    pub fn with_retention(mut self, max_checkpoints: usize) -> Self {
        self.max_checkpoints = Some(max_checkpoints);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path handed to `save_model`/`load_model` for `name`
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Create the directory if needed
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        checkpoint_file(&self.path(name)).exists()
    }

    /// Checkpoint names in lexicographic order; a missing directory is empty
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Last name in lexicographic order; timestamped names sort chronologically
    pub fn latest(&self) -> Result<Option<String>> {
        Ok(self.list()?.pop())
    }

    /// Delete the oldest checkpoints beyond the retention limit
    pub fn prune(&self) -> Result<Vec<String>> {
        let Some(max) = self.max_checkpoints else {
            return Ok(Vec::new());
        };

        let names = self.list()?;
        if names.len() <= max {
            return Ok(Vec::new());
        }

        let to_remove = names.len() - max;
        let mut removed = Vec::with_capacity(to_remove);
        for name in names.into_iter().take(to_remove) {
            let file = checkpoint_file(&self.path(&name));
            match fs::remove_file(&file) {
                Ok(()) => {
                    info!("Removed old checkpoint: {}", name);
                    removed.push(name);
                }
                Err(e) => warn!("Failed to remove old checkpoint {:?}: {}", file, e),
            }
        }
        Ok(removed)
    }
}

/// Checkpoint name with a UTC timestamp suffix
pub fn timestamped_name(prefix: &str) -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"))
}
