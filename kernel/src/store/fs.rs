// Filesystem Artifact Store
//
// Artifacts are immutable JSON files under `<root>/artifacts`, named by
// kind and UUID. `<root>/manifest.json` points at the active set and is
// replaced by write-to-temp + rename, so a commit becomes visible in a
// single step. Each publish writes its own uniquely named temp file, and a
// commit re-checks the manifest generation just before the rename. Files
// no longer referenced stay behind for audit.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{ArtifactStore, Baseline, Basis, Commit, StoreError};
use crate::dataset::Dataset;
use crate::drift::DriftReport;
use crate::model::ModelArtifact;

const MANIFEST: &str = "manifest.json";
const ARTIFACTS: &str = "artifacts";

/// Pointer file naming the active artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub reference: Option<String>,
    pub current: Option<String>,
    pub model: Option<String>,
    pub report: Option<String>,
    /// Superseded model files, oldest first.
    #[serde(default)]
    pub retired_models: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let artifacts = root.join(ARTIFACTS);
        fs::create_dir_all(&artifacts).map_err(|source| StoreError::Io {
            path: artifacts,
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> Result<Manifest, StoreError> {
        let path = self.root.join(MANIFEST);
        if !path.exists() {
            return Ok(Manifest::default());
        }
        read_json(&path)
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(ARTIFACTS).join(name)
    }

    /// Write a new, never-overwritten artifact file and return its name.
    fn write_artifact<T: Serialize>(&self, kind: &str, value: &T) -> Result<String, StoreError> {
        let name = format!("{kind}-{}.json", Uuid::new_v4());
        write_json(&self.artifact_path(&name), value)?;
        Ok(name)
    }

    fn load<T: DeserializeOwned>(
        &self,
        name: Option<&String>,
        what: &'static str,
    ) -> Result<T, StoreError> {
        let name = name.ok_or(StoreError::Missing(what))?;
        read_json(&self.artifact_path(name))
    }

    /// Publish a manifest: temp file, flush, rename over the old one.
    fn publish(&self, mut manifest: Manifest) -> Result<(), StoreError> {
        manifest.updated_at = Some(Utc::now());
        let tmp = self.root.join(format!("{MANIFEST}.{}.tmp", Uuid::new_v4()));
        write_json(&tmp, &manifest)?;

        let target = self.root.join(MANIFEST);
        fs::rename(&tmp, &target).map_err(|source| StoreError::Io {
            path: target,
            source,
        })?;

        debug!(generation = manifest.generation, root = %self.root.display(), "manifest published");
        Ok(())
    }
}

impl ArtifactStore for FsStore {
    fn reference(&self) -> Result<Dataset, StoreError> {
        self.load(self.manifest()?.reference.as_ref(), "reference")
    }

    fn current(&self) -> Result<Dataset, StoreError> {
        self.load(self.manifest()?.current.as_ref(), "current")
    }

    fn active_model(&self) -> Result<Option<ModelArtifact>, StoreError> {
        let manifest = self.manifest()?;
        manifest
            .model
            .as_ref()
            .map(|name| read_json(&self.artifact_path(name)))
            .transpose()
    }

    fn latest_report(&self) -> Result<Option<DriftReport>, StoreError> {
        let manifest = self.manifest()?;
        manifest
            .report
            .as_ref()
            .map(|name| read_json(&self.artifact_path(name)))
            .transpose()
    }

    fn generation(&self) -> Result<u64, StoreError> {
        Ok(self.manifest()?.generation)
    }

    fn basis(&self) -> Result<Basis, StoreError> {
        let manifest = self.manifest()?;
        Ok(Basis {
            generation: manifest.generation,
            reference: self.load(manifest.reference.as_ref(), "reference")?,
            current: self.load(manifest.current.as_ref(), "current")?,
        })
    }

    fn commit(&mut self, commit: Commit<'_>) -> Result<u64, StoreError> {
        // Nothing below is visible until the manifest is swapped.
        let reference = self.write_artifact("reference", commit.reference)?;
        let model = self.write_artifact("model", commit.model)?;
        let report = self.write_artifact("report", commit.report)?;

        let mut manifest = self.manifest()?;
        if manifest.generation != commit.expected_generation {
            return Err(StoreError::Conflict {
                expected: commit.expected_generation,
                actual: manifest.generation,
            });
        }

        if let Some(previous) = manifest.model.replace(model) {
            manifest.retired_models.push(previous);
        }
        manifest.reference = Some(reference);
        manifest.report = Some(report);
        manifest.generation += 1;

        let generation = manifest.generation;
        self.publish(manifest)?;
        Ok(generation)
    }

    fn record_report(&mut self, report: &DriftReport) -> Result<(), StoreError> {
        let mut manifest = self.manifest()?;
        manifest.report = Some(self.write_artifact("report", report)?);
        self.publish(manifest)
    }

    fn reset(&mut self, baseline: Baseline) -> Result<(), StoreError> {
        let mut manifest = self.manifest()?;

        let reference = self.write_artifact("reference", &baseline.reference)?;
        let current = self.write_artifact("current", &baseline.current)?;
        let model = baseline
            .model
            .as_ref()
            .map(|model| self.write_artifact("model", model))
            .transpose()?;

        if let Some(previous) = manifest.model.take() {
            manifest.retired_models.push(previous);
        }
        manifest.reference = Some(reference);
        manifest.current = Some(current);
        manifest.model = model;
        manifest.report = None;
        manifest.generation += 1;

        self.publish(manifest)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = fs::File::create(path).map_err(io_err)?;
    file.write_all(&data).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
