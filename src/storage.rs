//! Build output layout and metadata persistence.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::metadata::MetadataRecord;

pub const AGGREGATE_METADATA_FILE: &str = "_metadata.json";

/// Directory scaffolding under the build root.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn json_dir(&self) -> PathBuf {
        self.root.join("json")
    }

    pub fn gifs_dir(&self) -> PathBuf {
        self.root.join("gifs")
    }

    /// Wipe the build root and recreate the output directories.
    pub fn setup(&self, with_gifs: bool) -> EngineResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.json_dir())?;
        if with_gifs {
            fs::create_dir_all(self.gifs_dir())?;
            warn!("gif export requested; animated output is not encoded by this engine");
        }
        debug!(root = %self.root.display(), "build directory ready");
        Ok(())
    }
}

/// Where per-edition and aggregate metadata records end up.
pub trait MetadataStore {
    fn write_edition(&mut self, record: &MetadataRecord) -> EngineResult<()>;
    fn write_aggregate(&mut self, records: &[MetadataRecord]) -> EngineResult<()>;
}

/// Writes `<json>/<edition>.json` and `<json>/_metadata.json`.
pub struct FsMetadataStore {
    json_dir: PathBuf,
}

impl FsMetadataStore {
    pub fn new(json_dir: impl Into<PathBuf>) -> Self {
        Self {
            json_dir: json_dir.into(),
        }
    }

    pub fn from_layout(layout: &BuildLayout) -> Self {
        Self::new(layout.json_dir())
    }
}

impl MetadataStore for FsMetadataStore {
    fn write_edition(&mut self, record: &MetadataRecord) -> EngineResult<()> {
        let path = self.json_dir.join(format!("{}.json", record.edition()));
        debug!(edition = record.edition(), "Writing metadata");
        fs::write(path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    fn write_aggregate(&mut self, records: &[MetadataRecord]) -> EngineResult<()> {
        let path = self.json_dir.join(AGGREGATE_METADATA_FILE);
        fs::write(path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::metadata::MetadataAssembler;
    use crate::scheduler::Edition;

    #[test]
    fn test_setup_recreates_build_root() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = BuildLayout::new(tmp.path().join("build"));
        fs::create_dir_all(layout.images_dir()).unwrap();
        fs::write(layout.images_dir().join("stale.png"), b"old").unwrap();

        layout.setup(true).unwrap();
        assert!(layout.images_dir().is_dir());
        assert!(layout.json_dir().is_dir());
        assert!(layout.gifs_dir().is_dir());
        assert!(!layout.images_dir().join("stale.png").exists());
    }

    #[test]
    fn test_fs_store_writes_edition_and_aggregate() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = BuildLayout::new(tmp.path());
        layout.setup(false).unwrap();

        let assembler = MetadataAssembler::from_config(&EngineConfig::new(vec![]));
        let record = assembler.assemble(
            &Edition {
                index: 12,
                batch_index: 0,
                genome: "0:a.png".into(),
                attributes: vec![],
            },
            0,
        );

        let mut store = FsMetadataStore::from_layout(&layout);
        store.write_edition(&record).unwrap();
        store.write_aggregate(std::slice::from_ref(&record)).unwrap();

        let single: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(layout.json_dir().join("12.json")).unwrap())
                .unwrap();
        assert_eq!(single["edition"], 12);

        let all: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(layout.json_dir().join(AGGREGATE_METADATA_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);
    }
}
