//! Edition Scheduler - Single Entry Point for a Run
//!
//! Sampling, admission, index assignment and metadata capture all happen on
//! the scheduler thread, in order. Only rendering leaves it.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::catalog::{CatalogSource, LayerCatalog, LayerConfiguration};
use crate::compose::ImageRenderer;
use crate::config::EngineConfig;
use crate::dna::{DnaCodec, Selection};
use crate::error::{EngineError, EngineResult};
use crate::hashing::{compute_manifest_hash, genome_hash};
use crate::ledger::UniquenessLedger;
use crate::metadata::{attributes_for, Attribute, MetadataAssembler, MetadataRecord, Network};
use crate::render::{RenderDispatch, RenderJob};
use crate::sampler::WeightedSampler;
use crate::storage::{BuildLayout, FsMetadataStore, MetadataStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    PendingConfig { batch: usize },
    Generating { batch: usize, admitted: u32 },
    ConfigDone { batch: usize },
    AllDone,
    Aborted,
}

/// One admitted output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edition {
    pub index: u32,
    pub batch_index: usize,
    pub genome: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub network: Network,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub editions: u32,
    pub rendered: u32,
    pub duplicate_rejections: u64,
    pub manifest_hash: String,
}

pub struct EditionScheduler<R: Rng> {
    config: EngineConfig,
    targets: Vec<u32>,
    rng: R,
    ledger: UniquenessLedger,
    index_pool: VecDeque<u32>,
    assembler: MetadataAssembler,
    metadata: Vec<MetadataRecord>,
    state: RunState,
}

impl EditionScheduler<StdRng> {
    /// Scheduler seeded from `config.seed`, or from entropy when unset.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng)
    }
}

impl<R: Rng> EditionScheduler<R> {
    pub fn new(config: &EngineConfig, mut rng: R) -> EngineResult<Self> {
        config.validate()?;
        let targets = config.batch_targets();

        let first = config.network.first_edition_index();
        let total: u32 = targets.iter().sum();
        let mut indices: Vec<u32> = (first..first + total).collect();
        if config.shuffle_layer_configurations {
            indices.shuffle(&mut rng);
        }

        Ok(Self {
            config: config.clone(),
            targets,
            rng,
            ledger: UniquenessLedger::new(config.unique_dna_tolerance),
            index_pool: indices.into(),
            assembler: MetadataAssembler::from_config(config),
            metadata: vec![],
            state: RunState::PendingConfig { batch: 0 },
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn metadata(&self) -> &[MetadataRecord] {
        &self.metadata
    }

    pub fn ledger(&self) -> &UniquenessLedger {
        &self.ledger
    }

    /// Indices not yet handed out, in the order they will be.
    pub fn remaining_indices(&self) -> impl Iterator<Item = &u32> {
        self.index_pool.iter()
    }

    pub fn total_editions(&self) -> u32 {
        self.targets.iter().sum()
    }

    pub fn run(
        &mut self,
        catalog: &dyn CatalogSource,
        dispatch: &mut RenderDispatch,
        store: &mut dyn MetadataStore,
    ) -> EngineResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("run", %run_id);
        let _enter = span.enter();

        let rendered = match self.drive(catalog, dispatch, store) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.state = RunState::Aborted;
                return Err(err);
            }
        };

        let summary = RunSummary {
            run_id,
            network: self.assembler.network(),
            started_at,
            finished_at: Utc::now(),
            editions: self.metadata.len() as u32,
            rendered,
            duplicate_rejections: self.ledger.total_rejections(),
            manifest_hash: compute_manifest_hash(&self.metadata)?,
        };
        info!(
            editions = summary.editions,
            elapsed_ms = (summary.finished_at - started_at).num_milliseconds(),
            "Create"
        );
        Ok(summary)
    }

    fn drive(
        &mut self,
        catalog: &dyn CatalogSource,
        dispatch: &mut RenderDispatch,
        store: &mut dyn MetadataStore,
    ) -> EngineResult<u32> {
        catalog.preflight(&self.config)?;

        let specs = self.config.layer_configurations.clone();
        for (index, spec) in specs.iter().enumerate() {
            self.state = RunState::PendingConfig { batch: index };
            let batch = catalog.load(index, spec, self.targets[index])?;
            self.generate_batch(&batch, dispatch, store)?;
            self.state = RunState::ConfigDone { batch: index };
        }

        let rendered = dispatch.drain()?;
        if rendered != self.total_editions() {
            return Err(EngineError::configuration(format!(
                "rendered {} editions but {} were admitted",
                rendered,
                self.total_editions()
            )));
        }
        if dispatch.is_pooled() {
            info!("Multiprocessing complete");
        }

        store.write_aggregate(&self.metadata)?;
        self.state = RunState::AllDone;
        Ok(rendered)
    }

    fn generate_batch(
        &mut self,
        batch: &LayerConfiguration,
        dispatch: &mut RenderDispatch,
        store: &mut dyn MetadataStore,
    ) -> EngineResult<()> {
        let mut admitted = 0;
        self.state = RunState::Generating {
            batch: batch.index,
            admitted,
        };

        while admitted < batch.target_count {
            let genome = self.sample_genome(batch)?;
            if !self.ledger.admit(&genome, batch)?.is_admitted() {
                continue;
            }

            let index = self.index_pool.pop_front().ok_or_else(|| {
                EngineError::configuration("edition index pool exhausted before target reached")
            })?;
            let selections = DnaCodec::decode(&genome, &batch.layers)?;
            let edition = Edition {
                index,
                batch_index: batch.index,
                attributes: attributes_for(&selections),
                genome,
            };
            self.capture_metadata(&edition, store)?;

            dispatch.dispatch(RenderJob::from_selections(index, batch.index, &selections))?;
            dispatch.poll()?;

            admitted += 1;
            self.state = RunState::Generating {
                batch: batch.index,
                admitted,
            };
        }
        Ok(())
    }

    fn sample_genome(&mut self, batch: &LayerConfiguration) -> EngineResult<String> {
        let rng = &mut self.rng;
        let selections = batch
            .layers
            .iter()
            .map(|layer| {
                Ok(Selection {
                    layer,
                    element: WeightedSampler::sample(layer, rng)?,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(DnaCodec::encode(&selections))
    }

    fn capture_metadata(
        &mut self,
        edition: &Edition,
        store: &mut dyn MetadataStore,
    ) -> EngineResult<()> {
        let record = self
            .assembler
            .assemble(edition, Utc::now().timestamp_millis());
        store.write_edition(&record)?;
        info!(
            edition = edition.index,
            dna = %genome_hash(&edition.genome),
            "Created metadata for edition"
        );
        self.metadata.push(record);
        Ok(())
    }
}

/// Set up the build directory and run every layer configuration in `config`
/// with the filesystem catalog, image renderer and JSON metadata store.
pub fn build_collection(config: &EngineConfig) -> EngineResult<RunSummary> {
    let layout = BuildLayout::new(&config.build_dir);
    layout.setup(config.gif.export)?;

    let catalog = LayerCatalog::from_config(config);
    let renderer = Arc::new(ImageRenderer::from_config(config, layout.images_dir()));
    let mut dispatch = RenderDispatch::for_tier(renderer, config.render_performance)?;
    let mut store = FsMetadataStore::from_layout(&layout);

    EditionScheduler::from_config(config)?.run(&catalog, &mut dispatch, &mut store)
}
