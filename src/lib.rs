//! Edition Forge Core - Generative Layered Editions
//!
//! # Run Guarantees
//! 1. One trait per layer, drawn by rarity weight
//! 2. No two editions share a canonical genome
//! 3. Every edition index is handed out exactly once
//! 4. Generation is single-threaded; only rendering fans out
//! 5. Any fatal condition aborts the whole run

pub mod error;
pub mod config;
pub mod catalog;
pub mod sampler;
pub mod dna;
pub mod ledger;
pub mod hashing;
pub mod metadata;
pub mod render;
pub mod compose;
pub mod storage;
pub mod scheduler;

pub use error::{EngineError, EngineResult};
pub use config::{EngineConfig, LayerConfigurationSpec, LayerSpec, LayerOptions};
pub use catalog::{CatalogSource, Layer, LayerCatalog, LayerConfiguration, LayerHook, TraitElement};
pub use sampler::WeightedSampler;
pub use dna::{DnaCodec, Selection, DNA_DELIMITER};
pub use ledger::{Admission, UniquenessLedger};
pub use hashing::{canonical_json, compute_manifest_hash, genome_hash};
pub use metadata::{Attribute, MetadataAssembler, MetadataRecord, MetadataSchema, Network};
pub use render::{PerformanceTier, RenderDispatch, RenderJob, RenderLayer, RenderTicket, Renderer};
pub use compose::{BlendMode, ImageRenderer};
pub use storage::{BuildLayout, FsMetadataStore, MetadataStore};
pub use scheduler::{build_collection, Edition, EditionScheduler, RunState, RunSummary};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
