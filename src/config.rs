//! Configuration Surface - Run Contracts
//!
//! A run is described by one JSON document. Keys are camelCase; anything
//! optional has a default so a minimal file only names its layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compose::BlendMode;
use crate::error::{EngineError, EngineResult};
use crate::metadata::Network;
use crate::render::PerformanceTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_layers_dir")]
    pub layers_dir: PathBuf,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_uri: String,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(
        rename = "uniqueDnaTorrance",
        alias = "uniqueDnaTolerance",
        default = "default_tolerance"
    )]
    pub unique_dna_tolerance: u32,
    pub layer_configurations: Vec<LayerConfigurationSpec>,
    #[serde(default = "default_rarity_delimiter")]
    pub rarity_delimiter: String,
    #[serde(default)]
    pub shuffle_layer_configurations: bool,
    #[serde(default)]
    pub extra_metadata: Map<String, Value>,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub solana_metadata: SolanaMetadata,
    #[serde(default)]
    pub background: BackgroundOptions,
    #[serde(default)]
    pub format: FormatOptions,
    #[serde(default)]
    pub gif: GifOptions,
    #[serde(default)]
    pub render_performance: PerformanceTier,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_layers_dir() -> PathBuf { PathBuf::from("layers") }
fn default_build_dir() -> PathBuf { PathBuf::from("build") }
fn default_tolerance() -> u32 { 10_000 }
fn default_rarity_delimiter() -> String { "#".to_string() }
fn default_opacity() -> f32 { 1.0 }

/// One batch: the layers stacked for it and the edition count it grows to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfigurationSpec {
    /// Cumulative across batches, as in `[5, 8]` for batches of 5 and 3.
    pub grow_edition_size_to: u32,
    pub layers_order: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Directory name under `layersDir`.
    pub name: String,
    #[serde(default)]
    pub options: LayerOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOptions {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub blend: BlendMode,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(rename = "bypassDNA", default)]
    pub bypass_dna: bool,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            display_name: None,
            blend: BlendMode::default(),
            opacity: default_opacity(),
            bypass_dna: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaMetadata {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub seller_fee_basis_points: u32,
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub creators: Vec<Creator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub address: String,
    pub share: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundOptions {
    #[serde(default = "default_true")]
    pub generate: bool,
    #[serde(rename = "static", default)]
    pub fixed: bool,
    #[serde(rename = "default", default = "default_background_color")]
    pub default_color: String,
    #[serde(default = "default_brightness")]
    pub brightness: String,
}

fn default_true() -> bool { true }
fn default_background_color() -> String { "#000000".to_string() }
fn default_brightness() -> String { "80%".to_string() }

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            generate: true,
            fixed: false,
            default_color: default_background_color(),
            brightness: default_brightness(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FormatOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { width: 512, height: 512 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifOptions {
    #[serde(default)]
    pub export: bool,
    #[serde(default)]
    pub repeat: i32,
    #[serde(default = "default_gif_quality")]
    pub quality: u32,
    #[serde(default = "default_gif_delay")]
    pub delay: u32,
}

fn default_gif_quality() -> u32 { 100 }
fn default_gif_delay() -> u32 { 500 }

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            export: false,
            repeat: 0,
            quality: default_gif_quality(),
            delay: default_gif_delay(),
        }
    }
}

impl EngineConfig {
    /// Minimal configuration over the given batches; everything else defaulted.
    pub fn new(layer_configurations: Vec<LayerConfigurationSpec>) -> Self {
        Self {
            layers_dir: default_layers_dir(),
            build_dir: default_build_dir(),
            description: String::new(),
            base_uri: String::new(),
            name_prefix: String::new(),
            unique_dna_tolerance: default_tolerance(),
            layer_configurations,
            rarity_delimiter: default_rarity_delimiter(),
            shuffle_layer_configurations: false,
            extra_metadata: Map::new(),
            network: Network::default(),
            solana_metadata: SolanaMetadata::default(),
            background: BackgroundOptions::default(),
            format: FormatOptions::default(),
            gif: GifOptions::default(),
            render_performance: PerformanceTier::default(),
            seed: None,
        }
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: EngineConfig = serde_json::from_str(&content)?;

        // Relative directories resolve against the config file's location.
        if let Some(base) = path.parent() {
            if config.layers_dir.is_relative() {
                config.layers_dir = base.join(&config.layers_dir);
            }
            if config.build_dir.is_relative() {
                config.build_dir = base.join(&config.build_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.layer_configurations.is_empty() {
            return Err(EngineError::configuration("no layer configurations defined"));
        }
        if self.unique_dna_tolerance == 0 {
            return Err(EngineError::configuration("uniqueDnaTorrance must be at least 1"));
        }
        if self.rarity_delimiter.is_empty() {
            return Err(EngineError::configuration("rarityDelimiter must not be empty"));
        }
        if let PerformanceTier::Workers(0) = self.render_performance {
            return Err(EngineError::configuration("renderPerformance workers must be >= 1"));
        }

        let mut previous = 0;
        for (index, batch) in self.layer_configurations.iter().enumerate() {
            if batch.grow_edition_size_to <= previous {
                return Err(EngineError::configuration(format!(
                    "layer configuration {} grows to {}, which does not exceed the previous {}",
                    index, batch.grow_edition_size_to, previous
                )));
            }
            previous = batch.grow_edition_size_to;

            if batch.layers_order.is_empty() {
                return Err(EngineError::configuration(format!(
                    "layer configuration {} has no layers",
                    index
                )));
            }
            for layer in &batch.layers_order {
                let opacity = layer.options.opacity;
                if !(0.0..=1.0).contains(&opacity) {
                    return Err(EngineError::configuration(format!(
                        "layer '{}' opacity {} is outside 0..=1",
                        layer.name, opacity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Per-batch edition counts derived from the cumulative `growEditionSizeTo`.
    pub fn batch_targets(&self) -> Vec<u32> {
        let mut previous = 0;
        self.layer_configurations
            .iter()
            .map(|batch| {
                let target = batch.grow_edition_size_to.saturating_sub(previous);
                previous = batch.grow_edition_size_to;
                target
            })
            .collect()
    }

    pub fn total_editions(&self) -> u32 {
        self.layer_configurations
            .last()
            .map_or(0, |batch| batch.grow_edition_size_to)
    }
}
