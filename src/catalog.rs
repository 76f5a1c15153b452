//! Layer Catalog - Trait Libraries per Layer Configuration
//!
//! One directory per layer, one asset file per trait element. File names
//! carry the display name and an optional rarity weight:
//! `Blue Eyes#40.png` is "Blue Eyes" with weight 40.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::compose::BlendMode;
use crate::config::{EngineConfig, LayerConfigurationSpec};
use crate::error::{EngineError, EngineResult};
use crate::render::RenderLayer;

/// One interchangeable asset within a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraitElement {
    /// Position in load order; unique within its layer for this run only.
    pub id: u32,
    pub name: String,
    pub filename: String,
    pub path: PathBuf,
    pub weight: u32,
}

impl TraitElement {
    pub fn new(id: u32, name: impl Into<String>, weight: u32) -> Self {
        let name = name.into();
        let filename = format!("{}.png", name);
        Self {
            id,
            path: PathBuf::from(&filename),
            filename,
            name,
            weight: weight.max(1),
        }
    }
}

/// Callback run against a resolved layer right before it is rendered.
#[derive(Clone)]
pub struct LayerHook(Arc<dyn Fn(&mut RenderLayer) + Send + Sync>);

impl LayerHook {
    pub fn new(f: impl Fn(&mut RenderLayer) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, layer: &mut RenderLayer) {
        (self.0)(layer)
    }
}

impl fmt::Debug for LayerHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LayerHook")
    }
}

impl PartialEq for LayerHook {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub index: usize,
    /// Display name, used as the attribute trait type.
    pub name: String,
    pub elements: Vec<TraitElement>,
    pub blend: BlendMode,
    pub opacity: f32,
    pub bypass_dna: bool,
    pub update_hook: Option<LayerHook>,
}

impl Layer {
    pub fn new(index: usize, name: impl Into<String>, elements: Vec<TraitElement>) -> Self {
        Self {
            index,
            name: name.into(),
            elements,
            blend: BlendMode::default(),
            opacity: 1.0,
            bypass_dna: false,
            update_hook: None,
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass_dna = bypass;
        self
    }

    pub fn element(&self, id: u32) -> Option<&TraitElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn total_weight(&self) -> u64 {
        self.elements.iter().map(|e| u64::from(e.weight)).sum()
    }
}

/// A resolved batch: ordered layers plus how many editions it contributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfiguration {
    pub index: usize,
    pub layers: Vec<Layer>,
    pub target_count: u32,
}

/// Supplies the layers of a batch when the scheduler first reaches it.
pub trait CatalogSource {
    /// Checks run before any edition is generated.
    fn preflight(&self, _config: &EngineConfig) -> EngineResult<()> {
        Ok(())
    }

    fn load(
        &self,
        index: usize,
        spec: &LayerConfigurationSpec,
        target_count: u32,
    ) -> EngineResult<LayerConfiguration>;
}

/// Filesystem-backed catalog rooted at the layers directory.
pub struct LayerCatalog {
    layers_dir: PathBuf,
    rarity_delimiter: String,
    hooks: HashMap<String, LayerHook>,
}

impl LayerCatalog {
    pub fn new(layers_dir: impl Into<PathBuf>, rarity_delimiter: impl Into<String>) -> Self {
        Self {
            layers_dir: layers_dir.into(),
            rarity_delimiter: rarity_delimiter.into(),
            hooks: HashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.layers_dir, &config.rarity_delimiter)
    }

    /// Attach an update hook to every layer loaded from directory `layer_name`.
    pub fn with_hook(mut self, layer_name: impl Into<String>, hook: LayerHook) -> Self {
        self.hooks.insert(layer_name.into(), hook);
        self
    }

    /// Read one layer directory into elements, ordered by file name.
    pub fn read_elements(&self, dir: &Path) -> EngineResult<Vec<TraitElement>> {
        let unreadable = |source| EngineError::LayerDirectory {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = vec![];
        for entry in fs::read_dir(dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with('.') {
                continue;
            }
            if !entry.file_type().map_err(unreadable)?.is_file() {
                continue;
            }
            files.push(filename);
        }
        files.sort();

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(id, filename)| {
                let (name, weight) = parse_element_filename(&filename, &self.rarity_delimiter);
                TraitElement {
                    id: id as u32,
                    name,
                    path: dir.join(&filename),
                    filename,
                    weight,
                }
            })
            .collect())
    }

    /// Elements of the named layer directory; an empty layer has zero total
    /// weight and is a configuration error.
    fn read_layer(&self, name: &str) -> EngineResult<Vec<TraitElement>> {
        let elements = self.read_elements(&self.layers_dir.join(name))?;
        if elements.is_empty() {
            return Err(EngineError::configuration(format!(
                "layer '{}' has no elements",
                name
            )));
        }
        Ok(elements)
    }
}

impl CatalogSource for LayerCatalog {
    /// Every referenced layer must be readable and hold at least one element.
    fn preflight(&self, config: &EngineConfig) -> EngineResult<()> {
        let mut checked = HashSet::new();
        for batch in &config.layer_configurations {
            for layer in &batch.layers_order {
                if checked.insert(layer.name.as_str()) {
                    self.read_layer(&layer.name)?;
                }
            }
        }
        Ok(())
    }

    fn load(
        &self,
        index: usize,
        spec: &LayerConfigurationSpec,
        target_count: u32,
    ) -> EngineResult<LayerConfiguration> {
        let mut layers = Vec::with_capacity(spec.layers_order.len());
        for (layer_index, layer_spec) in spec.layers_order.iter().enumerate() {
            let elements = self.read_layer(&layer_spec.name)?;

            let options = &layer_spec.options;
            layers.push(Layer {
                index: layer_index,
                name: options
                    .display_name
                    .clone()
                    .unwrap_or_else(|| layer_spec.name.clone()),
                elements,
                blend: options.blend.clone(),
                opacity: options.opacity,
                bypass_dna: options.bypass_dna,
                update_hook: self.hooks.get(&layer_spec.name).cloned(),
            });
        }

        debug!(
            batch = index,
            layers = layers.len(),
            target_count,
            "loaded layer configuration"
        );

        Ok(LayerConfiguration {
            index,
            layers,
            target_count,
        })
    }
}

/// Split `Name#Weight.ext` into display name and weight.
///
/// A missing, unparsable or zero weight counts as 1.
pub fn parse_element_filename(filename: &str, delimiter: &str) -> (String, u32) {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    let name = stem
        .split(delimiter)
        .next()
        .unwrap_or(stem.as_str())
        .to_string();

    let weight = match stem.rsplit_once(delimiter) {
        Some((_, raw)) => match raw.trim().parse::<u32>() {
            Ok(w) if w > 0 => w,
            _ => {
                warn!(filename, "unusable rarity weight, defaulting to 1");
                1
            }
        },
        None => 1,
    };

    (name, weight)
}
