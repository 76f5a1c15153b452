//! Metadata Assembly - One Schema per Network
//!
//! The network decides the record shape. Each shape is its own strategy so
//! field layout never branches inline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{Creator, EngineConfig, SolanaMetadata};
use crate::dna::Selection;
use crate::hashing::genome_hash;
use crate::scheduler::Edition;
use crate::ENGINE_VERSION;

/// Which external network the collection targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Eth,
    Sol,
}

impl Network {
    /// Edition numbering starts at 0 on Solana and at 1 elsewhere.
    pub fn first_edition_index(self) -> u32 {
        match self {
            Network::Sol => 0,
            Network::Eth => 1,
        }
    }

    pub fn schema(self, config: &EngineConfig) -> Box<dyn MetadataSchema> {
        let common = CommonFields::from_config(config);
        match self {
            Network::Eth => Box::new(GenericSchema { common }),
            Network::Sol => Box::new(SolanaSchema {
                common,
                solana: config.solana_metadata.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

/// Attributes for an edition, one per layer in declaration order.
pub fn attributes_for(selections: &[Selection<'_>]) -> Vec<Attribute> {
    selections
        .iter()
        .map(|s| Attribute {
            trait_type: s.layer.name.clone(),
            value: s.element.name.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetadataRecord {
    Generic(GenericRecord),
    Solana(SolanaRecord),
}

impl MetadataRecord {
    pub fn edition(&self) -> u32 {
        match self {
            MetadataRecord::Generic(r) => r.edition,
            MetadataRecord::Solana(r) => r.edition,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetadataRecord::Generic(r) => &r.name,
            MetadataRecord::Solana(r) => &r.name,
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        match self {
            MetadataRecord::Generic(r) => &r.attributes,
            MetadataRecord::Solana(r) => &r.attributes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericRecord {
    pub name: String,
    pub description: String,
    pub image: String,
    pub dna: String,
    pub edition: u32,
    pub date: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub attributes: Vec<Attribute>,
    pub compiler: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolanaRecord {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub seller_fee_basis_points: u32,
    pub image: String,
    pub external_url: String,
    pub edition: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub attributes: Vec<Attribute>,
    pub properties: SolanaProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolanaProperties {
    pub files: Vec<SolanaFile>,
    pub category: String,
    pub creators: Vec<Creator>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolanaFile {
    pub uri: String,
    #[serde(rename = "type")]
    pub mime: String,
}

/// Builds one record shape from an admitted edition.
pub trait MetadataSchema: Send + Sync {
    fn network(&self) -> Network;
    fn assemble(&self, edition: &Edition, date: i64) -> MetadataRecord;
}

#[derive(Debug, Clone)]
struct CommonFields {
    name_prefix: String,
    description: String,
    base_uri: String,
    extra: Map<String, Value>,
}

impl CommonFields {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            name_prefix: config.name_prefix.clone(),
            description: config.description.clone(),
            base_uri: config.base_uri.clone(),
            extra: config.extra_metadata.clone(),
        }
    }

    fn name(&self, edition: u32) -> String {
        format!("{} #{}", self.name_prefix, edition)
    }
}

pub struct GenericSchema {
    common: CommonFields,
}

impl MetadataSchema for GenericSchema {
    fn network(&self) -> Network {
        Network::Eth
    }

    fn assemble(&self, edition: &Edition, date: i64) -> MetadataRecord {
        MetadataRecord::Generic(GenericRecord {
            name: self.common.name(edition.index),
            description: self.common.description.clone(),
            image: format!("{}/{}.png", self.common.base_uri, edition.index),
            dna: genome_hash(&edition.genome),
            edition: edition.index,
            date,
            extra: self.common.extra.clone(),
            attributes: edition.attributes.clone(),
            compiler: format!("Edition Forge {}", ENGINE_VERSION),
        })
    }
}

pub struct SolanaSchema {
    common: CommonFields,
    solana: SolanaMetadata,
}

impl MetadataSchema for SolanaSchema {
    fn network(&self) -> Network {
        Network::Sol
    }

    fn assemble(&self, edition: &Edition, _date: i64) -> MetadataRecord {
        MetadataRecord::Solana(SolanaRecord {
            name: self.common.name(edition.index),
            symbol: self.solana.symbol.clone(),
            description: self.common.description.clone(),
            seller_fee_basis_points: self.solana.seller_fee_basis_points,
            image: "image.png".to_string(),
            external_url: self.solana.external_url.clone(),
            edition: edition.index,
            extra: self.common.extra.clone(),
            attributes: edition.attributes.clone(),
            properties: SolanaProperties {
                files: vec![SolanaFile {
                    uri: "image.png".to_string(),
                    mime: "image/png".to_string(),
                }],
                category: "image".to_string(),
                creators: self.solana.creators.clone(),
            },
        })
    }
}

/// Applies the configured schema to admitted editions.
pub struct MetadataAssembler {
    schema: Box<dyn MetadataSchema>,
}

impl MetadataAssembler {
    pub fn new(schema: Box<dyn MetadataSchema>) -> Self {
        Self { schema }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.network.schema(config))
    }

    pub fn network(&self) -> Network {
        self.schema.network()
    }

    pub fn assemble(&self, edition: &Edition, date: i64) -> MetadataRecord {
        self.schema.assemble(edition, date)
    }
}
