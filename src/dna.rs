//! Genome (DNA) encoding.
//!
//! A genome is one `<elementId>:<filename>` segment per layer, joined with
//! [`DNA_DELIMITER`]. Layers excluded from the uniqueness check carry a
//! `?bypassDNA=true` suffix, and canonicalization drops those segments.

use crate::catalog::{Layer, TraitElement};
use crate::error::{EngineError, EngineResult};

pub const DNA_DELIMITER: &str = "-";
const BYPASS_QUERY: &str = "bypassDNA=true";

/// One layer's pick inside a genome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub layer: &'a Layer,
    pub element: &'a TraitElement,
}

pub struct DnaCodec;

impl DnaCodec {
    pub fn encode(selections: &[Selection<'_>]) -> String {
        selections
            .iter()
            .map(|s| {
                let mut segment = format!("{}:{}", s.element.id, s.element.filename);
                if s.layer.bypass_dna {
                    segment.push('?');
                    segment.push_str(BYPASS_QUERY);
                }
                segment
            })
            .collect::<Vec<_>>()
            .join(DNA_DELIMITER)
    }

    /// The uniqueness key: query suffixes stripped, bypass segments removed.
    pub fn canonicalize(genome: &str) -> String {
        split_segments(genome)
            .into_iter()
            .filter(|segment| !is_bypass(segment))
            .map(strip_query)
            .collect::<Vec<_>>()
            .join(DNA_DELIMITER)
    }

    pub fn decode<'a>(genome: &str, layers: &'a [Layer]) -> EngineResult<Vec<Selection<'a>>> {
        let segments = split_segments(genome);
        if segments.len() != layers.len() {
            return Err(EngineError::genome(format!(
                "genome has {} segments but the configuration has {} layers",
                segments.len(),
                layers.len()
            )));
        }

        segments
            .into_iter()
            .zip(layers)
            .map(|(segment, layer)| {
                let id = element_id(segment).ok_or_else(|| {
                    EngineError::genome(format!("malformed genome segment '{}'", segment))
                })?;
                let element = layer.element(id).ok_or_else(|| {
                    EngineError::genome(format!(
                        "layer '{}' has no element with id {}",
                        layer.name, id
                    ))
                })?;
                Ok(Selection { layer, element })
            })
            .collect()
    }
}

/// Split on the delimiter only where a new `<digits>:` segment begins, so
/// asset file names containing the delimiter stay intact.
fn split_segments(genome: &str) -> Vec<&str> {
    if genome.is_empty() {
        return vec![];
    }
    let mut segments = vec![];
    let mut start = 0;
    for (pos, _) in genome.match_indices(DNA_DELIMITER) {
        let next = pos + DNA_DELIMITER.len();
        if pos > start && starts_segment(&genome[next..]) {
            segments.push(&genome[start..pos]);
            start = next;
        }
    }
    segments.push(&genome[start..]);
    segments
}

fn starts_segment(rest: &str) -> bool {
    match rest.split_once(':') {
        Some((digits, _)) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn strip_query(segment: &str) -> &str {
    segment.split_once('?').map_or(segment, |(head, _)| head)
}

fn is_bypass(segment: &str) -> bool {
    segment
        .split_once('?')
        .is_some_and(|(_, query)| query.split('&').any(|kv| kv == BYPASS_QUERY))
}

fn element_id(segment: &str) -> Option<u32> {
    strip_query(segment).split_once(':')?.0.parse().ok()
}
