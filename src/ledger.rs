//! Uniqueness Ledger - Admission Control
//!
//! The ledger decides, the scheduler acts. A duplicate genome is the only
//! recoverable outcome in the pipeline; a long enough streak of them is not.

use std::collections::HashSet;
use tracing::debug;

use crate::catalog::LayerConfiguration;
use crate::dna::DnaCodec;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Canonical genome already seen; `streak` counts consecutive rejections.
    Rejected { streak: u32 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Canonical genomes admitted this run plus the current rejection streak.
#[derive(Debug)]
pub struct UniquenessLedger {
    seen: HashSet<String>,
    streak: u32,
    tolerance: u32,
    total_rejections: u64,
}

impl UniquenessLedger {
    pub fn new(tolerance: u32) -> Self {
        Self {
            seen: HashSet::new(),
            streak: 0,
            tolerance,
            total_rejections: 0,
        }
    }

    /// Admit `genome` if its canonical key is new.
    ///
    /// Fails with [`EngineError::Exhausted`] on the rejection that brings the
    /// streak to the tolerance.
    pub fn admit(&mut self, genome: &str, batch: &LayerConfiguration) -> EngineResult<Admission> {
        let key = DnaCodec::canonicalize(genome);
        if self.seen.insert(key) {
            self.streak = 0;
            return Ok(Admission::Admitted);
        }

        self.streak += 1;
        self.total_rejections += 1;
        debug!(batch = batch.index, streak = self.streak, "DNA exists");

        if self.streak >= self.tolerance {
            return Err(EngineError::Exhausted {
                batch: batch.index,
                target: batch.target_count,
                rejections: self.streak,
            });
        }
        Ok(Admission::Rejected {
            streak: self.streak,
        })
    }

    pub fn contains(&self, genome: &str) -> bool {
        self.seen.contains(&DnaCodec::canonicalize(genome))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn total_rejections(&self) -> u64 {
        self.total_rejections
    }
}
