//! Render dispatch.
//!
//! The scheduler hands every admitted edition to a [`RenderDispatch`]. With
//! one worker the renderer runs inline on the scheduler thread; with more,
//! jobs go to a rayon pool and report back over a channel. Either way the
//! first failure aborts the run.

use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::TraitElement;
use crate::compose::BlendMode;
use crate::dna::Selection;
use crate::error::{EngineError, EngineResult};

/// How much of the machine rendering may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    /// Single worker, rendering inline.
    #[default]
    #[serde(alias = "original")]
    Minimum,
    /// Leaves two cores free.
    Comfortable,
    /// Leaves one core free.
    Background,
    Maximum,
    Workers(usize),
}

impl PerformanceTier {
    pub fn worker_count(self) -> usize {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        self.worker_count_for(available)
    }

    pub fn worker_count_for(self, available: usize) -> usize {
        let n = match self {
            PerformanceTier::Minimum => 1,
            PerformanceTier::Comfortable => available.saturating_sub(2),
            PerformanceTier::Background => available.saturating_sub(1),
            PerformanceTier::Maximum => available,
            PerformanceTier::Workers(n) => n,
        };
        n.max(1)
    }
}

/// A layer with its chosen element, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayer {
    pub name: String,
    pub element: TraitElement,
    pub blend: BlendMode,
    pub opacity: f32,
}

/// Everything a worker needs to render one edition. Owned, so it can cross threads.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub edition: u32,
    pub batch_index: usize,
    pub layers: Vec<RenderLayer>,
}

impl RenderJob {
    /// Resolve selections into render layers, running any layer update hooks.
    pub fn from_selections(edition: u32, batch_index: usize, selections: &[Selection<'_>]) -> Self {
        let layers = selections
            .iter()
            .map(|s| {
                let mut layer = RenderLayer {
                    name: s.layer.name.clone(),
                    element: s.element.clone(),
                    blend: s.layer.blend.clone(),
                    opacity: s.layer.opacity,
                };
                if let Some(hook) = &s.layer.update_hook {
                    hook.apply(&mut layer);
                }
                layer
            })
            .collect();

        Self {
            edition,
            batch_index,
            layers,
        }
    }
}

/// Produces the artifact for one edition, keyed by its index.
///
/// Implementations write only to locations derived from `job.edition`, so
/// concurrent jobs never collide.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTicket {
    /// Rendered inline before `dispatch` returned.
    Completed { edition: u32 },
    /// Queued on the pool; its outcome arrives through `poll`/`drain`.
    Pending { edition: u32 },
}

struct RenderOutcome {
    edition: u32,
    result: EngineResult<()>,
}

enum DispatchMode {
    Inline,
    Pooled {
        pool: rayon::ThreadPool,
        tx: Sender<RenderOutcome>,
        rx: Receiver<RenderOutcome>,
    },
}

pub struct RenderDispatch {
    renderer: Arc<dyn Renderer>,
    mode: DispatchMode,
    submitted: u32,
    completed: u32,
}

impl RenderDispatch {
    pub fn inline(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            mode: DispatchMode::Inline,
            submitted: 0,
            completed: 0,
        }
    }

    pub fn pooled(renderer: Arc<dyn Renderer>, workers: usize) -> EngineResult<Self> {
        if workers == 0 {
            return Err(EngineError::configuration("render pool needs at least one worker"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("render-{i}"))
            .build()
            .map_err(|e| {
                EngineError::configuration(format!("failed to build render thread pool: {e}"))
            })?;
        let (tx, rx) = mpsc::channel();

        Ok(Self {
            renderer,
            mode: DispatchMode::Pooled { pool, tx, rx },
            submitted: 0,
            completed: 0,
        })
    }

    /// Inline for a single worker, pooled otherwise.
    pub fn for_tier(renderer: Arc<dyn Renderer>, tier: PerformanceTier) -> EngineResult<Self> {
        let workers = tier.worker_count();
        debug!(?tier, workers, "render dispatch sized");
        if workers > 1 {
            Self::pooled(renderer, workers)
        } else {
            Ok(Self::inline(renderer))
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.mode, DispatchMode::Pooled { .. })
    }

    pub fn submitted(&self) -> u32 {
        self.submitted
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn dispatch(&mut self, job: RenderJob) -> EngineResult<RenderTicket> {
        let edition = job.edition;
        self.submitted += 1;

        match &self.mode {
            DispatchMode::Inline => {
                self.renderer
                    .render(&job)
                    .map_err(|err| render_failure(edition, err))?;
                self.completed += 1;
                info!(edition, "Created image for edition");
                Ok(RenderTicket::Completed { edition })
            }
            DispatchMode::Pooled { pool, tx, .. } => {
                let renderer = Arc::clone(&self.renderer);
                let tx = tx.clone();
                pool.spawn(move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&job)))
                        .unwrap_or_else(|_| {
                            Err(EngineError::render(edition, "render worker panicked"))
                        });
                    // The receiver is gone once the run has aborted.
                    let _ = tx.send(RenderOutcome { edition, result });
                });
                Ok(RenderTicket::Pending { edition })
            }
        }
    }

    /// Collect outcomes already reported without blocking.
    pub fn poll(&mut self) -> EngineResult<()> {
        loop {
            let outcome = match &self.mode {
                DispatchMode::Inline => return Ok(()),
                DispatchMode::Pooled { rx, .. } => match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => return Ok(()),
                },
            };
            self.record(outcome)?;
        }
    }

    /// Wait for every submitted job, returning at the first failure.
    pub fn drain(&mut self) -> EngineResult<u32> {
        while self.completed < self.submitted {
            let outcome = match &self.mode {
                DispatchMode::Inline => break,
                DispatchMode::Pooled { rx, .. } => rx.recv().map_err(|_| {
                    EngineError::configuration("render pool channel disconnected unexpectedly")
                })?,
            };
            self.record(outcome)?;
        }
        Ok(self.completed)
    }

    fn record(&mut self, outcome: RenderOutcome) -> EngineResult<()> {
        match outcome.result {
            Ok(()) => {
                self.completed += 1;
                info!(edition = outcome.edition, "Created image for edition");
                Ok(())
            }
            Err(err) => Err(render_failure(outcome.edition, err)),
        }
    }
}

/// Any renderer error aborts the run as a render failure of `edition`.
fn render_failure(edition: u32, err: EngineError) -> EngineError {
    match err {
        EngineError::Render { .. } => err,
        other => EngineError::render(edition, other.to_string()),
    }
}
