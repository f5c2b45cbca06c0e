//! Pipeline: orchestrates the full rewrite of a motion program.
//!
//! Processing runs in three phases so both the single-threaded default
//! and the optional parallel mode produce identical output:
//!
//! 1. **Plan**: every layer from the third up is scanned for bridge
//!    regions against its predecessor; each region is planned
//!    independently (optionally fanned out over a rayon pool).
//! 2. **Splice**: plans are rendered and spliced serially in layer
//!    order, regions within a layer in centroid order.
//! 3. **Cool**: layers above the emitted patches get the follow-up
//!    fan/speed overrides.
//!
//! Region-local failures (candidacy rejection, empty plan, timeout,
//! degenerate geometry) are logged and leave the region's original
//! bridge infill untouched; only parse and emit errors abort.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc as StdArc;

use crate::bridge::{BridgeRegion, RegionExtractor};
use crate::config::ArcConfig;
use crate::cooling::FollowupRewriter;
use crate::gcode::{advance_context, render_plan, splice_plan, EmitContext, MotionProgram};
use crate::planner::{plan_region, ArcPlan, PlanError};
use crate::{Error, Result};

/// Cooperative cancellation flag, checked between regions. A plan either
/// completes or is discarded; there is no mid-plan cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(StdArc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one bridge region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionOutcome {
    /// Arcs were emitted (count).
    Planned(usize),
    /// The planner produced no arcs; the bridge was left in place.
    PlanFailed,
    /// The per-region time budget expired.
    TimedOut,
    /// The region geometry degenerated.
    Degenerate,
}

/// Summary of one processing run.
#[derive(Clone, Debug, Default)]
pub struct ProcessReport {
    /// Layers examined.
    pub layers_seen: usize,
    /// Candidate regions found before filtering.
    pub regions_found: usize,
    /// Candidates dropped by the candidacy filter.
    pub regions_rejected: usize,
    /// Regions that passed the filter but failed to plan.
    pub regions_failed: usize,
    /// Regions successfully replaced by arcs.
    pub regions_planned: usize,
    /// Total arcs emitted.
    pub arcs_emitted: usize,
    /// Per-region outcomes, in processing order.
    pub outcomes: Vec<RegionOutcome>,
}

impl ProcessReport {
    /// True when the program was modified.
    pub fn modified(&self) -> bool {
        self.regions_planned > 0
    }
}

/// The arc overhang processing pipeline.
pub struct Pipeline {
    config: ArcConfig,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: ArcConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use an external cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process a motion program in place.
    pub fn process(&self, program: &mut MotionProgram) -> Result<ProcessReport> {
        self.config.validate()?;

        let mut report = ProcessReport {
            layers_seen: program.layers.len(),
            ..ProcessReport::default()
        };

        // Phase 1: extract and plan against the immutable program.
        let extractor = RegionExtractor::new(&self.config);
        let mut jobs: Vec<(usize, BridgeRegion)> = Vec::new();
        // The first two layers stay untouched; there is no overhang on
        // the first layer and the second rests on the setup moves.
        for idx in 2..program.layers.len() {
            let extraction = extractor.extract(&program.layers[idx], &program.layers[idx - 1]);
            report.regions_found += extraction.candidates;
            report.regions_rejected += extraction.rejected();
            for region in extraction.regions {
                jobs.push((idx, region));
            }
        }

        if report.regions_found == 0 {
            info!(
                "no bridge infill found across {} layers",
                report.layers_seen
            );
            return Ok(report);
        }

        let plans = self.plan_all(&jobs)?;

        // Phase 2: render and splice serially, in layer order.
        let mut contexts = layer_contexts(program);
        let mut rewriter = FollowupRewriter::new(&self.config);
        let mut job_iter = jobs.into_iter().zip(plans).peekable();
        loop {
            let Some(layer_idx) = job_iter.peek().map(|((idx, _), _)| *idx) else {
                break;
            };
            let mut delete_ranges = Vec::new();
            let mut block: Vec<String> = Vec::new();

            while let Some(((idx, region), plan)) =
                job_iter.next_if(|((idx, _), _)| *idx == layer_idx)
            {
                debug_assert_eq!(idx, layer_idx);
                match plan {
                    Ok(plan) => {
                        let ctx = &contexts[layer_idx];
                        let lines = render_plan(&plan, ctx, &self.config)?;
                        report.arcs_emitted += plan.arcs.len();
                        report.regions_planned += 1;
                        report.outcomes.push(RegionOutcome::Planned(plan.arcs.len()));
                        delete_ranges.extend(region.delete_ranges.iter().cloned());
                        block.extend(lines);
                        rewriter.add_patch(region.polygon, program.layers[layer_idx].z);
                    }
                    Err(err) => {
                        warn!(
                            "layer {}: bridge region left in place: {}",
                            layer_idx, err
                        );
                        report.regions_failed += 1;
                        report.outcomes.push(match err {
                            PlanError::Empty => RegionOutcome::PlanFailed,
                            PlanError::Timeout => RegionOutcome::TimedOut,
                            PlanError::Degenerate => RegionOutcome::Degenerate,
                        });
                    }
                }
            }

            if !block.is_empty() {
                let layer = &mut program.layers[layer_idx];
                splice_plan(layer, &delete_ranges, block);
                // Later layers see the state left by the modified layer.
                contexts = layer_contexts(program);
            }
        }

        // Phase 3: cooling overrides above the patches.
        if report.regions_planned > 0 {
            for layer in program.layers.iter_mut() {
                if rewriter.applies_to(layer.z) {
                    rewriter.rewrite_layer(layer);
                }
            }
        }

        info!(
            "{} regions planned, {} rejected, {} failed, {} arcs emitted",
            report.regions_planned,
            report.regions_rejected,
            report.regions_failed,
            report.arcs_emitted
        );
        Ok(report)
    }

    /// Plan every job, serially or on a rayon pool.
    fn plan_all(
        &self,
        jobs: &[(usize, BridgeRegion)],
    ) -> Result<Vec<std::result::Result<ArcPlan, PlanError>>> {
        if self.config.threads > 1 {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()
                .map_err(|e| Error::Config(format!("thread pool: {}", e)))?;
            debug!(
                "planning {} regions on {} threads",
                jobs.len(),
                self.config.threads
            );
            Ok(pool.install(|| {
                jobs.par_iter()
                    .map(|(_, region)| {
                        plan_region(&region.polygon, &region.anchor, &self.config)
                    })
                    .collect()
            }))
        } else {
            let mut plans = Vec::with_capacity(jobs.len());
            for (_, region) in jobs {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                plans.push(plan_region(&region.polygon, &region.anchor, &self.config));
            }
            Ok(plans)
        }
    }
}

/// The printer state in effect at the start of each layer's body, derived
/// from the preamble and all preceding layers.
fn layer_contexts(program: &MotionProgram) -> Vec<EmitContext> {
    let mut contexts = Vec::with_capacity(program.layers.len());
    let mut ctx = EmitContext::default();
    advance_context(&mut ctx, &program.preamble);
    for layer in &program.layers {
        contexts.push(ctx.clone());
        advance_context(&mut ctx, &layer.lines);
    }
    contexts
}
