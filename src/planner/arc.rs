//! The arc primitive and its discretization.
//!
//! An [`Arc`] is the planner's output unit: a circular segment described
//! by center, radius and swept angle. Arcs are produced by classifying the
//! samples of a full circle against the uncovered region and grouping the
//! surviving samples into maximal angular runs.

use geo::{Coord, LineString, Point};

use crate::{CoordF, EPSILON};

const TAU: CoordF = 2.0 * std::f64::consts::PI;

/// A planned circular arc.
///
/// `start_angle` is measured counter-clockwise from the positive x axis;
/// `sweep` is the positive swept angle in the arc's direction.
#[derive(Clone, Debug, PartialEq)]
pub struct Arc {
    pub center: Point<CoordF>,
    pub radius: CoordF,
    pub start_angle: CoordF,
    pub sweep: CoordF,
    /// Direction of travel; the planner always emits counter-clockwise.
    pub ccw: bool,
}

impl Arc {
    /// Arc length in mm.
    #[inline]
    pub fn length(&self) -> CoordF {
        self.radius * self.sweep
    }

    /// End angle in the direction of travel.
    #[inline]
    pub fn end_angle(&self) -> CoordF {
        if self.ccw {
            self.start_angle + self.sweep
        } else {
            self.start_angle - self.sweep
        }
    }

    /// Point on the arc at the given angle.
    #[inline]
    pub fn point_at(&self, angle: CoordF) -> Point<CoordF> {
        Point::new(
            self.center.x() + self.radius * angle.cos(),
            self.center.y() + self.radius * angle.sin(),
        )
    }

    /// First point of the arc in travel direction.
    #[inline]
    pub fn start_point(&self) -> Point<CoordF> {
        self.point_at(self.start_angle)
    }

    /// Last point of the arc in travel direction.
    #[inline]
    pub fn end_point(&self) -> Point<CoordF> {
        self.point_at(self.end_angle())
    }

    /// True when the arc covers the full circle (within tolerance).
    #[inline]
    pub fn is_full_circle(&self) -> bool {
        self.sweep >= TAU - EPSILON
    }

    /// Discretize the arc at the given angular resolution, endpoints
    /// included.
    pub fn to_polyline(&self, angular_step: CoordF) -> LineString<CoordF> {
        let step = angular_step.max(EPSILON);
        // Round so that a sweep that is a whole multiple of the step
        // resamples exactly on the original grid.
        let n = ((self.sweep / step).round() as usize).max(1);
        let mut coords = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let t = i as CoordF / n as CoordF;
            let angle = if self.ccw {
                self.start_angle + self.sweep * t
            } else {
                self.start_angle - self.sweep * t
            };
            let p = self.point_at(angle);
            coords.push(Coord { x: p.x(), y: p.y() });
        }
        LineString::new(coords)
    }
}

/// Group circle samples satisfying `keep` into maximal angular runs,
/// wrapping across the 0/2π seam, and return them as arcs on the given
/// center and radius in increasing start-angle order.
///
/// Runs shorter than two samples are dropped; a run covering every sample
/// becomes a single full circle.
pub fn arcs_from_samples(
    center: Point<CoordF>,
    radius: CoordF,
    samples: &[(CoordF, Point<CoordF>)],
    keep: &[bool],
) -> Vec<Arc> {
    debug_assert_eq!(samples.len(), keep.len());
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let step = TAU / n as CoordF;

    if keep.iter().all(|k| *k) {
        return vec![Arc {
            center,
            radius,
            start_angle: samples[0].0,
            sweep: TAU,
            ccw: true,
        }];
    }

    // Collect runs of consecutive kept samples as (start index, length).
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for i in 0..n {
        if keep[i] {
            current = Some(match current {
                None => (i, 1),
                Some((s, l)) => (s, l + 1),
            });
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current.take() {
        runs.push(run);
    }

    // Stitch the wrap-around run.
    if runs.len() >= 2 && keep[0] && keep[n - 1] {
        let head = runs.remove(0);
        if let Some(tail) = runs.last_mut() {
            tail.1 += head.1;
        }
    }

    let mut arcs: Vec<Arc> = runs
        .into_iter()
        .filter(|(_, len)| *len >= 2)
        .map(|(start, len)| Arc {
            center,
            radius,
            start_angle: samples[start].0,
            sweep: (len - 1) as CoordF * step,
            ccw: true,
        })
        .collect();

    arcs.sort_by(|a, b| {
        a.start_angle
            .partial_cmp(&b.start_angle)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    arcs
}
