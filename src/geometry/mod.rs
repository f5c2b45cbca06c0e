//! Geometry kernel for the arc planner.
//!
//! This module provides the distance and query helpers the extractor and
//! planner are built on, as thin wrappers over the `geo` crate:
//! - point-to-curve distance and nearest/farthest point queries
//! - fixed-resolution circle sampling
//! - shared-boundary extraction between overlapping polygons
//! - small vector helpers (`move_toward`, `polygon_diameter`)
//!
//! All coordinates are `f64` millimetres. Every operation is total on
//! degenerate input: an empty curve or polygon yields an empty result or
//! `None`, never an error.

use geo::{
    Centroid, Closest, ClosestPoint, Contains, Coord, EuclideanDistance, EuclideanLength,
    LineString, MultiLineString, Point, Polygon,
};

use crate::{CoordF, EPSILON};

/// Distance from a point to a linestring, in mm.
#[inline]
pub fn distance_point_to_line(pt: &Point<CoordF>, line: &LineString<CoordF>) -> CoordF {
    if line.0.is_empty() {
        return CoordF::INFINITY;
    }
    pt.euclidean_distance(line)
}

/// Distance from a point to the nearest component of a multi-linestring.
pub fn distance_point_to_multiline(pt: &Point<CoordF>, lines: &MultiLineString<CoordF>) -> CoordF {
    lines
        .0
        .iter()
        .map(|ls| distance_point_to_line(pt, ls))
        .fold(CoordF::INFINITY, CoordF::min)
}

/// Distance from a point to the boundary of a polygon (exterior and holes).
///
/// Unlike `EuclideanDistance<Polygon>`, this does not collapse to zero for
/// interior points; the distance to the nearest ring is always returned.
pub fn distance_point_to_boundary(pt: &Point<CoordF>, poly: &Polygon<CoordF>) -> CoordF {
    let mut dist = distance_point_to_line(pt, poly.exterior());
    for hole in poly.interiors() {
        dist = dist.min(distance_point_to_line(pt, hole));
    }
    dist
}

/// The point on a linestring nearest to `pt`. Returns `None` for an
/// empty or degenerate curve.
pub fn nearest_point_on(line: &LineString<CoordF>, pt: &Point<CoordF>) -> Option<Point<CoordF>> {
    match line.closest_point(pt) {
        Closest::SinglePoint(p) | Closest::Intersection(p) => Some(p),
        Closest::Indeterminate => line.0.first().map(|c| Point::from(*c)),
    }
}

/// ε-tolerant membership test: true if the point lies inside the polygon
/// or within `tol` of it.
#[inline]
pub fn contains_with_tolerance(poly: &Polygon<CoordF>, pt: &Point<CoordF>, tol: CoordF) -> bool {
    poly.contains(pt) || pt.euclidean_distance(poly) <= tol
}

/// The boundary of a polygon as a multi-linestring: the exterior ring
/// followed by the hole rings, each closed.
pub fn boundary_multiline(poly: &Polygon<CoordF>) -> MultiLineString<CoordF> {
    let mut rings = vec![poly.exterior().clone()];
    rings.extend(poly.interiors().iter().cloned());
    MultiLineString::new(rings)
}

/// Total length of a multi-linestring, in mm.
#[inline]
pub fn multiline_length(lines: &MultiLineString<CoordF>) -> CoordF {
    lines.0.iter().map(|ls| ls.euclidean_length()).sum()
}

/// The vertex of `from` that is farthest from `reference`, together with
/// that distance.
///
/// Ties within `EPSILON` are broken deterministically: smaller x wins,
/// then smaller y. Returns `None` when either input is empty.
pub fn farthest_vertex(
    from: &MultiLineString<CoordF>,
    reference: &MultiLineString<CoordF>,
) -> Option<(Point<CoordF>, CoordF)> {
    if reference.0.iter().all(|ls| ls.0.is_empty()) {
        return None;
    }

    let mut best: Option<(Point<CoordF>, CoordF)> = None;
    for ls in &from.0 {
        for coord in &ls.0 {
            let pt = Point::from(*coord);
            let dist = distance_point_to_multiline(&pt, reference);
            best = Some(match best {
                None => (pt, dist),
                Some((bp, bd)) => {
                    if dist > bd + EPSILON {
                        (pt, dist)
                    } else if (dist - bd).abs() <= EPSILON && tie_break_less(&pt, &bp) {
                        (pt, dist)
                    } else {
                        (bp, bd)
                    }
                }
            });
        }
    }
    best
}

/// Deterministic tie-break order: smaller x first, then smaller y.
#[inline]
fn tie_break_less(a: &Point<CoordF>, b: &Point<CoordF>) -> bool {
    if (a.x() - b.x()).abs() > EPSILON {
        a.x() < b.x()
    } else {
        a.y() < b.y()
    }
}

/// Move `p` by `dist` toward `target`. If the two coincide, `p` is
/// returned unchanged.
pub fn move_toward(p: Point<CoordF>, target: Point<CoordF>, dist: CoordF) -> Point<CoordF> {
    let dx = target.x() - p.x();
    let dy = target.y() - p.y();
    let len = (dx * dx + dy * dy).sqrt();
    if len < EPSILON {
        return p;
    }
    Point::new(p.x() + dx / len * dist, p.y() + dy / len * dist)
}

/// Sample a full circle at a fixed angular resolution, counter-clockwise
/// from angle zero. Returns `(angle, point)` pairs; the closing sample at
/// 2π is not repeated.
pub fn sample_circle(
    center: Point<CoordF>,
    radius: CoordF,
    angular_step: CoordF,
) -> Vec<(CoordF, Point<CoordF>)> {
    if radius <= 0.0 || angular_step <= 0.0 {
        return Vec::new();
    }
    let n = ((2.0 * std::f64::consts::PI) / angular_step).ceil() as usize;
    let step = 2.0 * std::f64::consts::PI / n as CoordF;
    (0..n)
        .map(|i| {
            let a = i as CoordF * step;
            (
                a,
                Point::new(center.x() + radius * a.cos(), center.y() + radius * a.sin()),
            )
        })
        .collect()
}

/// Maximum pairwise distance between exterior vertices, used as the
/// maximum inscribed linear extent of a region.
pub fn polygon_diameter(poly: &Polygon<CoordF>) -> CoordF {
    let pts: Vec<Coord<CoordF>> = poly.exterior().0.clone();
    let mut max = 0.0_f64;
    for i in 0..pts.len() {
        for j in (i + 1)..pts.len() {
            let dx = pts[i].x - pts[j].x;
            let dy = pts[i].y - pts[j].y;
            max = max.max((dx * dx + dy * dy).sqrt());
        }
    }
    max
}

/// Centroid of a polygon, falling back to the first exterior vertex for
/// degenerate (zero-area) input.
pub fn polygon_centroid(poly: &Polygon<CoordF>) -> Point<CoordF> {
    poly.centroid()
        .or_else(|| poly.exterior().0.first().map(|c| Point::from(*c)))
        .unwrap_or_else(|| Point::new(0.0, 0.0))
}

/// Vertex spacing used when densifying rings before boundary
/// classification. Long straight edges would otherwise be lost whenever a
/// single endpoint falls on the wrong side of the split.
const DENSIFY_STEP: CoordF = 0.5;

/// Insert intermediate vertices so that no segment of the linestring is
/// longer than `max_len`.
pub fn segmentize(line: &LineString<CoordF>, max_len: CoordF) -> LineString<CoordF> {
    if line.0.len() < 2 || max_len <= 0.0 {
        return line.clone();
    }
    let mut out: Vec<Coord<CoordF>> = Vec::with_capacity(line.0.len());
    for window in line.0.windows(2) {
        let (a, b) = (window[0], window[1]);
        out.push(a);
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len = (dx * dx + dy * dy).sqrt();
        let splits = (len / max_len).ceil() as usize;
        for i in 1..splits {
            let t = i as CoordF / splits as CoordF;
            out.push(Coord {
                x: a.x + dx * t,
                y: a.y + dy * t,
            });
        }
    }
    if let Some(last) = line.0.last() {
        out.push(*last);
    }
    LineString::new(out)
}

/// Extract the parts of `of`'s boundary that lie on `with`'s boundary.
///
/// A boundary vertex belongs to the shared part when it is within `tol` of
/// any ring of `with`; maximal runs of shared vertices become the output
/// linestrings. Rings are densified first so long edges split cleanly, and
/// on closed rings the run across the ring seam is stitched back together
/// so a contiguous shared stretch is reported as one piece.
pub fn shared_boundary(
    of: &Polygon<CoordF>,
    with: &Polygon<CoordF>,
    tol: CoordF,
) -> MultiLineString<CoordF> {
    let reference = boundary_multiline(with);
    let mut out: Vec<LineString<CoordF>> = Vec::new();
    for ring in boundary_multiline(of).0 {
        out.extend(split_ring_by(&segmentize(&ring, DENSIFY_STEP), |pt| {
            distance_point_to_multiline(pt, &reference) <= tol
        }));
    }
    MultiLineString::new(out)
}

/// The complement of [`shared_boundary`]: the parts of the polygon's
/// boundary farther than `tol` from `excluded`.
pub fn boundary_without(
    poly: &Polygon<CoordF>,
    excluded: &MultiLineString<CoordF>,
    tol: CoordF,
) -> MultiLineString<CoordF> {
    if excluded.0.iter().all(|ls| ls.0.is_empty()) {
        return boundary_multiline(poly);
    }
    let mut out: Vec<LineString<CoordF>> = Vec::new();
    for ring in boundary_multiline(poly).0 {
        out.extend(split_ring_by(&segmentize(&ring, DENSIFY_STEP), |pt| {
            distance_point_to_multiline(pt, excluded) > tol
        }));
    }
    MultiLineString::new(out)
}

/// Split a closed ring into the maximal vertex runs satisfying `keep`,
/// stitching the run that wraps across the ring seam.
fn split_ring_by<F>(ring: &LineString<CoordF>, keep: F) -> Vec<LineString<CoordF>>
where
    F: Fn(&Point<CoordF>) -> bool,
{
    // Drop the closing duplicate so seam stitching sees each vertex once.
    let mut coords: Vec<Coord<CoordF>> = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.is_empty() {
        return Vec::new();
    }

    let kept: Vec<bool> = coords.iter().map(|c| keep(&Point::from(*c))).collect();
    let mut runs: Vec<Vec<Coord<CoordF>>> = Vec::new();
    let mut current: Vec<Coord<CoordF>> = Vec::new();
    for (i, c) in coords.iter().enumerate() {
        if kept[i] {
            current.push(*c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    // All vertices kept: the whole (closed) ring is one piece.
    if runs.len() == 1 && runs[0].len() == coords.len() {
        let mut closed = runs.pop().unwrap_or_default();
        if let Some(first) = closed.first().copied() {
            closed.push(first);
        }
        return vec![LineString::new(closed)];
    }

    // Stitch the wrap-around: last run ends at the seam, first run starts there.
    if runs.len() >= 2 && kept[0] && kept[coords.len() - 1] {
        let head = runs.remove(0);
        if let Some(tail) = runs.last_mut() {
            tail.extend(head);
        }
    }

    runs.into_iter()
        .filter(|r| r.len() >= 2)
        .map(LineString::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn square(size: CoordF) -> Polygon<CoordF> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
        ]
    }

    #[test]
    fn test_distance_to_line() {
        let line = LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]);
        let d = distance_point_to_line(&Point::new(5.0, 3.0), &line);
        assert_relative_eq!(d, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_farthest_vertex_tie_break() {
        // Two vertices equidistant from the reference: smaller x wins.
        let from = MultiLineString::new(vec![LineString::from(vec![
            (2.0, 5.0),
            (8.0, 5.0),
        ])]);
        let reference = MultiLineString::new(vec![LineString::from(vec![
            (5.0, 0.0),
            (5.0, 0.1),
        ])]);
        let (pt, _) = farthest_vertex(&from, &reference).unwrap();
        assert_relative_eq!(pt.x(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nearest_point_on() {
        let line = LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]);
        let p = nearest_point_on(&line, &Point::new(4.0, 3.0)).unwrap();
        assert_relative_eq!(p.x(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(p.y(), 0.0, epsilon = 1e-9);

        let empty = LineString::new(vec![]);
        assert!(nearest_point_on(&empty, &Point::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn test_move_toward() {
        let p = move_toward(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 2.5);
        assert_relative_eq!(p.x(), 2.5, epsilon = 1e-9);
        assert_relative_eq!(p.y(), 0.0, epsilon = 1e-9);

        // Degenerate: coincident points stay put.
        let q = move_toward(Point::new(1.0, 1.0), Point::new(1.0, 1.0), 5.0);
        assert_relative_eq!(q.x(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sample_circle() {
        let samples = sample_circle(Point::new(0.0, 0.0), 2.0, std::f64::consts::PI / 180.0);
        assert_eq!(samples.len(), 360);
        for (_, p) in &samples {
            let r = (p.x() * p.x() + p.y() * p.y()).sqrt();
            assert_relative_eq!(r, 2.0, epsilon = 1e-9);
        }
        // CCW from angle zero.
        assert_relative_eq!(samples[0].1.x(), 2.0, epsilon = 1e-9);
        assert!(samples[1].1.y() > 0.0);
    }

    #[test]
    fn test_sample_circle_degenerate() {
        assert!(sample_circle(Point::new(0.0, 0.0), 0.0, 0.1).is_empty());
        assert!(sample_circle(Point::new(0.0, 0.0), 1.0, 0.0).is_empty());
    }

    #[test]
    fn test_polygon_diameter() {
        let d = polygon_diameter(&square(10.0));
        assert_relative_eq!(d, (200.0_f64).sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_distance_to_boundary_inside() {
        // Interior point: distance to boundary, not zero.
        let d = distance_point_to_boundary(&Point::new(5.0, 4.0), &square(10.0));
        assert_relative_eq!(d, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shared_boundary_overlap() {
        // Two 10x10 squares overlapping in x ∈ [5, 10]: the intersection's
        // boundary shares its left/right edges with neither/one square.
        let a = square(10.0);
        let b = polygon![
            (x: 5.0, y: 0.0),
            (x: 15.0, y: 0.0),
            (x: 15.0, y: 10.0),
            (x: 5.0, y: 10.0),
        ];
        let shared = shared_boundary(&b, &a, 1e-6);
        // b's left edge (x=5) lies inside a, not on its boundary; b's
        // bottom/top edges partially coincide with a's boundary.
        assert!(!shared.0.is_empty());
        for ls in &shared.0 {
            for c in &ls.0 {
                assert!(c.x <= 10.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_boundary_without_full_complement() {
        let q = square(10.0);
        let anchor = MultiLineString::new(vec![LineString::from(vec![
            (0.0, 0.0),
            (10.0, 0.0),
        ])]);
        let rest = boundary_without(&q, &anchor, 1e-3);
        // The bottom edge is excluded; the rest of the ring survives.
        assert!(!rest.0.is_empty());
        let total: CoordF = multiline_length(&rest);
        assert!(total > 15.0 && total < 40.0);
    }

    #[test]
    fn test_segmentize() {
        let line = LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]);
        let dense = segmentize(&line, 1.0);
        assert_eq!(dense.0.len(), 11);
        for w in dense.0.windows(2) {
            assert!((w[1].x - w[0].x).abs() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_boundary_without_empty_exclusion() {
        let q = square(10.0);
        let rest = boundary_without(&q, &MultiLineString::new(vec![]), 1e-3);
        assert_relative_eq!(multiline_length(&rest), 40.0, epsilon = 1e-9);
    }
}
