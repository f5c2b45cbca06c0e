//! Polygon boolean and offset operations.
//!
//! This module wraps the geo-clipper library to provide the polygon
//! operations the extractor and planner are built on:
//! - signed offsetting of closed regions (grow/shrink)
//! - round buffering of open paths (the footprint of an extruded line)
//! - union, intersection, difference of regions
//!
//! All inputs and outputs are `f64` millimetre geometry. Degenerate inputs
//! (empty, collapsed) yield empty outputs rather than errors.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geo_clipper::{Clipper, EndType, JoinType};

use crate::CoordF;

/// Clipper integer scaling factor: 1000 units per mm (micron grid).
const CLIPPER_FACTOR: CoordF = 1000.0;

/// Arc tolerance for round joins, in mm.
const ROUND_TOLERANCE: CoordF = 0.01;

/// Join style for offset corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStyle {
    /// Round corners (the footprint of a physical nozzle path)
    #[default]
    Round,
    /// Square corners
    Square,
    /// Mitered corners
    Miter,
}

impl From<JoinStyle> for JoinType {
    fn from(js: JoinStyle) -> Self {
        match js {
            JoinStyle::Round => JoinType::Round(ROUND_TOLERANCE),
            JoinStyle::Square => JoinType::Square,
            JoinStyle::Miter => JoinType::Miter(2.0),
        }
    }
}

/// Offset a polygon by a signed distance.
///
/// Positive delta grows the region, negative shrinks it. A shrink past the
/// medial axis returns an empty result.
pub fn offset_polygon(
    polygon: &Polygon<CoordF>,
    delta: CoordF,
    join: JoinStyle,
) -> MultiPolygon<CoordF> {
    if polygon.exterior().0.len() < 4 {
        return MultiPolygon::new(vec![]);
    }
    polygon.offset(delta, join.into(), EndType::ClosedPolygon, CLIPPER_FACTOR)
}

/// Offset every polygon of a multi-polygon by a signed distance.
pub fn offset_multi(
    polygons: &MultiPolygon<CoordF>,
    delta: CoordF,
    join: JoinStyle,
) -> MultiPolygon<CoordF> {
    if polygons.0.is_empty() {
        return MultiPolygon::new(vec![]);
    }
    polygons.offset(delta, join.into(), EndType::ClosedPolygon, CLIPPER_FACTOR)
}

/// Sides of the polygon approximating a vertex cap disk.
const CAP_SIDES: usize = 32;

/// Buffer an open path into the region swept by a disk of the given
/// radius: the physical footprint of an extruded line.
///
/// Built from closed geometry only: one rectangle per segment plus a cap
/// disk per vertex, unioned.
pub fn buffer_path(path: &LineString<CoordF>, radius: CoordF) -> MultiPolygon<CoordF> {
    if path.0.len() < 2 || radius <= 0.0 {
        return MultiPolygon::new(vec![]);
    }

    let mut pieces: Vec<Polygon<CoordF>> = Vec::with_capacity(path.0.len() * 2);
    for window in path.0.windows(2) {
        let (a, b) = (window[0], window[1]);
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len > crate::EPSILON {
            let (nx, ny) = (-dy / len * radius, dx / len * radius);
            pieces.push(Polygon::new(
                LineString::new(vec![
                    Coord { x: a.x + nx, y: a.y + ny },
                    Coord { x: b.x + nx, y: b.y + ny },
                    Coord { x: b.x - nx, y: b.y - ny },
                    Coord { x: a.x - nx, y: a.y - ny },
                    Coord { x: a.x + nx, y: a.y + ny },
                ]),
                vec![],
            ));
        }
    }
    for c in &path.0 {
        pieces.push(cap_disk(*c, radius));
    }
    union_all(&pieces)
}

/// Regular polygon approximating the disk swept at a path vertex.
fn cap_disk(center: Coord<CoordF>, radius: CoordF) -> Polygon<CoordF> {
    let mut coords: Vec<Coord<CoordF>> = (0..CAP_SIDES)
        .map(|i| {
            let a = i as CoordF / CAP_SIDES as CoordF * 2.0 * std::f64::consts::PI;
            Coord {
                x: center.x + radius * a.cos(),
                y: center.y + radius * a.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Union of two region sets.
pub fn union(subject: &MultiPolygon<CoordF>, clip: &MultiPolygon<CoordF>) -> MultiPolygon<CoordF> {
    if subject.0.is_empty() {
        return clip.clone();
    }
    if clip.0.is_empty() {
        return subject.clone();
    }
    subject.union(clip, CLIPPER_FACTOR)
}

/// Union of a set of potentially overlapping polygons into disjoint
/// parts, reduced pairwise so large inputs stay balanced.
pub fn union_all(polygons: &[Polygon<CoordF>]) -> MultiPolygon<CoordF> {
    let mut items: Vec<MultiPolygon<CoordF>> = polygons
        .iter()
        .filter(|p| p.exterior().0.len() >= 4)
        .map(|p| MultiPolygon::new(vec![p.clone()]))
        .collect();

    while items.len() > 1 {
        let mut next = Vec::with_capacity(items.len() / 2 + 1);
        let mut iter = items.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(union(&a, &b)),
                None => next.push(a),
            }
        }
        items = next;
    }
    items.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Intersection of two region sets.
pub fn intersection(
    subject: &MultiPolygon<CoordF>,
    clip: &MultiPolygon<CoordF>,
) -> MultiPolygon<CoordF> {
    if subject.0.is_empty() || clip.0.is_empty() {
        return MultiPolygon::new(vec![]);
    }
    subject.intersection(clip, CLIPPER_FACTOR)
}

/// Difference of two region sets (subject minus clip).
pub fn difference(
    subject: &MultiPolygon<CoordF>,
    clip: &MultiPolygon<CoordF>,
) -> MultiPolygon<CoordF> {
    if subject.0.is_empty() {
        return MultiPolygon::new(vec![]);
    }
    if clip.0.is_empty() {
        return subject.clone();
    }
    subject.difference(clip, CLIPPER_FACTOR)
}

/// Intersection of a polygon with a region set, as a convenience for the
/// planner's cover updates.
pub fn clip_polygon_to(
    polygon: &Polygon<CoordF>,
    clip: &MultiPolygon<CoordF>,
) -> MultiPolygon<CoordF> {
    intersection(&MultiPolygon::new(vec![polygon.clone()]), clip)
}

/// Total unsigned area of a region set, in mm².
pub fn total_area(polygons: &MultiPolygon<CoordF>) -> CoordF {
    use geo::Area;
    polygons.0.iter().map(|p| p.unsigned_area()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, Area};

    fn square(size: CoordF) -> Polygon<CoordF> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
        ]
    }

    #[test]
    fn test_offset_grow_shrink() {
        let grown = offset_polygon(&square(10.0), 1.0, JoinStyle::Square);
        assert!(total_area(&grown) > 100.0);

        let shrunk = offset_polygon(&square(10.0), -1.0, JoinStyle::Square);
        assert_relative_eq!(total_area(&shrunk), 64.0, epsilon = 0.5);
    }

    #[test]
    fn test_offset_collapse() {
        // Shrinking past the medial axis collapses to nothing.
        let gone = offset_polygon(&square(2.0), -2.0, JoinStyle::Round);
        assert!(gone.0.is_empty() || total_area(&gone) < 1e-6);
    }

    #[test]
    fn test_buffer_path_area() {
        // A 10mm path buffered by 0.5 covers ~ 10*1 plus two end caps.
        let path = LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]);
        let footprint = buffer_path(&path, 0.5);
        let area = total_area(&footprint);
        let expected = 10.0 + std::f64::consts::PI * 0.25;
        assert_relative_eq!(area, expected, epsilon = 0.2);
    }

    #[test]
    fn test_buffer_path_degenerate() {
        let single = LineString::from(vec![(0.0, 0.0)]);
        assert!(buffer_path(&single, 0.5).0.is_empty());
        let path = LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]);
        assert!(buffer_path(&path, 0.0).0.is_empty());
    }

    #[test]
    fn test_union_disjoint() {
        let a = MultiPolygon::new(vec![square(10.0)]);
        let b = MultiPolygon::new(vec![polygon![
            (x: 20.0, y: 0.0),
            (x: 30.0, y: 0.0),
            (x: 30.0, y: 10.0),
            (x: 20.0, y: 10.0),
        ]]);
        let u = union(&a, &b);
        assert_eq!(u.0.len(), 2);
        assert_relative_eq!(total_area(&u), 200.0, epsilon = 0.1);
    }

    #[test]
    fn test_intersection_and_difference() {
        let a = MultiPolygon::new(vec![square(10.0)]);
        let b = MultiPolygon::new(vec![polygon![
            (x: 5.0, y: 0.0),
            (x: 15.0, y: 0.0),
            (x: 15.0, y: 10.0),
            (x: 5.0, y: 10.0),
        ]]);
        assert_relative_eq!(total_area(&intersection(&a, &b)), 50.0, epsilon = 0.1);
        assert_relative_eq!(total_area(&difference(&a, &b)), 50.0, epsilon = 0.1);
    }

    #[test]
    fn test_empty_inputs() {
        let empty = MultiPolygon::<CoordF>::new(vec![]);
        let a = MultiPolygon::new(vec![square(10.0)]);
        assert!(intersection(&a, &empty).0.is_empty());
        assert_relative_eq!(
            total_area(&difference(&a, &empty)),
            a.unsigned_area(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            total_area(&union(&empty, &a)),
            a.unsigned_area(),
            epsilon = 1e-9
        );
    }
}
