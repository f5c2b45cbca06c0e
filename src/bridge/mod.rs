//! Bridge region extraction.
//!
//! From a parsed layer this module locates the bridge-infill paths,
//! thickens them into region polygons, validates that each region is a
//! printable overhang candidate, and derives the anchor boundary the arc
//! generation will seed from.
//!
//! # Algorithm
//!
//! 1. Buffer every bridge-infill path by half the arc width plus the
//!    configured perimeter extension; union the footprints. Connected
//!    paths merge into one region polygon per component.
//! 2. Filter candidates: minimum area, minimum linear extent, and the
//!    region must actually hang over the previous layer's external
//!    perimeter polygon.
//! 3. Anchor: intersect the region with the previous perimeter polygon
//!    and keep the part of the intersection boundary that lies on the
//!    region boundary. Several disjoint pieces resolve to the longest;
//!    an intersection strictly inside the region (island bridge) anchors
//!    on its whole boundary.
//!
//! Rejected candidates are logged and skipped; they never abort the file.

use geo::{Contains, EuclideanLength, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use log::{debug, warn};
use std::ops::Range;

use crate::clipper::{buffer_path, intersection, union, union_all};
use crate::config::ArcConfig;
use crate::gcode::{parse_command, Command, Layer, SegmentKind};
use crate::geometry::{polygon_centroid, polygon_diameter, shared_boundary};
use crate::{CoordF, SHARED_BOUNDARY_TOL};

/// Area (mm²) a region must hang over air before it counts as an
/// overhang; absorbs clipper quantization noise on touching boundaries.
const MIN_OVERHANG_AREA: CoordF = 1e-3;

/// A validated bridge region, ready for arc planning.
#[derive(Clone, Debug)]
pub struct BridgeRegion {
    /// The thickened footprint of the bridge infill.
    pub polygon: Polygon<CoordF>,
    /// The sub-boundary resting on the previous layer's perimeter.
    pub anchor: MultiLineString<CoordF>,
    /// Line ranges of the source bridge blocks within the layer, for the
    /// splice.
    pub delete_ranges: Vec<Range<usize>>,
    /// Region centroid, the deterministic processing sort key.
    pub centroid: Point<CoordF>,
}

/// Result of scanning one layer.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Accepted regions, sorted by centroid (x, then y).
    pub regions: Vec<BridgeRegion>,
    /// Number of candidate regions seen before filtering.
    pub candidates: usize,
}

impl Extraction {
    /// Candidates dropped by the filter.
    pub fn rejected(&self) -> usize {
        self.candidates - self.regions.len()
    }
}

/// Extracts bridge regions from layers against their predecessor.
pub struct RegionExtractor<'a> {
    config: &'a ArcConfig,
}

impl<'a> RegionExtractor<'a> {
    pub fn new(config: &'a ArcConfig) -> Self {
        Self { config }
    }

    /// Extract the bridge regions of `layer`, anchored against the
    /// external perimeter of `previous`.
    pub fn extract(&self, layer: &Layer, previous: &Layer) -> Extraction {
        let mut result = Extraction::default();

        let bridge_paths: Vec<&LineString<CoordF>> = layer
            .segments_of(&SegmentKind::BridgeInfill)
            .map(|s| &s.path)
            .collect();
        if bridge_paths.is_empty() {
            return result;
        }

        let perimeter = previous_perimeter(previous);
        if perimeter.0.is_empty() {
            warn!(
                "layer {}: no external perimeter in the previous layer, \
                 skipping {} bridge paths",
                layer.index,
                bridge_paths.len()
            );
            result.candidates = 1;
            return result;
        }

        // Thicken and merge the bridge paths; connected components come
        // out as separate polygons of the union.
        let half_width = self.config.arc_width / 2.0;
        let grow = half_width + self.config.extend_arcs_into_perimeter;
        let mut footprints = MultiPolygon::new(vec![]);
        for path in &bridge_paths {
            let footprint = buffer_path(path, grow);
            if footprint.0.is_empty() && path.euclidean_length() > 0.0 {
                warn!(
                    "layer {}: bridge path buffering degenerated, dropping it",
                    layer.index
                );
                continue;
            }
            footprints = union(&footprints, &footprint);
        }

        result.candidates = footprints.0.len();

        for q in footprints.0 {
            match self.validate(&q, &perimeter, layer) {
                Ok(region) => result.regions.push(region),
                Err(reason) => {
                    warn!("layer {}: bridge region rejected: {}", layer.index, reason);
                }
            }
        }

        result.regions.sort_by(|a, b| {
            (a.centroid.x(), a.centroid.y())
                .partial_cmp(&(b.centroid.x(), b.centroid.y()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        result
    }

    /// Run the candidacy filter and derive the anchor for one region.
    fn validate(
        &self,
        q: &Polygon<CoordF>,
        perimeter: &MultiPolygon<CoordF>,
        layer: &Layer,
    ) -> Result<BridgeRegion, String> {
        if let Some(reason) = self.filter_reason(q) {
            return Err(reason);
        }

        // The region must hang over air somewhere: part of it has to lie
        // outside the previous perimeter region (past its outline, or
        // over an opening it encloses). Otherwise this is regular infill
        // over solid material.
        let q_multi = MultiPolygon::new(vec![q.clone()]);
        let over_air = crate::clipper::difference(&q_multi, perimeter);
        if crate::clipper::total_area(&over_air) <= MIN_OVERHANG_AREA {
            return Err("region does not extend beyond the previous perimeter".to_string());
        }

        let anchor = self.derive_anchor(q, perimeter)?;

        let delete_ranges = bridge_line_ranges(layer, q);
        if delete_ranges.is_empty() {
            return Err("no source bridge block maps into the region".to_string());
        }

        debug!(
            "accepted bridge region: area {:.2}mm², anchor {:.2}mm",
            geo::Area::unsigned_area(q),
            anchor.0.iter().map(EuclideanLength::euclidean_length).sum::<CoordF>()
        );

        Ok(BridgeRegion {
            centroid: polygon_centroid(q),
            polygon: q.clone(),
            anchor,
            delete_ranges,
        })
    }

    /// The candidacy filter of the region geometry alone. Returns the
    /// rejection reason, or `None` when the region passes.
    pub fn filter_reason(&self, q: &Polygon<CoordF>) -> Option<String> {
        let area = geo::Area::unsigned_area(q);
        if area < self.config.min_bridge_area {
            return Some(format!(
                "area {:.3}mm² below minimum {:.3}mm²",
                area, self.config.min_bridge_area
            ));
        }
        let extent = polygon_diameter(q);
        if extent < self.config.min_bridge_length {
            return Some(format!(
                "extent {:.3}mm below minimum {:.3}mm",
                extent, self.config.min_bridge_length
            ));
        }
        None
    }

    /// Derive the anchor linestring: the part of the region boundary
    /// shared with the previous perimeter.
    fn derive_anchor(
        &self,
        q: &Polygon<CoordF>,
        perimeter: &MultiPolygon<CoordF>,
    ) -> Result<MultiLineString<CoordF>, String> {
        let q_multi = MultiPolygon::new(vec![q.clone()]);
        let anchored_area = intersection(&q_multi, perimeter);
        if anchored_area.0.is_empty() {
            return Err("region shares no area with the previous perimeter".to_string());
        }

        let mut components: Vec<LineString<CoordF>> = Vec::new();
        for a in &anchored_area.0 {
            let shared = shared_boundary(a, q, SHARED_BOUNDARY_TOL);
            if shared.0.is_empty() {
                // Island bridge: the anchored area floats strictly inside
                // the region, so the seed is its whole boundary.
                if q.contains(a) {
                    components.push(a.exterior().clone());
                }
            } else {
                components.extend(shared.0);
            }
        }

        // Several disjoint components resolve to the longest one.
        components.retain(|ls| ls.0.len() >= 2 && ls.euclidean_length() > crate::EPSILON);
        let longest = components.into_iter().max_by(|a, b| {
            a.euclidean_length()
                .partial_cmp(&b.euclidean_length())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match longest {
            Some(ls) => Ok(MultiLineString::new(vec![ls])),
            None => Err("anchor has zero length".to_string()),
        }
    }
}

/// The previous layer's external perimeter region.
///
/// Each external-perimeter loop closes into a ring; a ring nested inside
/// an already placed one is a hole (the inner loop of a part printed
/// around an opening) and is subtracted, so bridges spanning the opening
/// register as overhangs.
fn previous_perimeter(previous: &Layer) -> MultiPolygon<CoordF> {
    let mut rings: Vec<Polygon<CoordF>> = Vec::new();
    for segment in previous.segments_of(&SegmentKind::OuterPerimeter) {
        if segment.path.0.len() >= 3 {
            let mut coords = segment.path.0.clone();
            if coords.first() != coords.last() {
                if let Some(first) = coords.first().copied() {
                    coords.push(first);
                }
            }
            rings.push(Polygon::new(LineString::new(coords), vec![]));
        }
    }

    rings.sort_by(|a, b| {
        geo::Area::unsigned_area(b)
            .partial_cmp(&geo::Area::unsigned_area(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut region = MultiPolygon::new(vec![]);
    for ring in rings {
        let probe = ring.exterior().0.first().map(|c| Point::from(*c));
        let nested = probe
            .map(|p| region.0.iter().any(|poly| poly.contains(&p)))
            .unwrap_or(false);
        let ring_multi = union_all(&[ring]);
        region = if nested {
            crate::clipper::difference(&region, &ring_multi)
        } else {
            union(&region, &ring_multi)
        };
    }
    region
}

/// Line ranges of the bridge-infill blocks whose paths fall inside `q`,
/// trailing travel moves excluded so the head position after the splice
/// stays intact.
fn bridge_line_ranges(layer: &Layer, q: &Polygon<CoordF>) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    for feature in &layer.features {
        if feature.kind != SegmentKind::BridgeInfill {
            continue;
        }
        let in_region = layer
            .segments
            .iter()
            .filter(|s| {
                s.kind == SegmentKind::BridgeInfill
                    && s.line_range.start >= feature.marker_line
                    && s.line_range.end <= feature.body.end
            })
            .any(|s| {
                s.path
                    .0
                    .iter()
                    .any(|c| q.contains(&Point::from(*c)))
            });
        if !in_region {
            continue;
        }

        let mut end = feature.body.end;
        while end > feature.marker_line + 1 {
            match parse_command(&layer.lines[end - 1]) {
                Command::Travel { .. } | Command::FeedRate(_) => end -= 1,
                _ => break,
            }
        }
        ranges.push(feature.marker_line..end);
    }
    ranges
}
