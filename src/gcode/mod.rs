//! Motion-program model.
//!
//! This module provides the in-memory form of a slicer-emitted motion
//! program: an ordered sequence of layers, each an ordered sequence of
//! verbatim lines with typed feature blocks and extrusion segments layered
//! on top. Parsing never destroys information; every line is kept as
//! read, and rendering an unmodified program reproduces the input
//! byte-for-byte. All mutation goes through the splice operations, which
//! keep the derived structures consistent.

mod emit;
mod parser;
mod writer;

pub use emit::{advance_context, render_plan, splice_plan, EmitContext};
pub use parser::{parse_command, SlicerSettings};
pub use writer::write_atomic;

use geo::LineString;
use std::ops::Range;

use crate::{CoordF, Error, Result};

/// Marker comment beginning a layer.
pub const LAYER_CHANGE_MARKER: &str = ";LAYER_CHANGE";
/// Marker comment carrying the layer z height.
pub const Z_MARKER: &str = ";Z:";
/// Feature-type marker prefix.
pub const TYPE_MARKER: &str = ";TYPE:";
/// Feature type emitted for arc overhang patches.
pub const ARC_OVERHANG_TYPE: &str = ";TYPE:Arc overhang";
/// Marker closing an arc overhang patch.
pub const ARC_OVERHANG_END: &str = ";TYPE:End arc overhang";

/// Parsed form of a single motion-program line.
///
/// The variants cover exactly what the post-processor needs to reason
/// about; everything else is `Other` and passes through verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// G0, or G1 carrying no extrusion: a travel move.
    Travel {
        x: Option<CoordF>,
        y: Option<CoordF>,
        z: Option<CoordF>,
        f: Option<CoordF>,
    },
    /// G1 with an E word: an extruding move (E may be negative: retract).
    Extrude {
        x: Option<CoordF>,
        y: Option<CoordF>,
        e: CoordF,
        f: Option<CoordF>,
    },
    /// Bare `G1 F…`: block feedrate change.
    FeedRate(CoordF),
    /// M106: fan speed.
    FanSpeed(u32),
    /// M104/M109: extruder temperature.
    Temperature { s: u32, wait: bool },
    /// `;TYPE:<name>` feature marker.
    TypeMarker(String),
    /// `;LAYER_CHANGE`.
    LayerChange,
    /// `;Z:<height>`.
    ZHint(CoordF),
    /// Anything else, preserved verbatim.
    Other,
}

/// The kind of a typed feature block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Travel,
    OuterPerimeter,
    InnerPerimeter,
    SolidInfill,
    BridgeInfill,
    Other(String),
}

impl SegmentKind {
    /// Map a `;TYPE:` tag to a segment kind.
    pub fn from_type_tag(tag: &str) -> Self {
        match tag.trim() {
            "External perimeter" | "Overhang perimeter" => SegmentKind::OuterPerimeter,
            "Perimeter" => SegmentKind::InnerPerimeter,
            "Solid infill" | "Internal solid infill" | "Top solid infill" => {
                SegmentKind::SolidInfill
            }
            "Bridge infill" => SegmentKind::BridgeInfill,
            other => SegmentKind::Other(other.to_string()),
        }
    }
}

/// A typed feature block inside a layer: the `;TYPE:` marker line and the
/// body that follows it up to the next marker.
#[derive(Clone, Debug)]
pub struct Feature {
    pub kind: SegmentKind,
    /// Line index of the `;TYPE:` marker within the layer.
    pub marker_line: usize,
    /// Body line range (exclusive of the marker itself).
    pub body: Range<usize>,
}

/// A contiguous extrusion path within a feature block.
///
/// Paths are split at travel moves, so one feature can carry several
/// segments. The line range spans the commands the path was built from.
#[derive(Clone, Debug)]
pub struct Segment {
    pub kind: SegmentKind,
    pub path: LineString<CoordF>,
    pub line_range: Range<usize>,
    /// Average extrusion per millimetre of travel over the path.
    pub extrusion_per_mm: CoordF,
    /// Last feedrate seen on the path, if any.
    pub feedrate: Option<CoordF>,
}

/// One layer of the motion program.
#[derive(Clone, Debug, Default)]
pub struct Layer {
    pub index: usize,
    pub z: CoordF,
    /// Verbatim lines, without trailing newlines.
    pub lines: Vec<String>,
    pub features: Vec<Feature>,
    pub segments: Vec<Segment>,
    /// First fan speed set in this layer, if any.
    pub fan_setting: Option<u32>,
}

impl Layer {
    /// Re-derive features, segments and the fan setting from `lines`.
    /// Must be called after any structural edit.
    pub fn reindex(&mut self) {
        let (features, segments, fan) = parser::extract_features(&self.lines);
        self.features = features;
        self.segments = segments;
        self.fan_setting = fan;
    }

    /// Segments of the given kind, in layer order.
    pub fn segments_of<'a>(
        &'a self,
        kind: &'a SegmentKind,
    ) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| &s.kind == kind)
    }

    /// True if this layer still contains a bridge-infill marker.
    pub fn has_bridge_infill(&self) -> bool {
        self.features
            .iter()
            .any(|f| f.kind == SegmentKind::BridgeInfill)
    }

    /// Line index where an arc patch should be injected: just before the
    /// first `;TYPE:` marker, i.e. at the beginning of the layer body.
    pub fn injection_point(&self) -> usize {
        self.features.first().map(|f| f.marker_line).unwrap_or(self.lines.len())
    }

    /// Delete the given line ranges (disjoint, any order) and re-derive the
    /// index structures.
    pub fn delete_ranges(&mut self, ranges: &[Range<usize>]) {
        let mut doomed = vec![false; self.lines.len()];
        for range in ranges {
            for idx in range.clone() {
                if idx < doomed.len() {
                    doomed[idx] = true;
                }
            }
        }
        let mut kept = Vec::with_capacity(self.lines.len());
        for (idx, line) in self.lines.drain(..).enumerate() {
            if !doomed[idx] {
                kept.push(line);
            }
        }
        self.lines = kept;
        self.reindex();
    }

    /// Insert a block of lines at the given index and re-derive the index
    /// structures.
    pub fn insert_block(&mut self, at: usize, block: Vec<String>) {
        let at = at.min(self.lines.len());
        self.lines.splice(at..at, block);
        self.reindex();
    }
}

/// A complete motion program: preamble, layers, and the settings read from
/// the trailing configuration block.
#[derive(Clone, Debug, Default)]
pub struct MotionProgram {
    /// Lines before the first `;LAYER_CHANGE`.
    pub preamble: Vec<String>,
    pub layers: Vec<Layer>,
    pub settings: SlicerSettings,
    /// Whether the source ended with a newline (preserved on render).
    trailing_newline: bool,
}

impl MotionProgram {
    /// Parse a motion program from its textual form.
    ///
    /// Fails with [`Error::Parse`] when no layer markers are present at
    /// all, when a layer's z height cannot be determined, or when z
    /// heights are not strictly increasing.
    pub fn parse(text: &str) -> Result<Self> {
        let trailing_newline = text.ends_with('\n');
        let all_lines: Vec<String> = text.lines().map(str::to_string).collect();

        let settings = SlicerSettings::from_lines(&all_lines);

        let mut preamble = Vec::new();
        let mut layers: Vec<Layer> = Vec::new();
        let mut current: Option<Layer> = None;

        for line in all_lines {
            if line.trim_end() == LAYER_CHANGE_MARKER {
                if let Some(mut done) = current.take() {
                    done.reindex();
                    layers.push(done);
                }
                let mut layer = Layer {
                    index: layers.len(),
                    ..Layer::default()
                };
                layer.lines.push(line);
                current = Some(layer);
            } else if let Some(layer) = current.as_mut() {
                layer.lines.push(line);
            } else {
                preamble.push(line);
            }
        }
        if let Some(mut done) = current.take() {
            done.reindex();
            layers.push(done);
        }

        if layers.is_empty() {
            return Err(Error::Parse(
                "no layer change markers found in motion program".to_string(),
            ));
        }

        // Resolve z heights and validate monotonicity.
        let mut prev_z = f64::NEG_INFINITY;
        for layer in &mut layers {
            let z = parser::layer_z(&layer.lines).ok_or_else(|| {
                Error::Parse(format!("layer {}: no z height found", layer.index))
            })?;
            if z <= prev_z {
                return Err(Error::Parse(format!(
                    "layer {}: z height {:.3} not strictly increasing (previous {:.3})",
                    layer.index, z, prev_z
                )));
            }
            layer.z = z;
            prev_z = z;
        }

        Ok(Self {
            preamble,
            layers,
            settings,
            trailing_newline,
        })
    }

    /// Render the program back to its textual form. On an unmodified
    /// program this is the exact inverse of [`MotionProgram::parse`].
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for layer in &self.layers {
            for line in &layer.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        if !self.trailing_newline {
            // The source had no final newline; drop the one just added.
            out.pop();
        }
        out
    }

    /// True if any layer still contains bridge infill.
    pub fn has_bridge_infill(&self) -> bool {
        self.layers.iter().any(Layer::has_bridge_infill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_program() -> String {
        [
            "; generated by test",
            "G90",
            ";LAYER_CHANGE",
            ";Z:0.2",
            "G1 Z0.2 F9000",
            ";TYPE:External perimeter",
            "G1 X0 Y0 F1800",
            "G1 X10 Y0 E0.5",
            ";LAYER_CHANGE",
            ";Z:0.4",
            ";TYPE:Bridge infill",
            "G1 X0 Y5 E0.3",
            "; use_relative_e_distances = 1",
        ]
        .join("\n")
            + "\n"
    }

    #[test]
    fn test_parse_render_round_trip() {
        let text = minimal_program();
        let program = MotionProgram::parse(&text).unwrap();
        assert_eq!(program.render(), text);
    }

    #[test]
    fn test_round_trip_without_trailing_newline() {
        let text = minimal_program();
        let text = text.trim_end_matches('\n').to_string();
        let program = MotionProgram::parse(&text).unwrap();
        assert_eq!(program.render(), text);
    }

    #[test]
    fn test_layer_split() {
        let program = MotionProgram::parse(&minimal_program()).unwrap();
        assert_eq!(program.layers.len(), 2);
        assert_eq!(program.preamble.len(), 2);
        assert!((program.layers[0].z - 0.2).abs() < 1e-9);
        assert!((program.layers[1].z - 0.4).abs() < 1e-9);
        assert!(program.layers[1].has_bridge_infill());
        assert!(!program.layers[0].has_bridge_infill());
    }

    #[test]
    fn test_non_monotonic_z_rejected() {
        let text = [
            ";LAYER_CHANGE",
            ";Z:0.4",
            "G1 X0 Y0 E1",
            ";LAYER_CHANGE",
            ";Z:0.2",
            "G1 X0 Y0 E1",
        ]
        .join("\n");
        assert!(MotionProgram::parse(&text).is_err());
    }

    #[test]
    fn test_no_layers_rejected() {
        assert!(MotionProgram::parse("G90\nG1 X0 Y0\n").is_err());
    }

    #[test]
    fn test_delete_and_insert_keep_lines_consistent() {
        let mut program = MotionProgram::parse(&minimal_program()).unwrap();
        let layer = &mut program.layers[1];
        let before = layer.lines.len();
        layer.delete_ranges(&[2..4]);
        assert_eq!(layer.lines.len(), before - 2);
        layer.insert_block(2, vec![";TYPE:Arc overhang".into(), "G1 X1 Y1 E0.1".into()]);
        assert_eq!(layer.lines.len(), before);
        assert!(layer
            .features
            .iter()
            .any(|f| matches!(&f.kind, SegmentKind::Other(t) if t == "Arc overhang")));
    }

    #[test]
    fn test_type_tag_mapping() {
        assert_eq!(
            SegmentKind::from_type_tag("External perimeter"),
            SegmentKind::OuterPerimeter
        );
        assert_eq!(
            SegmentKind::from_type_tag("Perimeter"),
            SegmentKind::InnerPerimeter
        );
        assert_eq!(
            SegmentKind::from_type_tag("Bridge infill"),
            SegmentKind::BridgeInfill
        );
        assert!(matches!(
            SegmentKind::from_type_tag("Gap fill"),
            SegmentKind::Other(_)
        ));
    }
}
