//! Line-level parsing of the motion program.
//!
//! The parser recognizes exactly the structural minimum: layer and feature
//! markers, the motion commands G0/G1, fan and temperature commands, and
//! the slicer's trailing `; key = value` configuration block. Everything
//! else is `Command::Other` and survives verbatim.

use geo::{Coord, LineString};
use std::collections::HashMap;

use super::{Command, Feature, Segment, SegmentKind, LAYER_CHANGE_MARKER, TYPE_MARKER, Z_MARKER};
use crate::CoordF;

/// Parse a single motion-program line.
pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim_end();

    if trimmed == LAYER_CHANGE_MARKER {
        return Command::LayerChange;
    }
    if let Some(rest) = trimmed.strip_prefix(Z_MARKER) {
        if let Ok(z) = rest.trim().parse::<CoordF>() {
            return Command::ZHint(z);
        }
        return Command::Other;
    }
    if let Some(tag) = trimmed.strip_prefix(TYPE_MARKER) {
        return Command::TypeMarker(tag.trim().to_string());
    }

    // Strip the comment part before looking at the command words.
    let code = trimmed.split(';').next().unwrap_or("").trim();
    if code.is_empty() {
        return Command::Other;
    }

    let mut words = code.split_whitespace();
    let head = words.next().unwrap_or("");

    match head {
        "G0" | "G1" => {
            let mut x = None;
            let mut y = None;
            let mut z = None;
            let mut e = None;
            let mut f = None;
            for word in words {
                if !word.is_char_boundary(1) {
                    return Command::Other;
                }
                let (letter, value) = word.split_at(1);
                let Ok(v) = value.parse::<CoordF>() else {
                    return Command::Other;
                };
                match letter {
                    "X" => x = Some(v),
                    "Y" => y = Some(v),
                    "Z" => z = Some(v),
                    "E" => e = Some(v),
                    "F" => f = Some(v),
                    _ => {}
                }
            }
            if head == "G1" {
                if let Some(e) = e {
                    return Command::Extrude { x, y, e, f };
                }
                if x.is_none() && y.is_none() && z.is_none() {
                    if let Some(f) = f {
                        return Command::FeedRate(f);
                    }
                    return Command::Other;
                }
            }
            Command::Travel { x, y, z, f }
        }
        "M106" => match parse_s_word(code) {
            Some(s) => Command::FanSpeed(s as u32),
            None => Command::Other,
        },
        "M104" | "M109" => match parse_s_word(code) {
            Some(s) => Command::Temperature {
                s: s as u32,
                wait: head == "M109",
            },
            None => Command::Other,
        },
        _ => Command::Other,
    }
}

fn parse_s_word(code: &str) -> Option<CoordF> {
    code.split_whitespace()
        .find_map(|w| w.strip_prefix('S'))
        .and_then(|v| v.parse::<CoordF>().ok())
}

/// Find the z height of a layer: the `;Z:` hint if present, otherwise the
/// first move that sets Z.
pub fn layer_z(lines: &[String]) -> Option<CoordF> {
    for line in lines {
        if let Command::ZHint(z) = parse_command(line) {
            return Some(z);
        }
    }
    for line in lines {
        match parse_command(line) {
            Command::Travel { z: Some(z), .. } => return Some(z),
            _ => {}
        }
    }
    None
}

/// Derive the feature blocks, extrusion segments and fan setting of a
/// layer from its lines.
///
/// Segments are the contiguous extrusion paths inside typed blocks, split
/// at travel moves; the position left behind by the preceding commands is
/// included as the first path point so the geometry matches what the
/// printer actually draws.
pub fn extract_features(
    lines: &[String],
) -> (Vec<Feature>, Vec<Segment>, Option<u32>) {
    let mut features: Vec<Feature> = Vec::new();
    let mut segments: Vec<Segment> = Vec::new();
    let mut fan: Option<u32> = None;

    let mut position: Option<(CoordF, CoordF)> = None;
    let mut kind: Option<SegmentKind> = None;
    let mut builder = PathBuilder::default();

    for (idx, line) in lines.iter().enumerate() {
        match parse_command(line) {
            Command::TypeMarker(tag) => {
                builder.finish(kind.as_ref(), &mut segments, idx);
                if let Some(last) = features.last_mut() {
                    last.body.end = idx;
                }
                let new_kind = SegmentKind::from_type_tag(&tag);
                features.push(Feature {
                    kind: new_kind.clone(),
                    marker_line: idx,
                    body: idx + 1..lines.len(),
                });
                kind = Some(new_kind);
            }
            Command::Extrude { x, y, e, f } => {
                if let (Some(x), Some(y)) = (x, y) {
                    if e > 0.0 {
                        if kind.is_some() {
                            builder.extend(position, (x, y), e, f, idx);
                        }
                        position = Some((x, y));
                    } else {
                        // Retract/wipe: breaks the path but not the position.
                        builder.finish(kind.as_ref(), &mut segments, idx);
                        position = Some((x, y));
                    }
                } else {
                    // Extrusion-only move (retract or prime): path break.
                    builder.finish(kind.as_ref(), &mut segments, idx);
                }
            }
            Command::Travel { x, y, .. } => {
                builder.finish(kind.as_ref(), &mut segments, idx);
                if let (Some(x), Some(y)) = (x, y) {
                    position = Some((x, y));
                }
            }
            Command::FanSpeed(s) => {
                if fan.is_none() {
                    fan = Some(s);
                }
            }
            _ => {}
        }
    }
    builder.finish(kind.as_ref(), &mut segments, lines.len());

    (features, segments, fan)
}

/// Accumulates one extrusion path at a time.
#[derive(Default)]
struct PathBuilder {
    points: Vec<Coord<CoordF>>,
    extrusion: CoordF,
    length: CoordF,
    feedrate: Option<CoordF>,
    start_line: usize,
}

impl PathBuilder {
    fn extend(
        &mut self,
        from: Option<(CoordF, CoordF)>,
        to: (CoordF, CoordF),
        e: CoordF,
        f: Option<CoordF>,
        line_idx: usize,
    ) {
        if self.points.is_empty() {
            self.start_line = line_idx;
            if let Some((x, y)) = from {
                self.points.push(Coord { x, y });
            }
        }
        if let Some(last) = self.points.last() {
            let dx = to.0 - last.x;
            let dy = to.1 - last.y;
            self.length += (dx * dx + dy * dy).sqrt();
        }
        self.points.push(Coord { x: to.0, y: to.1 });
        self.extrusion += e;
        if f.is_some() {
            self.feedrate = f;
        }
    }

    fn finish(&mut self, kind: Option<&SegmentKind>, out: &mut Vec<Segment>, end_line: usize) {
        if self.points.len() >= 2 {
            if let Some(kind) = kind {
                out.push(Segment {
                    kind: kind.clone(),
                    path: LineString::new(std::mem::take(&mut self.points)),
                    line_range: self.start_line..end_line,
                    extrusion_per_mm: if self.length > 0.0 {
                        self.extrusion / self.length
                    } else {
                        0.0
                    },
                    feedrate: self.feedrate,
                });
            }
        }
        self.points.clear();
        self.extrusion = 0.0;
        self.length = 0.0;
        self.feedrate = None;
    }
}

/// The slicer settings read from the `; key = value` configuration block.
#[derive(Clone, Debug, Default)]
pub struct SlicerSettings {
    values: HashMap<String, String>,
}

impl SlicerSettings {
    /// Collect every `; key = value` comment of the program.
    pub fn from_lines(lines: &[String]) -> Self {
        let mut values = HashMap::new();
        for line in lines {
            let trimmed = line.trim();
            let Some(body) = trimmed.strip_prefix(';') else {
                continue;
            };
            let Some((key, value)) = body.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || key.contains(' ') {
                continue;
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Self { values }
    }

    /// Raw string value of a key, if present.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Numeric value of a key. Multi-extruder lists (`0.4,0.4`) yield
    /// their first element, following the reference behaviour.
    pub fn get_f64(&self, key: &str) -> Option<CoordF> {
        let raw = self.raw(key)?;
        let first = raw.split(',').next()?.trim();
        let first = first.strip_suffix('%').unwrap_or(first);
        first.parse::<CoordF>().ok()
    }

    /// Boolean value of a key (`1`/`0`, `true`/`false`).
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.raw(key)?.trim() {
            "1" | "true" | "True" => Some(true),
            "0" | "false" | "False" => Some(false),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_travel_and_extrude() {
        assert_eq!(
            parse_command("G0 X1.5 Y2 F3000"),
            Command::Travel {
                x: Some(1.5),
                y: Some(2.0),
                z: None,
                f: Some(3000.0)
            }
        );
        assert_eq!(
            parse_command("G1 X10 Y0 E0.5"),
            Command::Extrude {
                x: Some(10.0),
                y: Some(0.0),
                e: 0.5,
                f: None
            }
        );
        // G1 without E is a travel.
        assert_eq!(
            parse_command("G1 X10 Y0 F1800"),
            Command::Travel {
                x: Some(10.0),
                y: Some(0.0),
                z: None,
                f: Some(1800.0)
            }
        );
        assert_eq!(parse_command("G1 F1200"), Command::FeedRate(1200.0));
    }

    #[test]
    fn test_parse_markers() {
        assert_eq!(parse_command(";LAYER_CHANGE"), Command::LayerChange);
        assert_eq!(parse_command(";Z:1.25"), Command::ZHint(1.25));
        assert_eq!(
            parse_command(";TYPE:Bridge infill"),
            Command::TypeMarker("Bridge infill".to_string())
        );
    }

    #[test]
    fn test_parse_fan_and_temperature() {
        assert_eq!(parse_command("M106 S255"), Command::FanSpeed(255));
        assert_eq!(
            parse_command("M104 S210"),
            Command::Temperature { s: 210, wait: false }
        );
        assert_eq!(
            parse_command("M109 S210"),
            Command::Temperature { s: 210, wait: true }
        );
    }

    #[test]
    fn test_unknown_preserved_as_other() {
        assert_eq!(parse_command("M240"), Command::Other);
        assert_eq!(parse_command("; just a comment"), Command::Other);
        assert_eq!(parse_command(""), Command::Other);
    }

    #[test]
    fn test_comment_stripped_from_command() {
        assert_eq!(
            parse_command("G1 X1 Y1 E0.1 ; infill"),
            Command::Extrude {
                x: Some(1.0),
                y: Some(1.0),
                e: 0.1,
                f: None
            }
        );
    }

    #[test]
    fn test_extract_features_splits_at_travel() {
        let lines: Vec<String> = [
            "G1 X0 Y0 F1800",
            ";TYPE:Bridge infill",
            "G1 X10 Y0 E0.5",
            "G1 X10 Y2 E0.1",
            "G1 X0 Y5 F3000",
            "G1 X10 Y5 E0.5",
            ";TYPE:Perimeter",
            "G1 X0 Y0 E1.0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let (features, segments, _) = extract_features(&lines);
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].kind, SegmentKind::BridgeInfill);
        assert_eq!(features[0].body, 2..6);

        let bridge: Vec<_> = segments
            .iter()
            .filter(|s| s.kind == SegmentKind::BridgeInfill)
            .collect();
        assert_eq!(bridge.len(), 2);
        // First path starts from the pre-marker position.
        assert_eq!(bridge[0].path.0.len(), 3);
        assert_eq!(bridge[1].path.0.len(), 2);
    }

    #[test]
    fn test_layer_z_from_hint_and_move() {
        let with_hint: Vec<String> =
            vec![";Z:0.6".into(), "G1 Z0.8 F9000".into()];
        assert_eq!(layer_z(&with_hint), Some(0.6));

        let from_move: Vec<String> = vec!["G1 Z0.8 F9000".into()];
        assert_eq!(layer_z(&from_move), Some(0.8));

        let none: Vec<String> = vec!["G1 X0 Y0 E1".into()];
        assert_eq!(layer_z(&none), None);
    }

    #[test]
    fn test_settings_extraction() {
        let lines: Vec<String> = [
            "G1 X0 Y0",
            "; nozzle_diameter = 0.4",
            "; filament_diameter = 1.75,1.75",
            "; use_relative_e_distances = 1",
            "; extrusion_width = 0.45",
            ";TYPE:Perimeter",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let settings = SlicerSettings::from_lines(&lines);
        assert_eq!(settings.get_f64("nozzle_diameter"), Some(0.4));
        assert_eq!(settings.get_f64("filament_diameter"), Some(1.75));
        assert_eq!(settings.get_bool("use_relative_e_distances"), Some(true));
        assert_eq!(settings.get_f64("missing"), None);
    }
}
