//! Motion emission: turning an arc plan into spliced G-code.
//!
//! Each planned arc becomes a retract → travel → unretract entry followed
//! by extruding moves along the discretized arc, extended tangentially at
//! both ends so consecutive arcs bond. The whole patch is framed by
//! `;TYPE:Arc overhang` / `;TYPE:End arc overhang` markers with fan,
//! temperature and feedrate overrides, and restores the printer state it
//! found. Splicing inserts the patch at the beginning of the layer body
//! and deletes the original bridge blocks; every other line of the layer
//! is left byte-identical.

use geo::Point;

use super::{Layer, ARC_OVERHANG_END, ARC_OVERHANG_TYPE};
use crate::config::ArcConfig;
use crate::planner::ArcPlan;
use crate::{CoordF, Error, Result};

/// Printer state around the injection point, used to restore overrides
/// after the patch.
#[derive(Clone, Debug, Default)]
pub struct EmitContext {
    /// Fan speed in effect before the patch, if any was ever set.
    pub baseline_fan: Option<u32>,
    /// Nozzle temperature in effect before the patch.
    pub baseline_temperature: Option<u32>,
    /// Head position before the patch, travelled back to afterwards.
    pub prior_position: Option<(CoordF, CoordF)>,
    /// Block feedrate in effect before the patch.
    pub prior_feedrate: Option<CoordF>,
}

/// Render an arc plan into the lines of one patch block.
///
/// Fails with [`Error::Emit`] when the plan is empty or the print
/// settings make the extrusion math degenerate; emission errors are fatal
/// because a half-written patch would not print.
pub fn render_plan(plan: &ArcPlan, ctx: &EmitContext, config: &ArcConfig) -> Result<Vec<String>> {
    if plan.arcs.is_empty() {
        return Err(Error::Emit("arc plan is empty".to_string()));
    }
    let filament_area = config.print.filament_area();
    if filament_area <= 0.0 {
        return Err(Error::Emit("non-positive filament cross-section".to_string()));
    }
    // Extrusion per millimetre of path.
    let e_per_mm = config.arc_width * config.print.layer_height * config.arc_extrusion_multiplier
        / filament_area;
    if e_per_mm <= 0.0 {
        return Err(Error::Emit(format!(
            "extrusion underflow: {:.6} mm filament per mm of path",
            e_per_mm
        )));
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(ARC_OVERHANG_TYPE.to_string());
    lines.push(format!("M106 S{}", plan.kinematics.fan));
    if let Some(temp) = plan.kinematics.temperature {
        lines.push(format!("M104 S{}", temp));
    }

    for (idx, arc) in plan.arcs.iter().enumerate() {
        let polyline = arc.to_polyline(config.angular_step);
        let points = thin_points(&polyline.0, config.min_arc_point_dist);
        if points.len() < 2 {
            continue;
        }

        // Tangential extensions hide the seam where an arc starts and
        // ends against its neighbours.
        let begin_ext = perpendicular_offset(points[0], points[1], config.extend_arc_dist, true);
        let end_ext = perpendicular_offset(
            points[points.len() - 1],
            points[points.len() - 2],
            config.extend_arc_dist,
            false,
        );

        // Short arcs print slower so the filament has time to cool and
        // anchor before the next pass rests on it.
        let feedrate = arc_feedrate(arc.length(), config);

        lines.push(retract_line(true, config));
        lines.push(format!(
            "G0 X{:.3} Y{:.3} F{:.0}",
            begin_ext.x(),
            begin_ext.y(),
            config.travel_feedrate
        ));
        lines.push(retract_line(false, config));
        lines.push(format!("; arc {} length {:.2}", idx, arc.length()));
        lines.push(format!("G1 F{:.0}", feedrate));

        let mut prev = begin_ext;
        for pt in &points {
            lines.push(extrude_line(*pt, distance(prev, *pt) * e_per_mm));
            prev = *pt;
        }
        lines.push(extrude_line(end_ext, distance(prev, end_ext) * e_per_mm));
    }

    lines.push(ARC_OVERHANG_END.to_string());
    lines.push(format!("M106 S{}", ctx.baseline_fan.unwrap_or(0)));
    if plan.kinematics.temperature.is_some() {
        if let Some(temp) = ctx.baseline_temperature {
            lines.push(format!("M104 S{}", temp));
        }
    }
    if let Some((x, y)) = ctx.prior_position {
        lines.push(retract_line(true, config));
        lines.push(format!(
            "G0 X{:.3} Y{:.3} F{:.0}",
            x, y, config.travel_feedrate
        ));
        lines.push(retract_line(false, config));
    }
    if let Some(f) = ctx.prior_feedrate {
        lines.push(format!("G1 F{:.0}", f));
    }

    Ok(lines)
}

/// Splice patch blocks into a layer: delete the original bridge ranges,
/// then insert the rendered block at the beginning of the layer body.
pub fn splice_plan(layer: &mut Layer, delete_ranges: &[std::ops::Range<usize>], block: Vec<String>) {
    layer.delete_ranges(delete_ranges);
    let at = layer.injection_point();
    layer.insert_block(at, block);
}

/// Scan the printer state (fan, temperature, feedrate, position) over a
/// sequence of lines, updating the context to reflect the state after
/// them.
pub fn advance_context(ctx: &mut EmitContext, lines: &[String]) {
    use super::parser::parse_command;
    use super::Command;

    for line in lines {
        match parse_command(line) {
            Command::FanSpeed(s) => ctx.baseline_fan = Some(s),
            Command::Temperature { s, .. } => ctx.baseline_temperature = Some(s),
            Command::FeedRate(f) => ctx.prior_feedrate = Some(f),
            Command::Travel { x, y, f, .. } => {
                if let (Some(x), Some(y)) = (x, y) {
                    ctx.prior_position = Some((x, y));
                }
                if f.is_some() {
                    ctx.prior_feedrate = f;
                }
            }
            Command::Extrude { x, y, f, .. } => {
                if let (Some(x), Some(y)) = (x, y) {
                    ctx.prior_position = Some((x, y));
                }
                if f.is_some() {
                    ctx.prior_feedrate = f;
                }
            }
            _ => {}
        }
    }
}

/// Feedrate for an arc of the given length: the configured rate, slowed
/// down for arcs shorter than the slow-down duration, floored at the
/// minimum rate.
fn arc_feedrate(length: CoordF, config: &ArcConfig) -> CoordF {
    let natural = length / config.arc_slowdown_duration * 60.0;
    natural.clamp(config.arc_min_feedrate, config.arc_feedrate)
}

/// Drop points closer than `min_dist` to their predecessor, keeping the
/// endpoints.
fn thin_points(coords: &[geo::Coord<CoordF>], min_dist: CoordF) -> Vec<Point<CoordF>> {
    let mut out: Vec<Point<CoordF>> = Vec::with_capacity(coords.len());
    for (i, c) in coords.iter().enumerate() {
        let p = Point::new(c.x, c.y);
        let last = i + 1 == coords.len();
        match out.last() {
            Some(prev) if !last && distance(*prev, p) < min_dist => {}
            _ => out.push(p),
        }
    }
    out
}

/// Offset `from` perpendicular to the direction toward `toward`.
fn perpendicular_offset(
    from: Point<CoordF>,
    toward: Point<CoordF>,
    dist: CoordF,
    clockwise: bool,
) -> Point<CoordF> {
    let dx = toward.x() - from.x();
    let dy = toward.y() - from.y();
    let len = (dx * dx + dy * dy).sqrt();
    if len < crate::EPSILON {
        return from;
    }
    let (nx, ny) = if clockwise {
        (dy / len, -dx / len)
    } else {
        (-dy / len, dx / len)
    };
    Point::new(from.x() + nx * dist, from.y() + ny * dist)
}

fn retract_line(retract: bool, config: &ArcConfig) -> String {
    let e = if retract {
        -config.print.retract_length
    } else {
        config.print.retract_length
    };
    format!("G1 E{:.5} F{:.0}", e, config.print.retract_speed * 60.0)
}

fn extrude_line(p: Point<CoordF>, e: CoordF) -> String {
    format!("G1 X{:.3} Y{:.3} E{:.5}", p.x(), p.y(), e)
}

#[inline]
fn distance(a: Point<CoordF>, b: Point<CoordF>) -> CoordF {
    let dx = b.x() - a.x();
    let dy = b.y() - a.y();
    (dx * dx + dy * dy).sqrt()
}
