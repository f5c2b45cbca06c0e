//! Follow-up layer cooling overrides.
//!
//! Freshly printed arc patches warp if the layers above them are printed
//! hot and fast. For every layer whose z lies within the configured
//! distance above an arc patch, extrusion moves near the patch footprint
//! get a reduced fan speed and a scaled-down feedrate; the layer's
//! baseline settings are restored as soon as the head moves away.
//!
//! The space-filling-curve rewrite of the solid infill above patches is
//! outside this module's scope; only the fan/speed envelope is applied.

use geo::{EuclideanDistance, Point, Polygon};
use log::debug;

use crate::config::ArcConfig;
use crate::gcode::{parse_command, Command, Layer};
use crate::{CoordF, EPSILON};

/// The footprint of one emitted arc patch and the height it was printed
/// at.
#[derive(Clone, Debug)]
pub struct PatchFootprint {
    pub polygon: Polygon<CoordF>,
    pub z: CoordF,
}

/// Applies cooling overrides to the layers printed above arc patches.
pub struct FollowupRewriter<'a> {
    config: &'a ArcConfig,
    footprints: Vec<PatchFootprint>,
}

impl<'a> FollowupRewriter<'a> {
    pub fn new(config: &'a ArcConfig) -> Self {
        Self {
            config,
            footprints: Vec::new(),
        }
    }

    /// Register an emitted patch.
    pub fn add_patch(&mut self, polygon: Polygon<CoordF>, z: CoordF) {
        self.footprints.push(PatchFootprint { polygon, z });
    }

    /// True when any patch lies close enough below the given height for
    /// the overrides to apply.
    pub fn applies_to(&self, z: CoordF) -> bool {
        self.footprints.iter().any(|p| self.in_window(p, z))
    }

    fn in_window(&self, patch: &PatchFootprint, z: CoordF) -> bool {
        z > patch.z + EPSILON && z <= patch.z + self.config.followup_z_distance + EPSILON
    }

    /// Rewrite one layer: extrusion moves near a patch footprint get the
    /// follow-up fan and a scaled feedrate, restored once the head leaves
    /// the area.
    pub fn rewrite_layer(&self, layer: &mut Layer) {
        let applicable: Vec<&PatchFootprint> = self
            .footprints
            .iter()
            .filter(|p| self.in_window(p, layer.z))
            .collect();
        if applicable.is_empty() {
            return;
        }

        let baseline_fan = layer.fan_setting.unwrap_or(0);
        let mut out: Vec<String> = Vec::with_capacity(layer.lines.len());
        let mut block_feedrate: Option<CoordF> = None;
        let mut fan_overridden = false;
        let mut speed_overridden = false;
        let mut touched = 0usize;

        for line in &layer.lines {
            let cmd = parse_command(line);

            if let Command::FeedRate(f) = cmd {
                block_feedrate = Some(f);
            }

            let near = match &cmd {
                Command::Extrude {
                    x: Some(x),
                    y: Some(y),
                    e,
                    ..
                } if *e > 0.0 => {
                    let p = Point::new(*x, *y);
                    applicable.iter().any(|patch| {
                        p.euclidean_distance(&patch.polygon)
                            <= self.config.followup_detection_distance
                    })
                }
                _ => false,
            };

            if near {
                if !fan_overridden {
                    out.push(format!("M106 S{}", self.config.followup_fan));
                    fan_overridden = true;
                }
                if let Command::Extrude { f, .. } = &cmd {
                    let base = f.or(block_feedrate);
                    if let Some(base) = base {
                        out.push(format!(
                            "{} F{:.0}",
                            line, base * self.config.followup_speed_factor
                        ));
                        speed_overridden = true;
                        touched += 1;
                        continue;
                    }
                }
                touched += 1;
                out.push(line.clone());
            } else {
                if fan_overridden {
                    out.push(format!("M106 S{}", baseline_fan));
                    fan_overridden = false;
                }
                if speed_overridden {
                    if let Some(f) = block_feedrate {
                        out.push(format!("G1 F{:.0}", f));
                    }
                    speed_overridden = false;
                }
                out.push(line.clone());
            }
        }
        if fan_overridden {
            out.push(format!("M106 S{}", baseline_fan));
        }

        if touched > 0 {
            debug!(
                "layer {}: cooling overrides on {} moves above arc patches",
                layer.index, touched
            );
            layer.lines = out;
            layer.reindex();
        }
    }
}
