//! Configuration for arc overhang generation.
//!
//! Two layers of configuration feed the planner:
//! - [`PrintSettings`]: physical print parameters read from the motion
//!   file's slicer configuration block (extrusion width, layer height,
//!   nozzle and filament diameters, travel/retract kinematics).
//! - [`ArcConfig`]: the planner's own knobs, derived from the print
//!   settings with compile-time defaults and optionally overridden by a
//!   sidecar `key = value` file next to the motion file.

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gcode::{MotionProgram, SlicerSettings};
use crate::{CoordF, Error, Result};

/// Physical print parameters extracted from the motion program.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrintSettings {
    /// Extrusion width (mm).
    pub extrusion_width: CoordF,
    /// Layer height (mm).
    pub layer_height: CoordF,
    /// Nozzle diameter (mm).
    pub nozzle_diameter: CoordF,
    /// Filament diameter (mm).
    pub filament_diameter: CoordF,
    /// Global flow multiplier.
    pub extrusion_multiplier: CoordF,
    /// Travel speed (mm/s).
    pub travel_speed: CoordF,
    /// Retraction length (mm).
    pub retract_length: CoordF,
    /// Retraction speed (mm/s).
    pub retract_speed: CoordF,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            extrusion_width: 0.45,
            layer_height: 0.2,
            nozzle_diameter: 0.4,
            filament_diameter: 1.75,
            extrusion_multiplier: 1.0,
            travel_speed: 100.0,
            retract_length: 0.8,
            retract_speed: 35.0,
        }
    }
}

impl PrintSettings {
    /// Read print settings from a slicer configuration block, falling back
    /// to the defaults for anything the block does not carry.
    ///
    /// Programs using absolute extrusion distances are rejected: the arc
    /// patches are emitted with relative E values.
    pub fn from_slicer(settings: &SlicerSettings) -> Result<Self> {
        if settings.get_bool("use_relative_e_distances") == Some(false) {
            return Err(Error::Parse(
                "motion program uses absolute extrusion distances; \
                 arc generation requires relative E"
                    .to_string(),
            ));
        }
        if settings.get_bool("use_relative_e_distances").is_none() && !settings.is_empty() {
            warn!("use_relative_e_distances not found in configuration block, assuming relative");
        }

        let defaults = Self::default();
        Ok(Self {
            extrusion_width: settings
                .get_f64("extrusion_width")
                .filter(|w| *w > 1e-3)
                .unwrap_or(defaults.extrusion_width),
            layer_height: settings
                .get_f64("layer_height")
                .unwrap_or(defaults.layer_height),
            nozzle_diameter: settings
                .get_f64("nozzle_diameter")
                .unwrap_or(defaults.nozzle_diameter),
            filament_diameter: settings
                .get_f64("filament_diameter")
                .unwrap_or(defaults.filament_diameter),
            extrusion_multiplier: settings
                .get_f64("extrusion_multiplier")
                .unwrap_or(defaults.extrusion_multiplier),
            travel_speed: settings
                .get_f64("travel_speed")
                .unwrap_or(defaults.travel_speed),
            retract_length: settings
                .get_f64("retract_length")
                .unwrap_or(defaults.retract_length),
            retract_speed: settings
                .get_f64("retract_speed")
                .unwrap_or(defaults.retract_speed),
        })
    }

    /// Cross-section area of the filament (mm²).
    pub fn filament_area(&self) -> CoordF {
        let r = self.filament_diameter / 2.0;
        std::f64::consts::PI * r * r
    }
}

/// Planner configuration. All lengths in millimetres, feedrates in mm/min.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArcConfig {
    // === Geometry ===
    /// Nominal arc extrusion width.
    pub arc_width: CoordF,
    /// Minimum arc radius.
    pub r_min: CoordF,
    /// Maximum arc radius.
    pub r_max: CoordF,
    /// Distance the next arc's center is nudged back toward the previous
    /// center, hiding it in already-printed material to avoid tiny radii.
    pub arc_center_offset: CoordF,
    /// Inward expansion of the bridge region into the surrounding
    /// perimeter before planning.
    pub extend_arcs_into_perimeter: CoordF,
    /// Planning stops once the uncovered band around the boundary is
    /// narrower than this.
    pub max_distance_from_perimeter: CoordF,
    /// Regions below this area are rejected (mm²).
    pub min_bridge_area: CoordF,
    /// Regions whose maximum extent is below this are rejected.
    pub min_bridge_length: CoordF,
    /// Reuse one arc center until `r_max` before spawning a new one.
    pub use_least_center_points: bool,
    /// Arc discretization step (radians).
    pub angular_step: CoordF,

    // === Kinematics ===
    /// Arc print feedrate (mm/min).
    pub arc_feedrate: CoordF,
    /// Floor feedrate for short arcs (mm/min).
    pub arc_min_feedrate: CoordF,
    /// Arcs printing faster than this duration are slowed down (s).
    pub arc_slowdown_duration: CoordF,
    /// Fan speed while printing arcs (0-255).
    pub arc_fan: u32,
    /// Optional nozzle temperature override while printing arcs (°C).
    pub arc_temperature: Option<u32>,
    /// Flow multiplier applied to arc extrusion.
    pub arc_extrusion_multiplier: CoordF,
    /// Tangential extension at both arc ends, for bonding.
    pub extend_arc_dist: CoordF,
    /// Minimum emitted polyline segment length.
    pub min_arc_point_dist: CoordF,
    /// Travel feedrate between arcs (mm/min).
    pub travel_feedrate: CoordF,

    // === Follow-up cooling ===
    /// Fan speed over the layers above arc patches (0-255).
    pub followup_fan: u32,
    /// Feedrate factor over the layers above arc patches.
    pub followup_speed_factor: CoordF,
    /// How far above a patch the overrides apply (mm).
    pub followup_z_distance: CoordF,
    /// Lateral proximity to a patch footprint that triggers them (mm).
    pub followup_detection_distance: CoordF,

    // === Limits ===
    /// Safety break on the number of arcs per region.
    pub max_arcs_per_region: usize,
    /// Per-region wall-clock budget (s).
    pub region_timeout: CoordF,
    /// Worker threads for region planning (0 or 1 = single-threaded).
    pub threads: usize,

    /// Print parameters the planner and emitter consult.
    pub print: PrintSettings,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self::from_print_settings(PrintSettings::default())
    }
}

impl ArcConfig {
    /// Build the default configuration for the given print settings,
    /// following the reference parameter derivations.
    pub fn from_print_settings(print: PrintSettings) -> Self {
        let arc_width = print.nozzle_diameter * 0.95;
        let arc_center_offset = 1.5 * print.nozzle_diameter;
        Self {
            arc_width,
            r_min: arc_center_offset + arc_width / 1.5,
            r_max: 30.0,
            arc_center_offset,
            extend_arcs_into_perimeter: 0.5 * print.extrusion_width,
            max_distance_from_perimeter: print.extrusion_width,
            min_bridge_area: 0.0,
            min_bridge_length: 0.0,
            use_least_center_points: false,
            angular_step: std::f64::consts::PI / 180.0,
            arc_feedrate: 1.5 * 60.0,
            arc_min_feedrate: 0.5 * 60.0,
            arc_slowdown_duration: 3.0,
            arc_fan: 255,
            arc_temperature: None,
            arc_extrusion_multiplier: 1.35,
            extend_arc_dist: print.nozzle_diameter,
            min_arc_point_dist: 0.1,
            travel_feedrate: 30.0 * 60.0,
            followup_fan: 25,
            followup_speed_factor: 0.25,
            followup_z_distance: 3.0,
            followup_detection_distance: 3.0,
            max_arcs_per_region: 2000,
            region_timeout: 30.0,
            threads: 0,
            print,
        }
    }

    /// Build the configuration for a parsed motion program: defaults
    /// derived from its slicer settings, then sidecar overrides from
    /// `<motion-file>.arcs.conf` when one exists.
    pub fn from_program(program: &MotionProgram) -> Result<Self> {
        let print = PrintSettings::from_slicer(&program.settings)?;
        let config = Self::from_print_settings(print);
        config.validate()?;
        Ok(config)
    }

    /// Same as [`ArcConfig::from_program`], additionally applying the
    /// sidecar override file for the given motion file path.
    pub fn from_program_with_sidecar(program: &MotionProgram, motion_path: &Path) -> Result<Self> {
        let print = PrintSettings::from_slicer(&program.settings)?;
        let mut config = Self::from_print_settings(print);
        let sidecar = sidecar_path(motion_path);
        if sidecar.exists() {
            let text = std::fs::read_to_string(&sidecar)?;
            config.apply_overrides(&text)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `key = value` overrides (one per line, `#` comments).
    ///
    /// Unknown keys are warned about and skipped; malformed values are a
    /// configuration error.
    pub fn apply_overrides(&mut self, text: &str) -> Result<()> {
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config(format!(
                    "sidecar line {}: expected `key = value`, got `{}`",
                    lineno + 1,
                    line
                )));
            };
            let key = key.trim();
            let value = value.trim();
            self.apply_override(key, value).map_err(|e| {
                Error::Config(format!("sidecar line {}: {}", lineno + 1, e))
            })?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        fn num(value: &str) -> std::result::Result<CoordF, String> {
            value
                .parse::<CoordF>()
                .map_err(|_| format!("invalid number `{}`", value))
        }
        fn flag(value: &str) -> std::result::Result<bool, String> {
            match value {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(format!("invalid boolean `{}`", value)),
            }
        }

        match key {
            "arc_width" => self.arc_width = num(value)?,
            "r_min" => self.r_min = num(value)?,
            "r_max" => self.r_max = num(value)?,
            "arc_center_offset" => self.arc_center_offset = num(value)?,
            "extend_arcs_into_perimeter" => self.extend_arcs_into_perimeter = num(value)?,
            "max_distance_from_perimeter" => self.max_distance_from_perimeter = num(value)?,
            "min_bridge_area" => self.min_bridge_area = num(value)?,
            "min_bridge_length" => self.min_bridge_length = num(value)?,
            "use_least_center_points" => self.use_least_center_points = flag(value)?,
            "angular_step" => self.angular_step = num(value)?,
            "arc_feedrate" => self.arc_feedrate = num(value)?,
            "arc_min_feedrate" => self.arc_min_feedrate = num(value)?,
            "arc_slowdown_duration" => self.arc_slowdown_duration = num(value)?,
            "arc_fan" => self.arc_fan = num(value)? as u32,
            "arc_temperature" => self.arc_temperature = Some(num(value)? as u32),
            "arc_extrusion_multiplier" => self.arc_extrusion_multiplier = num(value)?,
            "extend_arc_dist" => self.extend_arc_dist = num(value)?,
            "min_arc_point_dist" => self.min_arc_point_dist = num(value)?,
            "travel_feedrate" => self.travel_feedrate = num(value)?,
            "followup_fan" => self.followup_fan = num(value)? as u32,
            "followup_speed_factor" => self.followup_speed_factor = num(value)?,
            "followup_z_distance" => self.followup_z_distance = num(value)?,
            "followup_detection_distance" => self.followup_detection_distance = num(value)?,
            "max_arcs_per_region" => self.max_arcs_per_region = num(value)? as usize,
            "region_timeout" => self.region_timeout = num(value)?,
            "threads" => self.threads = num(value)? as usize,
            other => {
                warn!("ignoring unknown configuration key `{}`", other);
            }
        }
        Ok(())
    }

    /// Validate the configured values against the planner's requirements.
    pub fn validate(&self) -> Result<()> {
        if self.arc_width <= 0.0 {
            return Err(Error::Config("arc_width must be positive".to_string()));
        }
        if self.r_min > self.r_max {
            return Err(Error::Config(format!(
                "r_min ({:.3}) exceeds r_max ({:.3})",
                self.r_min, self.r_max
            )));
        }
        if self.angular_step <= 0.0 {
            return Err(Error::Config("angular_step must be positive".to_string()));
        }
        if self.extend_arcs_into_perimeter < 0.5 * self.arc_width {
            return Err(Error::Config(format!(
                "extend_arcs_into_perimeter ({:.3}) below half the arc width ({:.3})",
                self.extend_arcs_into_perimeter,
                0.5 * self.arc_width
            )));
        }
        if self.region_timeout <= 0.0 {
            return Err(Error::Config("region_timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// The sidecar override file for a motion file: `<name>.arcs.conf` next
/// to it.
pub fn sidecar_path(motion_path: &Path) -> PathBuf {
    let mut name = motion_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".arcs.conf");
    motion_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_follow_print_settings() {
        let config = ArcConfig::default();
        assert_relative_eq!(config.arc_width, 0.4 * 0.95, epsilon = 1e-9);
        assert_relative_eq!(config.arc_center_offset, 0.6, epsilon = 1e-9);
        assert_relative_eq!(
            config.r_min,
            config.arc_center_offset + config.arc_width / 1.5,
            epsilon = 1e-9
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_radii() {
        let mut config = ArcConfig::default();
        config.r_min = 10.0;
        config.r_max = 5.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_small_extend() {
        let mut config = ArcConfig::default();
        config.extend_arcs_into_perimeter = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ArcConfig::default();
        config
            .apply_overrides(
                "# comment\n\
                 r_max = 12.5\n\
                 use_least_center_points = true\n\
                 arc_fan = 200 # full blast is too much\n",
            )
            .unwrap();
        assert_relative_eq!(config.r_max, 12.5, epsilon = 1e-9);
        assert!(config.use_least_center_points);
        assert_eq!(config.arc_fan, 200);
    }

    #[test]
    fn test_apply_overrides_malformed() {
        let mut config = ArcConfig::default();
        assert!(config.apply_overrides("r_max 12.5").is_err());
        assert!(config.apply_overrides("r_max = banana").is_err());
    }

    #[test]
    fn test_filament_area() {
        let print = PrintSettings::default();
        assert_relative_eq!(
            print.filament_area(),
            std::f64::consts::PI * 0.875 * 0.875,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_sidecar_path() {
        let p = sidecar_path(Path::new("/tmp/model.gcode"));
        assert_eq!(p, Path::new("/tmp/model.gcode.arcs.conf"));
    }
}
