use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Kinematics configuration for a Core2XY printer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Toolhead velocity limit in mm/s
    pub max_velocity: f64,

    /// Toolhead acceleration limit in mm/s^2
    pub max_accel: f64,

    /// Velocity limit for moves along Z, defaults to `max_velocity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_z_velocity: Option<f64>,

    /// Acceleration limit for moves along Z, defaults to `max_accel`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_z_accel: Option<f64>,

    /// Belt A, the primary carriage (`+` by default)
    pub stepper_x: RailConfig,

    /// Belt B (`-` by default)
    pub stepper_y: RailConfig,

    /// Z axis, driven directly
    pub stepper_z: RailConfig,

    /// Optional second carriage sharing the X axis
    #[serde(default)]
    pub dual_carriage: Option<DualCarriageConfig>,
}

/// Stepper rail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailConfig {
    /// Distance in mm moved by one full step
    pub step_distance: f64,

    #[serde(default)]
    pub position_min: f64,

    pub position_max: f64,

    pub position_endstop: f64,

    /// Home towards `position_max`. Inferred from the endstop position when
    /// unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homing_positive_dir: Option<bool>,

    /// Stepper variant code or name, overriding the rail default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Dual carriage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualCarriageConfig {
    /// Axis shared with the primary carriage
    #[serde(default = "default_dual_carriage_axis")]
    pub axis: String,

    #[serde(flatten)]
    pub rail: RailConfig,
}

fn default_dual_carriage_axis() -> String {
    "x".to_string()
}

impl RailConfig {
    /// Homing direction, either configured or inferred from an endstop in
    /// the outer quarter of the travel range.
    pub fn homes_positive(&self) -> Option<bool> {
        if let Some(positive) = self.homing_positive_dir {
            return Some(positive);
        }
        let quarter = (self.position_max - self.position_min) / 4.0;
        if self.position_endstop <= self.position_min + quarter {
            Some(false)
        } else if self.position_endstop >= self.position_max - quarter {
            Some(true)
        } else {
            None
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.step_distance.is_nan() || self.step_distance <= 0.0 {
            bail!("{name}.step_distance must be above 0");
        }
        if self.position_min >= self.position_max {
            bail!("{name}.position_min must be below position_max");
        }
        if self.position_endstop < self.position_min || self.position_endstop > self.position_max {
            bail!(
                "{name}.position_endstop must be within {}:{}",
                self.position_min,
                self.position_max
            );
        }
        if self.homes_positive().is_none() {
            bail!("{name}: unable to infer homing_positive_dir");
        }
        Ok(())
    }
}

fn validate_limit(name: &str, value: f64, max: f64) -> Result<()> {
    if value.is_nan() || value <= 0.0 {
        bail!("{name} must be above 0");
    }
    if value > max {
        bail!("{name} must not exceed {max}");
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file, auto-detecting TOML or JSON format
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let extension = path.extension().and_then(|s| s.to_str());

        let config = match extension {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content).or_else(|toml_err| {
                Self::from_json(&content).map_err(|json_err| {
                    toml_err.context(format!("config is neither TOML nor JSON ({json_err:#})"))
                })
            }),
        }?;
        tracing::debug!(path = %path.display(), "loaded kinematics config");
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config as TOML")
    }

    /// Parse configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse config as JSON")
    }

    /// Velocity limit applied to moves along Z
    pub fn z_velocity(&self) -> f64 {
        self.max_z_velocity.unwrap_or(self.max_velocity)
    }

    /// Acceleration limit applied to moves along Z
    pub fn z_accel(&self) -> f64 {
        self.max_z_accel.unwrap_or(self.max_accel)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_limit("max_velocity", self.max_velocity, f64::INFINITY)?;
        validate_limit("max_accel", self.max_accel, f64::INFINITY)?;
        validate_limit("max_z_velocity", self.z_velocity(), self.max_velocity)?;
        validate_limit("max_z_accel", self.z_accel(), self.max_accel)?;

        self.stepper_x.validate("stepper_x")?;
        self.stepper_y.validate("stepper_y")?;
        self.stepper_z.validate("stepper_z")?;
        if self.stepper_z.variant.is_some() {
            bail!("stepper_z does not take a variant");
        }

        if let Some(dc) = &self.dual_carriage {
            if !dc.axis.eq_ignore_ascii_case("x") {
                bail!("Core2XY kinematics supports only a dual_carriage on the X axis");
            }
            dc.rail.validate("dual_carriage")?;
        }

        Ok(())
    }
}
