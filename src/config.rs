// In: src/config.rs

//! The single source of truth for all lcstitch run configuration.
//!
//! `StitchConfig` is created once at the application boundary (from a JSON file,
//! CLI flags, or both) and passed by reference into every stage. Every field has
//! a serde default so partial config files are valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, StitchError};

//==================================================================================
// I. Core Configuration Enums
//==================================================================================

/// How an exposure value is compared against the requested exposure time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExposureMatch {
    /// **Default:** bitwise-exact floating point equality. A caller passing `10.0`
    /// against stored `10.000001` gets no frames back.
    #[default]
    Exact,

    /// `|exposure - target| <= epsilon`.
    Tolerance { epsilon: f64 },
}

impl ExposureMatch {
    pub fn matches(&self, value: f64, target: f64) -> bool {
        match *self {
            ExposureMatch::Exact => value == target,
            ExposureMatch::Tolerance { epsilon } => (value - target).abs() <= epsilon,
        }
    }
}

//==================================================================================
// II. The Unified StitchConfig
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StitchConfig {
    /// Keep only frames with this exposure time. `None` keeps every frame.
    #[serde(default)]
    pub exposure_filter: Option<f64>,

    #[serde(default)]
    pub exposure_match: ExposureMatch,

    /// Frame-metadata column holding the mid-exposure time used as sort key.
    #[serde(default = "default_time_column")]
    pub time_column: String,

    /// Frame-metadata column holding the exposure duration.
    #[serde(default = "default_exposure_column")]
    pub exposure_column: String,

    /// Cube holding the raw flux, read by the statistics stage.
    #[serde(default = "default_flux_section")]
    pub flux_section: String,

    /// Cube holding the flux uncertainty, read by the statistics stage.
    #[serde(default = "default_fluxerr_section")]
    pub fluxerr_section: String,

    /// Cubes that an in-place resort leaves in stored order. Stitching always
    /// sorts every cube.
    #[serde(default)]
    pub sort_exempt_sections: Vec<String>,

    /// If true, input archives are reordered by their earliest frame time before
    /// stitching. Otherwise the caller's order is kept.
    #[serde(default)]
    pub order_inputs_by_time: bool,

    /// Zstd level applied to every section payload written.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            exposure_filter: None,
            exposure_match: ExposureMatch::default(),
            time_column: default_time_column(),
            exposure_column: default_exposure_column(),
            flux_section: default_flux_section(),
            fluxerr_section: default_fluxerr_section(),
            sort_exempt_sections: Vec::new(),
            order_inputs_by_time: false,
            compression_level: default_compression_level(),
        }
    }
}

impl StitchConfig {
    /// Loads a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, StitchError> {
        let text = std::fs::read_to_string(path).at(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn default_time_column() -> String {
    "tmid".to_string()
}

fn default_exposure_column() -> String {
    "exposure".to_string()
}

fn default_flux_section() -> String {
    "FLUX".to_string()
}

fn default_fluxerr_section() -> String {
    "FLUXERR".to_string()
}

fn default_compression_level() -> i32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: StitchConfig =
            serde_json::from_str(r#"{ "exposure_filter": 10.0 }"#).unwrap();
        assert_eq!(config.exposure_filter, Some(10.0));
        assert_eq!(config.time_column, "tmid");
        assert_eq!(config.exposure_match, ExposureMatch::Exact);
        assert!(config.sort_exempt_sections.is_empty());
        assert_eq!(config.compression_level, 3);
    }

    #[test]
    fn test_tolerance_mode_parses() {
        let config: StitchConfig = serde_json::from_str(
            r#"{ "exposure_match": { "mode": "tolerance", "epsilon": 0.5 } }"#,
        )
        .unwrap();
        assert_eq!(
            config.exposure_match,
            ExposureMatch::Tolerance { epsilon: 0.5 }
        );
        assert!(config.exposure_match.matches(10.4, 10.0));
        assert!(!config.exposure_match.matches(10.6, 10.0));
    }

    #[test]
    fn test_exact_match_has_no_tolerance() {
        assert!(ExposureMatch::Exact.matches(10.0, 10.0));
        assert!(!ExposureMatch::Exact.matches(10.0 + 1e-9, 10.0));
        assert!(!ExposureMatch::Exact.matches(f64::NAN, f64::NAN));
    }
}
