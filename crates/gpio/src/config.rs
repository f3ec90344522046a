// crates/gpio/src/config.rs

//! JSON pin map.
//!
//! ```json
//! { "gpio": { "inputs": [ { "gpio": 17 } ], "outputs": [ { "gpio": 27 } ] } }
//! ```
//!
//! Instances are addressed by position within their section; the `gpio`
//! field names the sysfs line.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read pin map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pin map {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The configured input and output lines.
#[derive(Debug, Clone, Deserialize)]
pub struct PinMap {
    gpio: PinSections,
}

#[derive(Debug, Clone, Deserialize)]
struct PinSections {
    inputs: Vec<PinEntry>,
    outputs: Vec<PinEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct PinEntry {
    gpio: u32,
}

impl PinMap {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.gpio.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.gpio.outputs.len()
    }

    /// Sysfs line behind input `instance`, if configured.
    pub fn input_gpio(&self, instance: usize) -> Option<u32> {
        self.gpio.inputs.get(instance).map(|entry| entry.gpio)
    }

    /// Sysfs line behind output `instance`, if configured.
    pub fn output_gpio(&self, instance: usize) -> Option<u32> {
        self.gpio.outputs.get(instance).map(|entry| entry.gpio)
    }

    pub fn input_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.gpio.inputs.iter().map(|entry| entry.gpio)
    }

    pub fn output_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.gpio.outputs.iter().map(|entry| entry.gpio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> serde_json::Result<PinMap> {
        serde_json::from_str(text)
    }

    #[test]
    fn parses_inputs_and_outputs_in_order() {
        let map = parse(
            r#"{ "gpio": {
                "inputs": [ { "gpio": 17 }, { "gpio": 18 } ],
                "outputs": [ { "gpio": 27 } ]
            } }"#,
        )
        .unwrap();
        assert_eq!(map.num_inputs(), 2);
        assert_eq!(map.num_outputs(), 1);
        assert_eq!(map.input_gpio(0), Some(17));
        assert_eq!(map.input_gpio(1), Some(18));
        assert_eq!(map.output_gpio(0), Some(27));
    }

    #[test]
    fn out_of_range_instances_are_none() {
        let map = parse(r#"{ "gpio": { "inputs": [], "outputs": [] } }"#).unwrap();
        assert_eq!(map.input_gpio(0), None);
        assert_eq!(map.output_gpio(5), None);
    }

    #[test]
    fn missing_gpio_object_is_rejected() {
        assert!(parse(r#"{ "inputs": [], "outputs": [] }"#).is_err());
    }

    #[test]
    fn non_array_sections_are_rejected() {
        assert!(parse(r#"{ "gpio": { "inputs": 3, "outputs": [] } }"#).is_err());
    }

    #[test]
    fn load_reports_missing_file_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PinMap::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
