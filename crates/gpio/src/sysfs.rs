// crates/gpio/src/sysfs.rs

//! Sysfs GPIO line access.
//!
//! Lines are driven through the conventional filesystem nodes: `export` and
//! `unexport` at the chip root, `gpioN/direction` and `gpioN/value` per line.
//! The chip root is a parameter so tests can point it at a scratch tree.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::PinMap;

pub const SYSFS_GPIO_BASE: &str = "/sys/class/gpio";

#[derive(Debug, Error)]
#[error("gpio node {path}: {source}")]
pub struct GpioError {
    path: String,
    #[source]
    source: std::io::Error,
}

impl GpioError {
    fn new(path: &Path, source: std::io::Error) -> Self {
        Self {
            path: path.display().to_string(),
            source,
        }
    }

    /// The kernel reports an already-exported line as busy.
    fn is_busy(&self) -> bool {
        self.source.kind() == ErrorKind::ResourceBusy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// A sysfs GPIO chip root.
#[derive(Debug, Clone)]
pub struct Chip {
    base: PathBuf,
}

impl Default for Chip {
    fn default() -> Self {
        Self::at(SYSFS_GPIO_BASE)
    }
}

impl Chip {
    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn export(&self, line: u32) -> Result<(), GpioError> {
        self.write_node("export", &line.to_string())
    }

    pub fn unexport(&self, line: u32) -> Result<(), GpioError> {
        self.write_node("unexport", &line.to_string())
    }

    pub fn set_direction(&self, line: u32, direction: Direction) -> Result<(), GpioError> {
        self.write_node(format!("gpio{line}/direction"), direction.as_str())
    }

    /// Current level of `line`.
    pub fn read(&self, line: u32) -> Result<bool, GpioError> {
        let path = self.base.join(format!("gpio{line}/value"));
        let text = fs::read_to_string(&path).map_err(|e| GpioError::new(&path, e))?;
        Ok(text.trim_start().starts_with('1'))
    }

    /// Drive `line` high or low.
    pub fn write(&self, line: u32, high: bool) -> Result<(), GpioError> {
        self.write_node(format!("gpio{line}/value"), if high { "1" } else { "0" })
    }

    /// Export and direct every configured line. An already-exported line is
    /// left exported; its direction is still applied.
    pub fn enable_pins(&self, map: &PinMap) -> Result<(), GpioError> {
        let lines = map
            .input_lines()
            .map(|line| (line, Direction::In))
            .chain(map.output_lines().map(|line| (line, Direction::Out)));
        for (line, direction) in lines {
            match self.export(line) {
                Ok(()) => {}
                Err(e) if e.is_busy() => {
                    debug!(line, "line already exported");
                }
                Err(e) => return Err(e),
            }
            self.set_direction(line, direction)?;
        }
        Ok(())
    }

    /// Best-effort unexport of every configured line.
    pub fn disable_pins(&self, map: &PinMap) {
        for line in map.input_lines().chain(map.output_lines()) {
            if let Err(e) = self.unexport(line) {
                warn!(line, "failed to unexport: {e}");
            }
        }
    }

    fn write_node(&self, rel: impl AsRef<Path>, data: &str) -> Result<(), GpioError> {
        let path = self.base.join(rel);
        fs::write(&path, data).map_err(|e| GpioError::new(&path, e))
    }
}
