// crates/gpio/src/lib.rs

//! Pin map configuration and sysfs GPIO line access.

mod config;
mod sysfs;

pub use config::{ConfigError, PinMap};
pub use sysfs::{Chip, Direction, GpioError, SYSFS_GPIO_BASE};
