//! The configuration surface (spec §3, §6), built-in presets, and the
//! auto-select-by-criticality resolver (spec §4.E).

#![forbid(unsafe_code)]

pub mod config;
pub mod resolver;
pub mod technique;

pub use config::{presets, Config, SizeMode, StringScheme};
pub use resolver::{estimate_growth_pct, resolve_effective};
pub use technique::{Technique, TechniqueSet, ALL_TECHNIQUES};
