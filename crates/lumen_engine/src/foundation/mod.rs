//! Foundation module - math, logging and version helpers shared by every
//! other part of the engine.

pub mod logging;
pub mod math;
pub mod version;
