//! Per-tick dispatch sequences.
//!
//! A stage only records dispatches; the driver submits once per tick. Every
//! dispatch writes one field half that none of its reads alias.

pub mod atmosphere;
pub mod fluid;

pub use atmosphere::AtmosphereStage;
pub use fluid::FluidStage;
