pub mod fallback;
pub mod refine;
pub mod status;
pub mod telemetry;
