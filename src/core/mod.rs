//! Engine assembly and process signal handling

pub mod engine;
pub mod signals;

pub use engine::{B2buaEngine, EngineStatus};
pub use signals::{AdminControl, ControlSignal};
