mod engine;

pub use engine::{spawn, RotationHandles};
