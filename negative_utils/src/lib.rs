mod effect_args;
mod logging;

pub use effect_args::{EffectArgs, ExecutionBackend};

pub use tracing;
