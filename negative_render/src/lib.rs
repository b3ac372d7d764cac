//! Minimal frame-graph renderer hosting full-screen effects.
//!
//! - [`graph`]: per-frame render graph with transient textures and access declarations
//! - [`backend`]: CPU reference and wgpu devices executing a graph
//! - [`shader`] / [`material`]: WGSL programs and their property values
//! - [`volume`]: blended effect settings
//! - [`pipeline`]: renderer features, pass queue and the per-camera frame

pub mod backend;
pub mod blitter;
pub mod graph;
pub mod material;
pub mod pipeline;
pub mod shader;
pub mod volume;

pub use blitter::Blitter;
pub use material::{HMaterial, Material, MaterialStore};
pub use shader::{Shader, ShaderLibrary};

pub use glamx as math;
