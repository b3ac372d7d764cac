use crate::graph::TextureHandle;
use crate::material::{Material, MaterialStore, PropertyBlock};
use crate::shader::Shader;
use glamx::Vec4;
use std::sync::Arc;

/// GPU work recorded by a raster pass's render function.
#[derive(Debug, Clone)]
pub enum RasterCommand {
    /// Full-screen triangle sampling `source`, shaded by `pass` of `shader`.
    DrawFullscreen {
        source: TextureHandle,
        scale_bias: Vec4,
        shader: Arc<Shader>,
        pass: usize,
        properties: PropertyBlock,
    },
}

/// Command list of one raster pass.
///
/// Only textures the pass declared may be sampled; anything else is remembered and
/// reported once the render function returns.
#[derive(Debug, Default)]
pub struct RasterCommandBuffer {
    declared: Vec<TextureHandle>,
    commands: Vec<RasterCommand>,
    undeclared: Option<TextureHandle>,
}

impl RasterCommandBuffer {
    pub(crate) fn new(declared: Vec<TextureHandle>) -> Self {
        Self {
            declared,
            commands: Vec::new(),
            undeclared: None,
        }
    }

    pub fn draw_fullscreen(
        &mut self,
        source: TextureHandle,
        scale_bias: Vec4,
        material: &Material,
        pass: usize,
    ) {
        if !self.declared.contains(&source) {
            self.undeclared.get_or_insert(source);
            return;
        }

        self.commands.push(RasterCommand::DrawFullscreen {
            source,
            scale_bias,
            shader: material.shader().clone(),
            pass,
            properties: material.properties().clone(),
        });
    }

    pub fn commands(&self) -> &[RasterCommand] {
        &self.commands
    }

    pub(crate) fn finish(self) -> Result<Vec<RasterCommand>, TextureHandle> {
        match self.undeclared {
            Some(handle) => Err(handle),
            None => Ok(self.commands),
        }
    }
}

/// Everything a raster render function may touch while it runs.
pub struct RasterGraphContext<'a> {
    pub cmd: &'a mut RasterCommandBuffer,
    pub materials: &'a mut MaterialStore,
}
