//! Materials: a shader program plus its current property values.
//!
//! Materials are owned by the [`MaterialStore`] and addressed through [`HMaterial`]
//! handles. They are never released implicitly; whoever created a material has to hand
//! its handle back to [`MaterialStore::destroy`]. A forgotten destroy stays visible in
//! [`MaterialStore::len`].

use crate::shader::{PropertyId, Shader, ShaderError, ShaderLibrary};
use slotmap::{SlotMap, new_key_type};
use std::sync::Arc;
use tracing::{debug, trace, warn};

new_key_type! {
    /// Handle to a material inside a [`MaterialStore`].
    pub struct HMaterial;
}

/// Resolved float property values, in the shader's declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBlock {
    values: Vec<(PropertyId, f32)>,
}

impl PropertyBlock {
    pub fn float(&self, id: PropertyId) -> Option<f32> {
        self.values
            .iter()
            .find_map(|(key, value)| (*key == id).then_some(*value))
    }

    pub fn float_or(&self, id: PropertyId, default: f32) -> f32 {
        self.float(id).unwrap_or(default)
    }

    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    shader: Arc<Shader>,
    properties: PropertyBlock,
}

impl Material {
    pub fn new(shader: Arc<Shader>) -> Self {
        let values = shader
            .properties()
            .iter()
            .map(|p| (p.id, p.default))
            .collect();

        Self {
            shader,
            properties: PropertyBlock { values },
        }
    }

    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    pub fn properties(&self) -> &PropertyBlock {
        &self.properties
    }

    /// Sets a float property. Properties the shader doesn't declare are ignored.
    pub fn set_float(&mut self, id: PropertyId, value: f32) -> bool {
        match self.properties.values.iter_mut().find(|(key, _)| *key == id) {
            Some((_, slot)) => {
                *slot = value;
                true
            }
            None => {
                trace!(
                    "Shader {:?} has no property {id:?}, ignoring",
                    self.shader.path()
                );
                false
            }
        }
    }

    pub fn float(&self, id: PropertyId) -> Option<f32> {
        self.properties.float(id)
    }
}

/// Owner of every live material and of the shader library they are created from.
#[derive(Default)]
pub struct MaterialStore {
    shaders: ShaderLibrary,
    materials: SlotMap<HMaterial, Material>,
}

impl MaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn register_shader(&mut self, shader: Shader) -> Result<Arc<Shader>, ShaderError> {
        self.shaders.register(shader)
    }

    /// Creates a material for the shader at `shader_path`.
    ///
    /// An unknown path produces a working material bound to the magenta fallback shader.
    pub fn create_engine_material(&mut self, shader_path: &str) -> HMaterial {
        let shader = self.shaders.find_or_fallback(shader_path);
        if shader.path() != shader_path {
            warn!("Material for {shader_path:?} degraded to {:?}", shader.path());
        }

        let handle = self.materials.insert(Material::new(shader));
        debug!("Created material {handle:?} for {shader_path:?}");
        handle
    }

    /// Destroys a material. Passing `None` or a stale handle is a no-op.
    pub fn destroy(&mut self, material: Option<HMaterial>) -> bool {
        let Some(handle) = material else {
            return false;
        };

        let destroyed = self.materials.remove(handle).is_some();
        if destroyed {
            debug!("Destroyed material {handle:?}");
        }
        destroyed
    }

    pub fn get(&self, handle: HMaterial) -> Option<&Material> {
        self.materials.get(handle)
    }

    pub fn get_mut(&mut self, handle: HMaterial) -> Option<&mut Material> {
        self.materials.get_mut(handle)
    }

    pub fn contains(&self, handle: HMaterial) -> bool {
        self.materials.contains_key(handle)
    }

    pub fn set_float(&mut self, handle: HMaterial, id: PropertyId, value: f32) -> bool {
        self.materials
            .get_mut(handle)
            .is_some_and(|m| m.set_float(id, value))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::FALLBACK_SHADER_PATH;

    const STRENGTH: PropertyId = PropertyId::from_name("_Strength");

    fn store_with_test_shader() -> MaterialStore {
        let mut store = MaterialStore::new();
        let shader = Shader::new("Test/Strength", include_str!("shader/shaders/blit.wgsl"))
            .with_pass("Main", "fs_main", None)
            .with_float_property("_Strength", 0.5);
        store.register_shader(shader).unwrap();
        store
    }

    #[test]
    fn material_starts_with_property_defaults() {
        let mut store = store_with_test_shader();
        let handle = store.create_engine_material("Test/Strength");

        assert_eq!(store.get(handle).unwrap().float(STRENGTH), Some(0.5));
        assert!(store.set_float(handle, STRENGTH, 0.75));
        assert_eq!(store.get(handle).unwrap().float(STRENGTH), Some(0.75));
        assert!(!store.set_float(handle, PropertyId::from_name("_Missing"), 1.0));
    }

    #[test]
    fn unknown_shader_degrades_to_fallback() {
        let mut store = MaterialStore::new();
        let handle = store.create_engine_material("Hidden/Missing");

        let material = store.get(handle).unwrap();
        assert_eq!(material.shader().path(), FALLBACK_SHADER_PATH);
        assert!(material.properties().is_empty());
    }

    #[test]
    fn destroy_is_null_safe_and_single_shot() {
        let mut store = store_with_test_shader();
        let handle = store.create_engine_material("Test/Strength");
        assert_eq!(store.len(), 1);

        assert!(!store.destroy(None));
        assert!(store.destroy(Some(handle)));
        assert!(!store.destroy(Some(handle)));
        assert!(store.is_empty());
    }
}
