//! Shader programs addressable by a logical path.
//!
//! A [`Shader`] carries the WGSL executed by the GPU backend and, per pass, an optional
//! CPU reference kernel executed by the [`SoftwareBackend`](crate::backend::SoftwareBackend).
//! Shaders are registered once into the [`ShaderLibrary`]; materials are created from them.

pub mod checks;

use crate::material::PropertyBlock;
use checks::{ShaderCheckError, validate_wgsl_source};
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{debug, warn};

pub const BLIT_SHADER_PATH: &str = "Hidden/Internal/Blit";
pub const FALLBACK_SHADER_PATH: &str = "Hidden/Internal/Fallback";

const BLIT_WGSL: &str = include_str!("shaders/blit.wgsl");
const FALLBACK_WGSL: &str = include_str!("shaders/fallback.wgsl");

/// Color fed through a fragment stage, linear RGBA.
pub type Rgba = [f32; 4];

/// CPU equivalent of a fragment entry point: `output = f(input, properties)`.
pub type FragmentKernel = fn(Rgba, &PropertyBlock) -> Rgba;

/// Stable identifier of a named shader property, the analogue of a uniform name lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PropertyId(u64);

impl PropertyId {
    /// FNV-1a over the property name, usable in `const` position.
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            i += 1;
        }
        PropertyId(hash)
    }
}

#[derive(Debug, Clone)]
pub struct ShaderProperty {
    pub name: String,
    pub id: PropertyId,
    pub default: f32,
}

#[derive(Clone)]
pub struct ShaderPass {
    pub name: String,
    pub fragment_entry: String,
    pub reference: Option<FragmentKernel>,
}

impl Debug for ShaderPass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderPass")
            .field("name", &self.name)
            .field("fragment_entry", &self.fragment_entry)
            .field("has_reference", &self.reference.is_some())
            .finish()
    }
}

/// A full-screen shader program.
///
/// Every shader shares the same binding contract: `@group(0) @binding(0)` source texture,
/// `@binding(1)` sampler and `@binding(2)` a uniform struct starting with
/// `scale_bias: vec4f` followed by the declared float properties in declaration order.
/// The vertex stage is `vs_main` and emits a full-screen triangle.
#[derive(Debug, Clone)]
pub struct Shader {
    path: String,
    code: String,
    passes: Vec<ShaderPass>,
    properties: Vec<ShaderProperty>,
}

impl Shader {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            passes: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_pass(
        mut self,
        name: impl Into<String>,
        fragment_entry: impl Into<String>,
        reference: Option<FragmentKernel>,
    ) -> Self {
        self.passes.push(ShaderPass {
            name: name.into(),
            fragment_entry: fragment_entry.into(),
            reference,
        });
        self
    }

    pub fn with_float_property(mut self, name: impl Into<String>, default: f32) -> Self {
        let name = name.into();
        let id = PropertyId::from_name(&name);
        self.properties.push(ShaderProperty { name, id, default });
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn passes(&self) -> &[ShaderPass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&ShaderPass> {
        self.passes.get(index)
    }

    pub fn properties(&self) -> &[ShaderProperty] {
        &self.properties
    }

    pub fn property(&self, id: PropertyId) -> Option<&ShaderProperty> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn blit() -> Self {
        Shader::new(BLIT_SHADER_PATH, BLIT_WGSL).with_pass("Blit", "fs_main", Some(passthrough))
    }

    pub fn fallback() -> Self {
        Shader::new(FALLBACK_SHADER_PATH, FALLBACK_WGSL).with_pass(
            "Fallback",
            "fs_main",
            Some(magenta),
        )
    }
}

fn passthrough(color: Rgba, _: &PropertyBlock) -> Rgba {
    color
}

fn magenta(_: Rgba, _: &PropertyBlock) -> Rgba {
    [1.0, 0.0, 1.0, 1.0]
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum ShaderError {
    #[snafu(display("Shader {path:?} failed validation: {source}"))]
    Invalid {
        path: String,
        source: ShaderCheckError,
    },

    #[snafu(display("Shader {path:?} declares no passes"))]
    NoPasses { path: String },

    #[snafu(display("Shader {path:?} was already registered"))]
    AlreadyRegistered { path: String },
}

/// Registry of every shader program a material may be created from.
pub struct ShaderLibrary {
    shaders: HashMap<String, Arc<Shader>>,
    fallback: Arc<Shader>,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderLibrary {
    pub fn new() -> Self {
        let fallback = Arc::new(Shader::fallback());
        let blit = Arc::new(Shader::blit());

        let mut shaders = HashMap::new();
        shaders.insert(fallback.path().to_string(), fallback.clone());
        shaders.insert(blit.path().to_string(), blit);

        Self { shaders, fallback }
    }

    /// Validates and registers a shader under its path.
    pub fn register(&mut self, shader: Shader) -> Result<Arc<Shader>, ShaderError> {
        let path = shader.path().to_string();

        snafu::ensure!(
            !self.shaders.contains_key(&path),
            AlreadyRegisteredErr { path }
        );
        snafu::ensure!(!shader.passes().is_empty(), NoPassesErr { path });

        validate_wgsl_source(shader.code()).context(InvalidErr { path: path.clone() })?;

        debug!("Registered shader {path:?}");
        let shader = Arc::new(shader);
        self.shaders.insert(path, shader.clone());
        Ok(shader)
    }

    pub fn find(&self, path: &str) -> Option<Arc<Shader>> {
        self.shaders.get(path).cloned()
    }

    /// Looks up `path`, handing out the magenta fallback program when it is unknown.
    pub fn find_or_fallback(&self, path: &str) -> Arc<Shader> {
        self.find(path).unwrap_or_else(|| {
            warn!("Shader {path:?} not found, using the fallback shader");
            self.fallback.clone()
        })
    }

    pub fn fallback(&self) -> &Arc<Shader> {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_builtin_shader {
        ($fn_name:ident, $path:literal => $code:expr) => {
            #[test]
            fn $fn_name() {
                validate_wgsl_source($code)
                    .inspect_err(|e| e.emit_to_stderr_with_path($code, $path))
                    .unwrap();
            }
        };
    }

    test_builtin_shader!(blit_shader, "shaders/blit.wgsl" => BLIT_WGSL);
    test_builtin_shader!(fallback_shader, "shaders/fallback.wgsl" => FALLBACK_WGSL);

    #[test]
    fn property_ids_are_stable_and_distinct() {
        const INTENSITY: PropertyId = PropertyId::from_name("_Intensity");

        assert_eq!(INTENSITY, PropertyId::from_name("_Intensity"));
        assert_ne!(INTENSITY, PropertyId::from_name("_intensity"));
    }

    #[test]
    fn unknown_path_resolves_to_fallback() {
        let library = ShaderLibrary::new();
        let shader = library.find_or_fallback("Hidden/Does/Not/Exist");
        assert_eq!(shader.path(), FALLBACK_SHADER_PATH);
    }

    #[test]
    fn rejects_invalid_and_duplicate_shaders() {
        let mut library = ShaderLibrary::new();

        let broken = Shader::new("Test/Broken", "fn fs_main( {").with_pass("P", "fs_main", None);
        assert!(matches!(
            library.register(broken),
            Err(ShaderError::Invalid { .. })
        ));

        let duplicate = Shader::blit();
        assert!(matches!(
            library.register(duplicate),
            Err(ShaderError::AlreadyRegistered { .. })
        ));

        let no_passes = Shader::new("Test/Empty", BLIT_WGSL);
        assert!(matches!(
            library.register(no_passes),
            Err(ShaderError::NoPasses { .. })
        ));
    }
}
