use argh::FromArgs;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Which device records of a frame graph are executed on.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ExecutionBackend {
    /// CPU reference device, always available.
    #[default]
    Software,
    /// A real GPU through wgpu.
    Gpu,
}

fn execution_backend(backend: &str) -> Result<Option<ExecutionBackend>, String> {
    let parsed = match backend {
        "software" | "cpu" => ExecutionBackend::Software,
        "gpu" | "wgpu" => ExecutionBackend::Gpu,
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

fn force_backend(backend: &str) -> Result<Option<Vec<wgpu::Backends>>, String> {
    let backends: wgpu::Backends = wgpu::Backends::from_comma_list(backend);

    if backends.is_empty() {
        return Ok(None);
    }

    let mut backends: Vec<wgpu::Backends> = backends.into_iter().collect();

    // push vulkan back if it's a choice because all other backends are more stable
    backends.sort_by(|a, _| {
        if a.contains(wgpu::Backends::VULKAN) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    });

    Ok(Some(backends))
}

/// Negative effect arguments
#[derive(Debug, Default, FromArgs)]
pub struct EffectArgs {
    /// image the effect is applied to
    #[argh(option)]
    pub input: Option<PathBuf>,
    /// where the processed image is written
    #[argh(option)]
    pub output: Option<PathBuf>,
    /// intensity override of the global volume, clamped to [0, 1]
    #[argh(option)]
    pub intensity: Option<f32>,
    /// how many frames are rendered before the result is written
    #[argh(option)]
    pub frames: Option<u32>,
    /// keep the renderer feature inactive
    #[argh(switch)]
    pub no_effect: bool,

    #[argh(option, hidden_help, from_str_fn(execution_backend))]
    pub backend: Option<Option<ExecutionBackend>>,
    #[argh(option, hidden_help, from_str_fn(force_backend))]
    pub force_backend: Option<Option<Vec<wgpu::Backends>>>,
}

impl EffectArgs {
    fn init() -> Option<EffectArgs> {
        let mut args = std::env::args();
        let cmd_name = args.next()?;
        let args: Vec<String> = args.collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        EffectArgs::from_args(&[&cmd_name], &args).ok()
    }

    pub fn get() -> &'static EffectArgs {
        static INSTANCE: LazyLock<EffectArgs> =
            LazyLock::new(|| EffectArgs::init().unwrap_or_default());
        &INSTANCE
    }

    pub fn execution_backend(&self) -> ExecutionBackend {
        self.backend.flatten().unwrap_or_default()
    }

    pub fn frame_count(&self) -> u32 {
        self.frames.unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_and_intensity() {
        let args = EffectArgs::from_args(
            &["negative"],
            &["--backend", "gpu", "--intensity", "0.25", "--frames", "3"],
        )
        .unwrap();

        assert_eq!(args.execution_backend(), ExecutionBackend::Gpu);
        assert_eq!(args.intensity, Some(0.25));
        assert_eq!(args.frame_count(), 3);
        assert!(!args.no_effect);
    }

    #[test]
    fn unknown_backend_falls_back_to_software() {
        let args = EffectArgs::from_args(&["negative"], &["--backend", "quantum"]).unwrap();
        assert_eq!(args.execution_backend(), ExecutionBackend::Software);
        assert_eq!(EffectArgs::default().frame_count(), 1);
    }
}
