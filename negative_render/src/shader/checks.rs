use naga::WithSpan;
use naga::front::wgsl::ParseError;
use naga::valid::{Capabilities, ValidationError, ValidationFlags, Validator};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum ShaderCheckError {
    #[snafu(display("WGSL parse error: {source}"))]
    Parse { source: ParseError },

    #[snafu(display("WGSL validation error: {source}"))]
    Validation {
        source: WithSpan<ValidationError>,
    },
}

impl ShaderCheckError {
    pub fn emit_to_stderr_with_path(&self, code: &str, path: &str) {
        match self {
            ShaderCheckError::Parse { source } => source.emit_to_stderr_with_path(code, path),
            ShaderCheckError::Validation { source } => {
                source.emit_to_stderr_with_path(code, path)
            }
        }
    }
}

/// Parses and validates a WGSL module the same way the device would on upload.
pub fn validate_wgsl_source(code: &str) -> Result<(), ShaderCheckError> {
    let module = naga::front::wgsl::parse_str(code).context(ParseErr)?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .context(ValidationErr)?;

    Ok(())
}
