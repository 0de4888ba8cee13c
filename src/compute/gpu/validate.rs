//! Front-end check of generated WGSL with naga, so malformed kernels surface
//! as typed errors instead of device-side validation panics.

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::GpuError;

/// Parse and validate a WGSL module.
///
/// Parse failures map to [`GpuError::ShaderCompile`], semantic validation
/// failures to [`GpuError::ShaderLink`]; both carry the offending source.
pub fn validate_wgsl(source: &str) -> Result<naga::Module, GpuError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|error| GpuError::ShaderCompile {
        message: error.emit_to_string(source),
        wgsl: source.to_string(),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|error| GpuError::ShaderLink {
            message: error.emit_to_string(source),
            wgsl: source.to_string(),
        })?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_is_compile_error() {
        let source = "fn broken( -> i32 { return 0; }";
        match validate_wgsl(source) {
            Err(GpuError::ShaderCompile { wgsl, .. }) => assert_eq!(wgsl, source),
            other => panic!("expected ShaderCompile, got {other:?}"),
        }
    }

    #[test]
    fn test_type_error_is_rejected() {
        let source = "fn wrong() -> i32 { return 1.5; }";
        assert!(matches!(
            validate_wgsl(source),
            Err(GpuError::ShaderCompile { .. } | GpuError::ShaderLink { .. })
        ));
    }

    #[test]
    fn test_valid_module_passes() {
        validate_wgsl("fn ok() -> i32 { return 1; }").unwrap();
    }
}
