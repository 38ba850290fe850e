use std::fs;
use std::path::Path;

fn validate_wgsl_shader(shader_path_str: &str) {
    let shader_path = Path::new(shader_path_str);
    let shader_source = match fs::read_to_string(shader_path) {
        Ok(s) => s,
        Err(e) => panic!("Failed to read shader file {shader_path:?}: {e}"),
    };

    let module = match naga::front::wgsl::parse_str(&shader_source) {
        Ok(m) => m,
        Err(e) => {
            panic!(
                "WGSL parsing error in {shader_path:?}:\n{error_report}",
                error_report = e.emit_to_string(&shader_source)
            );
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );

    if let Err(e) = validator.validate(&module) {
        panic!(
            "WGSL validation error in {shader_path:?}:\n{error_report}",
            error_report = e.emit_to_string(&shader_source)
        );
    }
}

#[test]
fn binary_shaders_compile() {
    for op in ["add", "sub", "mul", "div", "max", "min"] {
        validate_wgsl_shader(&format!("../../shaders/{op}.wgsl"));
    }
}
