use std::fs;
use std::path::Path;

fn main() {
    // Tell Cargo to rerun this build script if the API surface changes
    println!("cargo:rerun-if-changed=src/api.rs");
    println!("cargo:rerun-if-changed=src/services/forecast_service.rs");
    println!("cargo:rerun-if-changed=src/forecast.rs");

    // The actual OpenAPI spec is generated by the generate-openapi binary
    let openapi_path = Path::new("openapi.json");

    if !openapi_path.exists() {
        let placeholder = r#"{
  "note": "Run 'cargo run --bin generate-openapi' to generate the OpenAPI spec"
}"#;
        fs::write(openapi_path, placeholder).expect("Failed to create openapi.json placeholder");
    }
}
