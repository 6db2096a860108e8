//! Writes the HTTP API's OpenAPI document to `specs/sonar-api.json` at the
//! repository root.

use std::path::Path;

use utoipa::OpenApi;

fn main() {
    let spec = sonar_api::routes::ApiDoc::openapi()
        .to_pretty_json()
        .expect("serialize OpenAPI document");
    let out = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../specs/sonar-api.json");
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).expect("create specs directory");
    }
    std::fs::write(&out, spec).expect("write OpenAPI document");
    println!("Wrote {}", out.display());
}
