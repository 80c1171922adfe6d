//! Pipeline definition files
//!
//! Picks the parser by file extension (`.lua` or `.json`) and uses the
//! file stem as the pipeline name when the definition has none.

use anvil_core::domain::pipeline::PipelineSpec;
use anvil_core::{LoadError, parse_json_definition};
use anvil_lua::parse_lua_definition;
use std::path::Path;
use tracing::debug;

/// Definition formats, keyed by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Lua,
    Json,
}

impl DefinitionFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "lua" => Some(DefinitionFormat::Lua),
            "json" => Some(DefinitionFormat::Json),
            _ => None,
        }
    }
}

/// Loads and validates a pipeline definition file
pub fn load_pipeline_file(path: &Path) -> Result<PipelineSpec, LoadError> {
    let unreadable = |message: String| LoadError::Unreadable {
        path: path.display().to_string(),
        message,
    };

    let format = DefinitionFormat::from_path(path)
        .ok_or_else(|| unreadable("unsupported file extension, expected .lua or .json".into()))?;
    let source = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "pipeline".to_string());

    debug!("Loading {:?} definition from {}", format, path.display());

    match format {
        DefinitionFormat::Lua => parse_lua_definition(&source, &fallback_name),
        DefinitionFormat::Json => parse_json_definition(&source, &fallback_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const LUA: &str = r#"
        return pipeline.define({
            agent = pipeline.agent("rust:latest"),
            stages = { pipeline.stage("Build", { "cargo build" }) },
        })
    "#;

    #[test]
    fn test_load_lua_uses_file_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hoard.lua");
        fs::write(&path, LUA).unwrap();

        let spec = load_pipeline_file(&path).unwrap();
        assert_eq!(spec.name, "hoard");
        assert_eq!(spec.stages[0].steps, ["cargo build"]);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.JSON");
        fs::write(
            &path,
            r#"{
                "name": "hoard-release",
                "agent": { "image": "rust:latest" },
                "stages": [{ "name": "Build", "steps": ["cargo build --release"] }]
            }"#,
        )
        .unwrap();

        let spec = load_pipeline_file(&path).unwrap();
        assert_eq!(spec.name, "hoard-release");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_pipeline_file(Path::new("/nonexistent/anvil/hoard.lua")).unwrap_err();
        assert!(matches!(err, LoadError::Unreadable { .. }));
    }

    #[test]
    fn test_load_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Jenkinsfile");
        fs::write(&path, "pipeline {}").unwrap();

        let err = load_pipeline_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported file extension"));
    }
}
