//! Lua pipeline definition parser
//!
//! Evaluates a Lua definition in the sandbox, converts the returned table
//! to JSON and hands it to the shared validator. Stage steps are plain
//! strings, so nothing in the definition is executable after loading.

use anvil_core::LoadError;
use anvil_core::definition::parse_definition;
use anvil_core::domain::pipeline::PipelineSpec;
use mlua::{LuaSerdeExt, Value};

use crate::sandbox::{create_sandbox, limit_instructions};

/// VM instructions a definition may execute before it is aborted
const INSTRUCTION_BUDGET: u64 = 10_000_000;

/// Parse a pipeline definition from Lua source code
///
/// # Arguments
/// * `source` - Lua source code returning the pipeline table
/// * `fallback_name` - Pipeline name used when the table has no `name`
///
/// # Errors
/// Returns [`LoadError::MalformedSpec`] if the source does not evaluate to a
/// table, runs past its instruction budget or the table is structurally
/// invalid, and
/// [`LoadError::InvalidOption`] for unrecognized keys or trigger values.
///
/// # Example
/// ```no_run
/// use anvil_lua::parser::parse_lua_definition;
///
/// let source = r#"
///     return {
///         agent = { image = "rust:latest", args = { "-v /tmp:/tmp" } },
///         options = { disableConcurrentBuilds = true },
///         stages = {
///             { name = "Build", steps = { "cargo build --release" } },
///         },
///         post = {
///             trigger = "success",
///             artifacts = "target/release/hoard",
///             fingerprint = true,
///         },
///     }
/// "#;
///
/// let spec = parse_lua_definition(source, "hoard")?;
/// assert_eq!(spec.name, "hoard");
/// assert_eq!(spec.stages.len(), 1);
/// # Ok::<(), anvil_core::LoadError>(())
/// ```
pub fn parse_lua_definition(source: &str, fallback_name: &str) -> Result<PipelineSpec, LoadError> {
    let lua = create_sandbox()
        .map_err(|e| LoadError::malformed(format!("failed to create Lua sandbox: {}", e)))?;
    limit_instructions(&lua, INSTRUCTION_BUDGET)
        .map_err(|e| LoadError::malformed(format!("failed to create Lua sandbox: {}", e)))?;

    let value: Value = lua
        .load(source)
        .set_name("pipeline")
        .eval()
        .map_err(|e| LoadError::malformed(format!("failed to evaluate definition: {}", e)))?;

    if !value.is_table() {
        return Err(LoadError::malformed(format!(
            "definition must return a table, got {}",
            value.type_name()
        )));
    }

    let document: serde_json::Value = lua
        .from_value(value)
        .map_err(|e| LoadError::malformed(format!("definition is not plain data: {}", e)))?;

    parse_definition(&document, fallback_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::domain::pipeline::ArchiveTrigger;

    #[test]
    fn test_parse_jenkins_style_definition() {
        let source = r#"
            return {
                agent = { image = "rust:latest", args = { "-v /tmp/cargo:/usr/local/cargo/registry" } },
                options = { disableConcurrentBuilds = true },
                stages = {
                    { name = "Build", steps = { "cargo build --release" } },
                },
                post = {
                    trigger = "success",
                    artifacts = "target/release/hoard",
                    fingerprint = true,
                    cleanupWorkspace = true,
                },
            }
        "#;

        let spec = parse_lua_definition(source, "hoard").unwrap();
        assert_eq!(spec.name, "hoard");
        assert_eq!(spec.agent.image, "rust:latest");
        assert_eq!(spec.agent.args.len(), 1);
        assert!(spec.options.disable_concurrent_builds);
        assert_eq!(spec.stages[0].name, "Build");
        assert_eq!(spec.post.trigger, ArchiveTrigger::OnSuccessOnly);
        assert!(spec.post.fingerprint);
        assert!(spec.post.cleanup_workspace);
    }

    #[test]
    fn test_parse_with_helpers_and_computed_values() {
        let source = r#"
            local target = "x86_64-unknown-linux-musl"
            return pipeline.define({
                name = "hoard-" .. target,
                agent = pipeline.agent("rust:alpine"),
                stages = {
                    pipeline.stage("Build", { "cargo build --release --target " .. target }),
                    pipeline.stage("Test", { "cargo test" }),
                },
                post = { artifacts = "target/" .. target .. "/release/hoard" },
            })
        "#;

        let spec = parse_lua_definition(source, "unused").unwrap();
        assert_eq!(spec.name, "hoard-x86_64-unknown-linux-musl");
        assert_eq!(
            spec.stages[0].steps[0],
            "cargo build --release --target x86_64-unknown-linux-musl"
        );
        assert_eq!(spec.post.trigger, ArchiveTrigger::Always);
    }

    #[test]
    fn test_parse_builder_definition() {
        let source = r#"
            return pipeline.builder()
                :agent("alpine")
                :stage("Build", { "echo ok" })
                :post({ trigger = "always", cleanupWorkspace = true })
                :build()
        "#;

        let spec = parse_lua_definition(source, "builder").unwrap();
        assert_eq!(spec.name, "builder");
        assert_eq!(spec.stages.len(), 1);
        assert!(spec.post.cleanup_workspace);
    }

    #[test]
    fn test_non_table_is_malformed() {
        let err = parse_lua_definition(r#"return "pipeline""#, "p").unwrap_err();
        assert!(matches!(err, LoadError::MalformedSpec(ref m) if m.contains("must return a table")));
    }

    #[test]
    fn test_syntax_error_is_malformed() {
        let err = parse_lua_definition("return {", "p").unwrap_err();
        assert!(matches!(err, LoadError::MalformedSpec(_)));
    }

    #[test]
    fn test_functions_are_rejected() {
        let source = r#"
            return {
                agent = { image = "alpine" },
                stages = { { name = "Build", steps = { "make" }, script = function() end } },
            }
        "#;
        assert!(parse_lua_definition(source, "p").is_err());
    }

    #[test]
    fn test_empty_stage_table_is_malformed() {
        let source = r#"return { agent = { image = "alpine" }, stages = {} }"#;
        let err = parse_lua_definition(source, "p").unwrap_err();
        assert!(matches!(err, LoadError::MalformedSpec(ref m) if m.contains("at least one stage")));
    }

    #[test]
    fn test_unknown_key_is_invalid_option() {
        let source = r#"
            return {
                agent = { image = "alpine", label = "linux" },
                stages = { { name = "Build", steps = { "make" } } },
            }
        "#;
        let err = parse_lua_definition(source, "p").unwrap_err();
        assert_eq!(
            err,
            LoadError::InvalidOption {
                key: "agent.label".to_string(),
                message: "unrecognized key, expected one of: image, args".to_string(),
            }
        );
    }

    #[test]
    fn test_sandbox_blocks_os_access() {
        let source = r#"
            return {
                agent = { image = os.getenv("IMAGE") },
                stages = { { name = "Build", steps = { "make" } } },
            }
        "#;
        assert!(matches!(
            parse_lua_definition(source, "p"),
            Err(LoadError::MalformedSpec(_))
        ));
    }

    #[test]
    fn test_endless_definition_is_malformed() {
        let source = r#"
            local function spin() while true do end end
            return spin()
        "#;
        let err = parse_lua_definition(source, "p").unwrap_err();
        assert!(
            matches!(&err, LoadError::MalformedSpec(message) if message.contains("instruction budget")),
            "unexpected error: {}",
            err
        );
    }
}
