//! Pipeline definition validation
//!
//! Every definition format is first turned into a JSON value and then
//! validated here into a [`PipelineSpec`]. Validation walks the document
//! by hand so unknown keys can be reported as [`LoadError::InvalidOption`]
//! while structural problems become [`LoadError::MalformedSpec`].
//!
//! Expected shape:
//! ```json
//! {
//!   "name": "hoard",
//!   "agent": { "image": "rust:latest", "args": ["-v /tmp:/tmp"] },
//!   "options": { "disableConcurrentBuilds": true, "timeout": 1800 },
//!   "stages": [ { "name": "Build", "steps": ["cargo build --release"] } ],
//!   "post": {
//!     "trigger": "success",
//!     "artifacts": "target/release/hoard",
//!     "fingerprint": true,
//!     "cleanupWorkspace": true
//!   }
//! }
//! ```

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::domain::pipeline::{
    AgentSpec, ArchiveTrigger, PipelineOptions, PipelineSpec, PostActionSpec, StageSpec,
};
use crate::error::LoadError;

const PIPELINE_KEYS: &[&str] = &["name", "agent", "options", "stages", "post"];
const AGENT_KEYS: &[&str] = &["image", "args"];
const OPTION_KEYS: &[&str] = &["disableConcurrentBuilds", "timeout"];
const STAGE_KEYS: &[&str] = &["name", "steps"];
const POST_KEYS: &[&str] = &["trigger", "artifacts", "fingerprint", "cleanupWorkspace"];

type Result<T> = std::result::Result<T, LoadError>;

/// Parses a JSON pipeline document
///
/// # Arguments
/// * `source` - JSON text
/// * `fallback_name` - Pipeline name used when the document has no `name`
pub fn parse_json_definition(source: &str, fallback_name: &str) -> Result<PipelineSpec> {
    let value: Value = serde_json::from_str(source)
        .map_err(|e| LoadError::malformed(format!("invalid JSON: {}", e)))?;
    parse_definition(&value, fallback_name)
}

/// Validates a definition document into a pipeline spec
pub fn parse_definition(value: &Value, fallback_name: &str) -> Result<PipelineSpec> {
    let pipeline = as_table(value, "pipeline definition")?;
    check_keys(pipeline, PIPELINE_KEYS, None)?;

    let name = match pipeline.get("name") {
        None | Some(Value::Null) => fallback_name.trim().to_string(),
        Some(v) => as_string(v, "name")?.trim().to_string(),
    };
    if name.is_empty() {
        return Err(LoadError::malformed("pipeline name must not be empty"));
    }

    let agent = match pipeline.get("agent") {
        None | Some(Value::Null) => {
            return Err(LoadError::malformed("pipeline must declare an 'agent'"));
        }
        Some(Value::Array(_)) => {
            return Err(LoadError::malformed(
                "pipeline must declare exactly one 'agent'",
            ));
        }
        Some(v) => parse_agent(v)?,
    };

    let options = match pipeline.get("options") {
        None | Some(Value::Null) => PipelineOptions::default(),
        Some(v) => parse_options(v)?,
    };

    let stages = parse_stages(pipeline.get("stages"))?;

    let post = match pipeline.get("post") {
        None | Some(Value::Null) => PostActionSpec::default(),
        Some(v) => parse_post(v)?,
    };

    Ok(PipelineSpec {
        name,
        agent,
        options,
        stages,
        post,
    })
}

fn parse_agent(value: &Value) -> Result<AgentSpec> {
    let agent = as_table(value, "agent")?;
    check_keys(agent, AGENT_KEYS, Some("agent"))?;

    let image = match agent.get("image") {
        Some(v) => as_string(v, "agent.image")?.trim().to_string(),
        None => return Err(LoadError::malformed("'agent' must have an 'image' field")),
    };
    if image.is_empty() {
        return Err(LoadError::malformed("'agent.image' must not be empty"));
    }

    let args = match agent.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => as_list(v, "agent.args")?
            .iter()
            .map(|arg| as_string(arg, "agent.args").map(str::to_string))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(AgentSpec { image, args })
}

fn parse_options(value: &Value) -> Result<PipelineOptions> {
    let options = as_table(value, "options")?;
    check_keys(options, OPTION_KEYS, Some("options"))?;

    let mut parsed = PipelineOptions::default();

    if let Some(v) = options.get("disableConcurrentBuilds") {
        parsed.disable_concurrent_builds = as_bool(v, "options.disableConcurrentBuilds")?;
    }

    if let Some(v) = options.get("timeout") {
        let seconds = v.as_u64().filter(|s| *s > 0).ok_or_else(|| {
            LoadError::malformed("'options.timeout' must be a positive number of seconds")
        })?;
        parsed.timeout_seconds = Some(seconds);
    }

    Ok(parsed)
}

fn parse_stages(value: Option<&Value>) -> Result<Vec<StageSpec>> {
    let entries = match value {
        None | Some(Value::Null) => {
            return Err(LoadError::malformed("pipeline must have a 'stages' field"));
        }
        Some(v) => as_list(v, "stages")?,
    };

    if entries.is_empty() {
        return Err(LoadError::malformed("pipeline must have at least one stage"));
    }

    let mut seen = HashSet::new();
    let mut stages = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.iter().enumerate() {
        let context = format!("stages[{}]", idx + 1);
        let stage = as_table(entry, &context)?;
        check_keys(stage, STAGE_KEYS, Some(&context))?;

        let name = match stage.get("name") {
            Some(v) => as_string(v, &format!("{}.name", context))?.trim().to_string(),
            None => {
                return Err(LoadError::malformed(format!(
                    "{} must have a 'name' field",
                    context
                )));
            }
        };
        if name.is_empty() {
            return Err(LoadError::malformed(format!(
                "{} name must not be empty",
                context
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(LoadError::malformed(format!(
                "duplicate stage name '{}'",
                name
            )));
        }

        let steps = match stage.get("steps") {
            Some(v) => as_list(v, &format!("stage '{}' steps", name))?
                .iter()
                .map(|step| as_string(step, &format!("stage '{}' steps", name)))
                .collect::<Result<Vec<_>>>()?,
            None => {
                return Err(LoadError::malformed(format!(
                    "stage '{}' must have a 'steps' field",
                    name
                )));
            }
        };
        if steps.is_empty() {
            return Err(LoadError::malformed(format!(
                "stage '{}' must have at least one step",
                name
            )));
        }
        if steps.iter().any(|s| s.trim().is_empty()) {
            return Err(LoadError::malformed(format!(
                "stage '{}' contains an empty step",
                name
            )));
        }

        stages.push(StageSpec {
            name,
            steps: steps.into_iter().map(str::to_string).collect(),
        });
    }

    Ok(stages)
}

fn parse_post(value: &Value) -> Result<PostActionSpec> {
    let post = as_table(value, "post")?;
    check_keys(post, POST_KEYS, Some("post"))?;

    let mut parsed = PostActionSpec::default();

    if let Some(v) = post.get("trigger") {
        let trigger = as_string(v, "post.trigger")?;
        parsed.trigger = ArchiveTrigger::parse(trigger).ok_or_else(|| {
            LoadError::invalid_option(
                "post.trigger",
                format!("unknown trigger '{}', expected 'success' or 'always'", trigger),
            )
        })?;
    }

    if let Some(v) = post.get("artifacts") {
        let pattern = as_string(v, "post.artifacts")?.trim();
        if pattern.is_empty() {
            return Err(LoadError::malformed("'post.artifacts' must not be empty"));
        }
        parsed.artifacts = Some(pattern.to_string());
    }

    if let Some(v) = post.get("fingerprint") {
        parsed.fingerprint = as_bool(v, "post.fingerprint")?;
    }

    if let Some(v) = post.get("cleanupWorkspace") {
        parsed.cleanup_workspace = as_bool(v, "post.cleanupWorkspace")?;
    }

    Ok(parsed)
}

/// Rejects any key that is not in `allowed`
fn check_keys(table: &Map<String, Value>, allowed: &[&str], section: Option<&str>) -> Result<()> {
    for key in table.keys() {
        if !allowed.contains(&key.as_str()) {
            let path = match section {
                Some(section) => format!("{}.{}", section, key),
                None => key.clone(),
            };
            return Err(LoadError::invalid_option(
                path,
                format!("unrecognized key, expected one of: {}", allowed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn as_table<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| LoadError::malformed(format!("{} must be a table", context)))
}

/// Reads a list, treating an empty table as an empty list
///
/// Lua cannot distinguish `{}` from an empty array, so both are accepted.
fn as_list<'a>(value: &'a Value, context: &str) -> Result<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items.as_slice()),
        Value::Object(map) if map.is_empty() => Ok(&[]),
        _ => Err(LoadError::malformed(format!("{} must be a list", context))),
    }
}

fn as_string<'a>(value: &'a Value, context: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| LoadError::malformed(format!("{} must be a string", context)))
}

fn as_bool(value: &Value, context: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| LoadError::malformed(format!("{} must be a boolean", context)))
}
