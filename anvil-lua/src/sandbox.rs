//! Lua sandbox creation
//!
//! Pipeline definitions are Lua scripts that return a table. They are
//! evaluated in a restricted sandbox that prevents filesystem I/O, process
//! execution and loading external code. Only the returned table is used.
//!
//! The `pipeline` helper module is always injected so definitions can use
//! `pipeline.define`, `pipeline.stage`, `pipeline.agent` or the fluent
//! `pipeline.builder()`.

use mlua::{HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, Table, VmState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Instructions executed between two budget checks
const HOOK_INTERVAL: u32 = 1000;

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Example
/// ```no_run
/// use anvil_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let pipeline: mlua::Table = lua
///     .load(r#"return pipeline.define({ agent = pipeline.agent("alpine") })"#)
///     .eval()?;
/// let agent: mlua::Table = pipeline.get("agent")?;
/// let image: String = agent.get("image")?;
/// assert_eq!(image, "alpine");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG, COROUTINE
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    // Remove dangerous globals
    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Aborts evaluation once roughly `budget` VM instructions have run
///
/// A definition that loops forever fails with a runtime error instead of
/// hanging the caller.
pub fn limit_instructions(lua: &Lua, budget: u64) -> LuaResult<()> {
    let executed = Arc::new(AtomicU64::new(0));

    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_, _| {
            let total = executed.fetch_add(u64::from(HOOK_INTERVAL), Ordering::Relaxed)
                + u64::from(HOOK_INTERVAL);
            if total > budget {
                return Err(mlua::Error::runtime(format!(
                    "definition exceeded its instruction budget of {}",
                    budget
                )));
            }
            Ok(VmState::Continue)
        },
    )
}

/// Register the pipeline helper module
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    // pipeline.define(definition) - returns the definition table as-is
    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", define_fn)?;

    // pipeline.stage(name, steps) - returns { name = name, steps = steps }
    let stage_fn = lua.create_function(|lua, (name, steps): (String, Table)| {
        let stage = lua.create_table()?;
        stage.set("name", name)?;
        stage.set("steps", steps)?;
        Ok(stage)
    })?;
    pipeline.set("stage", stage_fn)?;

    // pipeline.agent(image, args?) - returns { image = image, args = args }
    let agent_fn = lua.create_function(|lua, (image, args): (String, Option<Table>)| {
        let agent = lua.create_table()?;
        agent.set("image", image)?;
        if let Some(args) = args {
            agent.set("args", args)?;
        }
        Ok(agent)
    })?;
    pipeline.set("agent", agent_fn)?;

    let builder_fn = lua.create_function(|lua, ()| create_pipeline_builder(lua))?;
    pipeline.set("builder", builder_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}

/// Create a pipeline builder instance with fluent API methods
///
/// ```lua
/// return pipeline.builder()
///     :name("hoard")
///     :agent("rust:latest", { "-v /tmp:/tmp" })
///     :option("disableConcurrentBuilds", true)
///     :stage("Build", { "cargo build --release" })
///     :post({ trigger = "always", artifacts = "target/release/hoard" })
///     :build()
/// ```
fn create_pipeline_builder(lua: &Lua) -> LuaResult<Table> {
    let builder = lua.create_table()?;
    let metatable = lua.create_table()?;

    let name_fn = lua.create_function(|_, (builder, name): (Table, String)| {
        builder.set("_name", name)?;
        Ok(builder)
    })?;
    metatable.set("name", name_fn)?;

    let agent_fn = lua.create_function(
        |lua, (builder, image, args): (Table, String, Option<Table>)| {
            let agent = lua.create_table()?;
            agent.set("image", image)?;
            if let Some(args) = args {
                agent.set("args", args)?;
            }
            builder.set("_agent", agent)?;
            Ok(builder)
        },
    )?;
    metatable.set("agent", agent_fn)?;

    let option_fn = lua.create_function(
        |lua, (builder, key, value): (Table, String, mlua::Value)| {
            let options = child_table(lua, &builder, "_options")?;
            options.set(key, value)?;
            Ok(builder)
        },
    )?;
    metatable.set("option", option_fn)?;

    let stage_fn = lua.create_function(
        |lua, (builder, name, steps): (Table, String, Table)| {
            let stages = child_table(lua, &builder, "_stages")?;
            let stage = lua.create_table()?;
            stage.set("name", name)?;
            stage.set("steps", steps)?;
            let len = stages.raw_len() + 1;
            stages.set(len, stage)?;
            Ok(builder)
        },
    )?;
    metatable.set("stage", stage_fn)?;

    let post_fn = lua.create_function(|_, (builder, post): (Table, Table)| {
        builder.set("_post", post)?;
        Ok(builder)
    })?;
    metatable.set("post", post_fn)?;

    // build() converts builder to pipeline definition table
    let build_fn = lua.create_function(|lua, builder: Table| {
        let definition = lua.create_table()?;

        for (field, key) in [
            ("_name", "name"),
            ("_agent", "agent"),
            ("_options", "options"),
            ("_stages", "stages"),
            ("_post", "post"),
        ] {
            let value: mlua::Value = builder.get(field)?;
            if !value.is_nil() {
                definition.set(key, value)?;
            }
        }

        Ok(definition)
    })?;
    metatable.set("build", build_fn)?;

    // Set __index to the metatable itself so methods are accessible
    metatable.set("__index", metatable.clone())?;
    builder.set_metatable(Some(metatable))?;

    Ok(builder)
}

/// Gets `builder[field]`, creating an empty table on first use
fn child_table(lua: &Lua, builder: &Table, field: &str) -> LuaResult<Table> {
    match builder.get::<Option<Table>>(field)? {
        Some(table) => Ok(table),
        None => {
            let table = lua.create_table()?;
            builder.set(field, table.clone())?;
            Ok(table)
        }
    }
}
