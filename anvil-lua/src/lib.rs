//! Anvil Lua Infrastructure
//!
//! Lua support for pipeline definitions:
//! - A restricted sandbox with the `pipeline` helper module
//! - Parsing of Lua definitions into validated pipeline specs

pub mod parser;
pub mod sandbox;

pub use parser::parse_lua_definition;
pub use sandbox::create_sandbox;
