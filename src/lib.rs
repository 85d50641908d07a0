//! Turn an OpenAPI 3 document into a resource-oriented command tree, then
//! project that tree into CLI commands (`app verb resource --flags`) and
//! MCP tools.
//!
//! ```no_run
//! use openbridge::{ApiSpec, SafetyPolicy, ToolCatalog, TreeBuilder};
//! use std::sync::Arc;
//!
//! let spec = ApiSpec::load("petstore.yaml")?;
//! let built = TreeBuilder::default().build(&spec)?;
//! let tools = ToolCatalog::project(Arc::new(built.tree), &SafetyPolicy::read_only());
//! for tool in tools.tools() {
//!     println!("{}", tool.name);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binding;
pub mod cache;
pub mod cli;
pub mod command_tree;
pub mod completion;
pub mod config;
pub mod conflict;
pub mod error;
pub mod http;
pub mod mcp;
pub mod naming;
pub mod resource;
pub mod safety;
pub mod spec;
pub mod verb;

pub use binding::{bind_arguments, bind_flags, Body, FlagValues, RequestParts};
pub use cache::{CacheKey, CachedBuild, SpecIdentity, TreeCache};
pub use cli::{project_tree, verb_commands, CliCommand, FlagSet, FlagSpec, OutputFormat, ValueKind};
pub use command_tree::{
    BuildOptions, BuildOutput, BuildWarning, CommandTree, OperationDescriptor, Resource,
    TreeBuilder, WarningKind,
};
pub use completion::CompletionCatalog;
pub use config::{AppConfig, Config, Profile};
pub use conflict::{ConflictStrategy, VerbSet};
pub use error::{BindError, ConfigError, EngineError, ExecError, SpecError, ToolError};
pub use http::{ExecResponse, HttpClient, RequestExecutor};
pub use mcp::{generate_tool_name, McpTool, ToolCatalog, ToolResult};
pub use resource::{ExtractResult, PathAnalysis, ResourceExtractor};
pub use safety::SafetyPolicy;
pub use spec::{ApiSpec, HttpMethod, ParamLocation};
pub use verb::{VerbMapper, VerbMapping, VerbSource};
