//! # obomcp-server
//!
//! The delegation half of the obomcp engine, exposed to a hosting MCP
//! runtime:
//!
//! - `module` - the pluggable [`DelegationModule`] interface and per-call
//!   context
//! - `registry` - named module dispatch with uniform auditing, access
//!   prechecks, and panic trapping
//! - `tools` - the tool dispatch surface (visibility filtering plus
//!   execution-time enforcement, one response envelope)
//! - `sanitize` - error-string redaction for everything leaving a module
//! - `resource` - RFC 9728 metadata and `WWW-Authenticate` data for the
//!   transport
//! - `context` - [`CoreContext`], the container that owns every component
//!   and guarantees leaf-first initialization and reverse teardown
//!
//! The transport (HTTP streaming, SSE, stdio framing) lives outside this
//! crate; it consumes `authenticate`, `list_tools`, and `invoke_tool`.

pub mod context;
pub mod error;
pub mod module;
pub mod registry;
pub mod resource;
pub mod sanitize;
pub mod tools;

#[doc(inline)]
pub use context::CoreContext;
#[doc(inline)]
pub use error::DelegationError;
#[doc(inline)]
pub use module::{DelegationCtx, DelegationModule, DelegationResult};
#[doc(inline)]
pub use registry::DelegationRegistry;
#[doc(inline)]
pub use resource::{ResourceMetadata, www_authenticate};
#[doc(inline)]
pub use tools::{DelegatedTool, HEALTH_CHECK_TOOL, ToolDescriptor, ToolResponse, ToolSurface};
