//! Tool dispatch surface
//!
//! Wraps delegation calls as tools the hosting MCP runtime can list and
//! invoke. Authorization is two-tier: `can_access` filters tool *visibility*
//! per session (a hidden tool is absent from listings, not merely refused),
//! and the invoke path re-validates the same checks at execution time.
//!
//! Responses use one envelope shape: `{status: "success", data}` or
//! `{status: "failure", code, message}` with fixed generic messages.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use obomcp_core::audit::{AuditEntry, AuditSink as _, AuditSource};
use obomcp_core::error::{ConfigError, ConfigResult};
use obomcp_core::session::{FrameworkRole, UserSession};

use crate::context::CoreContext;
use crate::error::public_message;

/// Name of the built-in module-liveness tool
pub const HEALTH_CHECK_TOOL: &str = "health-check";

/// What the transport shows clients for one tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema for the tool arguments (opaque to the engine)
    pub input_schema: serde_json::Value,
}

/// Uniform tool response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResponse {
    /// The tool ran; `data` is the backend payload
    Success {
        /// Backend payload
        data: serde_json::Value,
    },
    /// The tool did not run or failed
    Failure {
        /// Stable failure code
        code: String,
        /// Generic message for the code; never backend detail
        message: String,
    },
}

impl ToolResponse {
    /// Success envelope
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data }
    }

    /// Failure envelope with the generic message for `code`
    pub fn failure(code: &str) -> Self {
        Self::Failure {
            code: code.to_string(),
            message: public_message(code).to_string(),
        }
    }
}

/// Extra access predicate beyond the role/scope declarations
pub type AccessPredicate = Arc<dyn Fn(&UserSession) -> bool + Send + Sync>;

enum ToolKind {
    /// Routes to `registry.delegate(module, session, action, args)`
    Delegated { module: String, action: String },
    /// Built-in module liveness report
    HealthCheck,
}

/// One tool bound to a delegation
pub struct DelegatedTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    kind: ToolKind,
    allowed_roles: Option<Vec<FrameworkRole>>,
    required_scopes: Vec<String>,
    extra_check: Option<AccessPredicate>,
}

impl std::fmt::Debug for DelegatedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedTool")
            .field("name", &self.name)
            .field("allowed_roles", &self.allowed_roles)
            .field("required_scopes", &self.required_scopes)
            .finish()
    }
}

impl DelegatedTool {
    /// A tool that routes to a delegation module action
    pub fn delegated(
        name: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            kind: ToolKind::Delegated {
                module: module.into(),
                action: action.into(),
            },
            allowed_roles: None,
            required_scopes: Vec::new(),
            extra_check: None,
        }
    }

    /// The built-in `health-check` tool
    pub fn health_check() -> Self {
        Self {
            name: HEALTH_CHECK_TOOL.to_string(),
            description: "Report liveness of every delegation module".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            kind: ToolKind::HealthCheck,
            allowed_roles: None,
            required_scopes: Vec::new(),
            extra_check: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the argument schema
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Restrict to the given framework roles
    #[must_use]
    pub fn allow_roles(mut self, roles: impl IntoIterator<Item = FrameworkRole>) -> Self {
        self.allowed_roles = Some(roles.into_iter().collect());
        self
    }

    /// Require a token scope
    #[must_use]
    pub fn require_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scopes.push(scope.into());
        self
    }

    /// Add a custom predicate on top of the declarative checks
    #[must_use]
    pub fn with_access(mut self, check: AccessPredicate) -> Self {
        self.extra_check = Some(check);
        self
    }

    /// The tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Visibility and execution predicate.
    ///
    /// Pure: decided from `role`, `custom_roles`, and `scopes` only. An
    /// Unassigned session can never see or run a tool.
    pub fn can_access(&self, session: &UserSession) -> bool {
        if !session.role.is_assigned() {
            return false;
        }
        if let Some(allowed) = &self.allowed_roles
            && !allowed.contains(&session.role)
        {
            return false;
        }
        if !self.required_scopes.iter().all(|s| session.has_scope(s)) {
            return false;
        }
        if let Some(check) = &self.extra_check
            && !check(session)
        {
            return false;
        }
        true
    }

    /// The transport-facing descriptor
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// The tool collection exposed to the transport
#[derive(Debug, Default)]
pub struct ToolSurface {
    tools: RwLock<Vec<Arc<DelegatedTool>>>,
}

impl ToolSurface {
    /// An empty surface
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Expected before serving.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateTool`] when the tool name is taken.
    pub fn register(&self, tool: DelegatedTool) -> ConfigResult<()> {
        let mut tools = self.tools.write();
        if tools.iter().any(|t| t.name == tool.name) {
            return Err(ConfigError::DuplicateTool { name: tool.name });
        }
        tools.push(Arc::new(tool));
        Ok(())
    }

    /// Tools visible to this session, in registration order
    pub fn list_tools(&self, session: &UserSession) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .iter()
            .filter(|t| t.can_access(session))
            .map(|t| t.descriptor())
            .collect()
    }

    fn find(&self, name: &str) -> Option<Arc<DelegatedTool>> {
        self.tools.read().iter().find(|t| t.name == name).cloned()
    }

    /// Invoke a tool through its handler.
    ///
    /// Re-validates access at execution time: a session that slips past
    /// visibility filtering still gets `forbidden` here, with an audit
    /// entry. Delegated calls are audited by the registry; only
    /// surface-level rejections are audited here.
    pub async fn invoke(
        &self,
        core: &Arc<CoreContext>,
        session: &UserSession,
        name: &str,
        args: &serde_json::Value,
    ) -> ToolResponse {
        let Some(tool) = self.find(name) else {
            core.audit().log(
                AuditEntry::failure(AuditSource::Service, "invoke-tool")
                    .with_user(&session.user_id)
                    .with_session(&session.session_id)
                    .with_resource(name)
                    .with_reason("unknown tool"),
            );
            return ToolResponse::failure("unknown_tool");
        };

        if !tool.can_access(session) {
            core.audit().log(
                AuditEntry::failure(AuditSource::Service, "invoke-tool")
                    .with_user(&session.user_id)
                    .with_session(&session.session_id)
                    .with_resource(name)
                    .with_reason("execution enforcement refused session"),
            );
            return ToolResponse::failure("forbidden");
        }

        match &tool.kind {
            ToolKind::HealthCheck => {
                let report = core.registry().health_report().await;
                let modules: serde_json::Map<String, serde_json::Value> = report
                    .into_iter()
                    .map(|(module, healthy)| (module, serde_json::Value::Bool(healthy)))
                    .collect();
                let all_healthy = modules.values().all(|v| v.as_bool() == Some(true));
                core.audit().log(
                    AuditEntry::success(AuditSource::Service, "invoke-tool")
                        .with_user(&session.user_id)
                        .with_session(&session.session_id)
                        .with_resource(name),
                );
                ToolResponse::success(serde_json::json!({
                    "healthy": all_healthy,
                    "modules": modules,
                }))
            }
            ToolKind::Delegated { module, action } => {
                let result = core
                    .registry()
                    .delegate(module, session, action, args, Arc::clone(core))
                    .await;
                if result.success {
                    ToolResponse::success(result.data.unwrap_or(serde_json::Value::Null))
                } else {
                    let code = result.code.as_deref().unwrap_or("module_failure");
                    ToolResponse::failure(code)
                }
            }
        }
    }
}
