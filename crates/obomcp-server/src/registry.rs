//! Delegation registry
//!
//! Dispatches actions to registered modules with a uniform contract: access
//! precheck before invocation, panic trapping at the boundary, and exactly
//! one terminal audit entry per call no matter what the module does.

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{error, info};

use obomcp_core::audit::AuditSink;
use obomcp_core::config::ResolvedTokenExchange;
use obomcp_core::error::{ConfigError, ConfigResult};
use obomcp_core::session::UserSession;

use crate::context::CoreContext;
use crate::error::DelegationError;
use crate::module::{DelegationCtx, DelegationModule, DelegationResult};
use crate::sanitize::sanitize_error_detail;

struct RegisteredModule {
    module: Arc<dyn DelegationModule>,
    token_exchange: Option<Arc<ResolvedTokenExchange>>,
}

/// Named module map with uniform dispatch
pub struct DelegationRegistry {
    /// Registration order preserved; destroy runs in reverse
    modules: RwLock<Vec<RegisteredModule>>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for DelegationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationRegistry")
            .field("modules", &self.module_names())
            .finish()
    }
}

impl DelegationRegistry {
    /// Create an empty registry over the audit sink
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
            audit,
        }
    }

    /// Register a module. Registration is expected before serving.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateModule`] when the name is already taken.
    pub fn register(
        &self,
        module: Arc<dyn DelegationModule>,
        token_exchange: Option<Arc<ResolvedTokenExchange>>,
    ) -> ConfigResult<()> {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.module.name() == module.name()) {
            return Err(ConfigError::DuplicateModule {
                name: module.name().to_string(),
            });
        }
        info!(module = module.name(), module_type = module.module_type(), "delegation module registered");
        modules.push(RegisteredModule {
            module,
            token_exchange,
        });
        Ok(())
    }

    /// Registered module names, in registration order
    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .map(|m| m.module.name().to_string())
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<(Arc<dyn DelegationModule>, Option<Arc<ResolvedTokenExchange>>)> {
        self.modules
            .read()
            .iter()
            .find(|m| m.module.name() == name)
            .map(|m| (Arc::clone(&m.module), m.token_exchange.clone()))
    }

    /// Dispatch an action to a named module.
    ///
    /// Emits exactly one terminal audit entry: the module's own trail when
    /// it returns one, a registry default otherwise (access denied, unknown
    /// module, panic).
    pub async fn delegate(
        &self,
        name: &str,
        session: &UserSession,
        action: &str,
        params: &serde_json::Value,
        core: Arc<CoreContext>,
    ) -> DelegationResult {
        let Some((module, token_exchange)) = self.lookup(name) else {
            let result = DelegationResult::failed(
                name,
                session,
                action,
                &DelegationError::UnknownModule {
                    name: name.to_string(),
                },
                format!("no module registered under \"{name}\""),
            );
            self.audit.log(result.audit_trail.clone());
            return result;
        };

        if !module.validate_access(session) {
            let result = DelegationResult::failed(
                name,
                session,
                action,
                &DelegationError::AccessDenied,
                format!("module precheck refused role {}", session.role),
            );
            self.audit.log(result.audit_trail.clone());
            return result;
        }

        let ctx = DelegationCtx {
            session_id: session.session_id.clone(),
            core,
            token_exchange,
        };

        let invocation = std::panic::AssertUnwindSafe(module.delegate(session, action, params, &ctx))
            .catch_unwind()
            .await;

        let result = match invocation {
            Ok(result) => result,
            Err(panic) => {
                let detail = sanitize_error_detail(&panic_message(panic.as_ref()));
                error!(module = name, action, detail = %detail, "delegation module panicked");
                DelegationResult::failed(
                    name,
                    session,
                    action,
                    &DelegationError::ModuleFailure {
                        module: name.to_string(),
                        detail: detail.clone(),
                    },
                    detail,
                )
            }
        };

        self.audit.log(result.audit_trail.clone());
        result
    }

    /// Per-module liveness, in registration order
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let modules: Vec<Arc<dyn DelegationModule>> = self
            .modules
            .read()
            .iter()
            .map(|m| Arc::clone(&m.module))
            .collect();

        let mut report = Vec::with_capacity(modules.len());
        for module in modules {
            let healthy = std::panic::AssertUnwindSafe(module.health_check())
                .catch_unwind()
                .await
                .unwrap_or(false);
            report.push((module.name().to_string(), healthy));
        }
        report
    }

    /// Destroy every module in reverse registration order, collecting
    /// failures but always continuing. Idempotent: the second call sees an
    /// empty registry.
    pub async fn destroy_all(&self) -> Vec<(String, DelegationError)> {
        let drained: Vec<RegisteredModule> = {
            let mut modules = self.modules.write();
            modules.drain(..).collect()
        };

        let mut failures = Vec::new();
        for registered in drained.into_iter().rev() {
            let name = registered.module.name().to_string();
            let outcome = std::panic::AssertUnwindSafe(registered.module.destroy())
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push((name, e)),
                Err(panic) => {
                    let detail = sanitize_error_detail(&panic_message(panic.as_ref()));
                    failures.push((
                        name.clone(),
                        DelegationError::ModuleFailure {
                            module: name,
                            detail,
                        },
                    ));
                }
            }
        }
        failures
    }

}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_downcast() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom".to_string());
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(boxed.as_ref()), "module panicked");
    }
}
