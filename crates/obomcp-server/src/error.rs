//! Delegation-time error types
//!
//! Everything here surfaces to tool callers as a failure envelope whose
//! `message` is the generic phrase for the `code`; backend diagnostics go to
//! the audit entry only.

use obomcp_auth::error::ExchangeError;

/// Delegation dispatch failures
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DelegationError {
    /// No module is registered under the requested name
    #[error("unknown delegation module: {name}")]
    UnknownModule {
        /// The requested module name
        name: String,
    },

    /// The module's access precheck refused the session
    #[error("access denied")]
    AccessDenied,

    /// The module failed or panicked
    #[error("module \"{module}\" failed")]
    ModuleFailure {
        /// Module instance name
        module: String,
        /// Sanitized detail (audit only)
        detail: String,
    },

    /// Token exchange on behalf of the module failed
    #[error(transparent)]
    TokenExchange(#[from] ExchangeError),
}

impl DelegationError {
    /// The failure envelope code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownModule { .. } => "unknown_module",
            Self::AccessDenied => "forbidden",
            Self::ModuleFailure { .. } => "module_failure",
            Self::TokenExchange(_) => "token_exchange_failed",
        }
    }
}

/// The generic caller-visible message for a failure envelope code.
///
/// Fixed phrases only; nothing dynamic ever flows through here.
pub fn public_message(code: &str) -> &'static str {
    match code {
        "forbidden" => "access denied",
        "unknown_tool" => "unknown tool",
        "unknown_module" => "unknown delegation module",
        "token_exchange_failed" => "credential exchange failed",
        _ => "delegation failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            DelegationError::UnknownModule {
                name: "db".to_string()
            }
            .code(),
            "unknown_module"
        );
        assert_eq!(DelegationError::AccessDenied.code(), "forbidden");
        assert_eq!(
            DelegationError::ModuleFailure {
                module: "db".to_string(),
                detail: String::new()
            }
            .code(),
            "module_failure"
        );
    }

    #[test]
    fn public_messages_are_generic() {
        for code in ["forbidden", "unknown_tool", "unknown_module", "module_failure"] {
            let message = public_message(code);
            assert!(!message.is_empty());
            assert!(!message.contains('/'));
        }
    }
}
