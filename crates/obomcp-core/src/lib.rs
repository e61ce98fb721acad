//! # obomcp-core
//!
//! Foundation types for the obomcp on-behalf-of delegation engine.
//!
//! This crate carries everything the higher layers share:
//!
//! - `validation` - primitive input sanitizers (identifiers, HTTPS URLs,
//!   signing algorithms)
//! - `audit` - the audit subsystem every component writes to (bounded ring
//!   service, null-object service, filter surface)
//! - `secrets` - `{"$secret": "NAME"}` descriptors and the file-store /
//!   environment resolver chain
//! - `config` - the engine configuration document (trusted IdPs, audit
//!   policy, delegation modules) with init-time validation
//! - `session` - per-request value types (`UserSession`, `AuthDecision`,
//!   framework roles)

pub mod audit;
pub mod config;
pub mod error;
pub mod secrets;
pub mod session;
pub mod validation;

#[doc(inline)]
pub use audit::{
    AuditConfig, AuditEntry, AuditFilter, AuditSink, AuditSource, NullAuditService,
    RingAuditService, audit_sink_from_config,
};
#[doc(inline)]
pub use config::{
    AuthSection, CachePolicy, ClaimMappings, DelegationConfig, EngineConfig, ModuleConfig,
    REQUESTOR_IDP, ResolvedTokenExchange, RoleMappings, SigningAlgorithm, TokenExchangeConfig,
    TrustedIdp,
};
#[doc(inline)]
pub use error::{ConfigError, ConfigResult};
#[doc(inline)]
pub use secrets::{SecretResolver, SecretValue};
#[doc(inline)]
pub use session::{AuthDecision, FrameworkRole, SUBJECT_TOKEN_CLAIM, UserSession};
