//! CoreContext wiring
//!
//! The dependency-injection container that owns every long-lived component.
//! Construction is leaf-first (audit, then validator and authentication
//! service, then cache and exchange, then registry and tools); teardown
//! reverses the order: modules are destroyed first, the cache root key is
//! zeroized last. Both `initialize` and `destroy` are idempotent.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use obomcp_auth::exchange::TokenExchangeService;
use obomcp_auth::jwks::JwksStore;
use obomcp_auth::service::{AuthenticationService, PreflightReport};
use obomcp_auth::token_cache::EncryptedTokenCache;
use obomcp_auth::validator::JwtValidator;
use obomcp_core::audit::{AuditEntry, AuditSink, AuditSource, OverflowCallback, audit_sink_from_config};
use obomcp_core::config::{CachePolicy, EngineConfig};
use obomcp_core::error::{ConfigError, ConfigResult};
use obomcp_core::secrets::SecretResolver;
use obomcp_core::session::{AuthDecision, UserSession};

use crate::error::DelegationError;
use crate::module::{DelegationModule, DelegationResult};
use crate::registry::DelegationRegistry;
use crate::resource::ResourceMetadata;
use crate::tools::{DelegatedTool, ToolDescriptor, ToolResponse, ToolSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Built,
    Initialized,
    Destroyed,
}

/// The engine's component container
///
/// # Example
///
/// ```rust,ignore
/// use obomcp_core::{EngineConfig, SecretResolver};
/// use obomcp_server::{CoreContext, DelegatedTool};
///
/// let config: EngineConfig = serde_json::from_str(&document)?;
/// let ctx = CoreContext::build(config, SecretResolver::new(None))?;
///
/// ctx.register_module(Arc::new(SqlModule::new())).await?;
/// ctx.register_tool(DelegatedTool::delegated("db-query", "db", "query"))?;
/// ctx.initialize().await;
///
/// // Per request:
/// let decision = ctx.authenticate(bearer, None).await?;
/// if let AuthDecision::Authenticated { session } = decision {
///     let response = ctx.invoke_tool(&session, "db-query", &args).await;
/// }
///
/// // At shutdown:
/// ctx.destroy().await;
/// ```
pub struct CoreContext {
    config: EngineConfig,
    resolver: SecretResolver,
    audit: Arc<dyn AuditSink>,
    auth: Arc<AuthenticationService>,
    cache: Arc<EncryptedTokenCache>,
    exchange: Arc<TokenExchangeService>,
    registry: DelegationRegistry,
    tools: ToolSurface,
    phase: Mutex<Phase>,
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("phase", &*self.phase.lock())
            .field("modules", &self.registry.module_names())
            .finish()
    }
}

impl CoreContext {
    /// Build the container from a validated configuration document.
    ///
    /// Validates the document, fails fast on unresolvable secrets, then
    /// constructs components leaf-first. The built-in `health-check` tool is
    /// registered here.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; the process must not begin serving on failure.
    pub fn build(config: EngineConfig, resolver: SecretResolver) -> ConfigResult<Arc<Self>> {
        Self::build_with_overflow(config, resolver, None)
    }

    /// [`CoreContext::build`] with an audit overflow callback that forwards
    /// evicted entries to an external sink.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; the process must not begin serving on failure.
    pub fn build_with_overflow(
        config: EngineConfig,
        resolver: SecretResolver,
        overflow: Option<OverflowCallback>,
    ) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        config.resolve_secrets(&resolver)?;

        let audit = audit_sink_from_config(&config.auth.audit, overflow);

        let validator = Arc::new(JwtValidator::new(
            config.auth.trusted_idps.clone(),
            JwksStore::new(),
        ));
        let auth = Arc::new(AuthenticationService::new(validator, Arc::clone(&audit)));

        let cache = Arc::new(EncryptedTokenCache::new(
            cache_policy(&config),
            Arc::clone(&audit),
        ));
        let exchange = Arc::new(TokenExchangeService::new(
            Arc::clone(&cache),
            Arc::clone(&audit),
        ));

        let registry = DelegationRegistry::new(Arc::clone(&audit));
        let tools = ToolSurface::new();
        tools.register(DelegatedTool::health_check())?;

        Ok(Arc::new(Self {
            config,
            resolver,
            audit,
            auth,
            cache,
            exchange,
            registry,
            tools,
            phase: Mutex::new(Phase::Built),
        }))
    }

    /// Register a delegation module declared in `delegation.modules`.
    ///
    /// Resolves the module's token-exchange secret, runs its `initialize`,
    /// and adds it to the registry. Expected before serving.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the module has no configuration entry, its
    /// secret cannot be resolved, its `initialize` fails, or its name is
    /// already registered.
    pub async fn register_module(&self, module: Arc<dyn DelegationModule>) -> ConfigResult<()> {
        let name = module.name().to_string();
        let module_config = self
            .config
            .delegation
            .modules
            .get(&name)
            .ok_or_else(|| {
                ConfigError::invalid_field(
                    format!("delegation.modules.{name}"),
                    "module is not configured",
                )
            })?
            .clone();

        let token_exchange = module_config
            .token_exchange
            .as_ref()
            .map(|exchange| exchange.resolve(&self.resolver))
            .transpose()?
            .map(Arc::new);

        module.initialize(&module_config).await.map_err(|e| {
            ConfigError::invalid_field(
                format!("delegation.modules.{name}"),
                format!("initialize failed: {e}"),
            )
        })?;

        self.registry.register(module, token_exchange)
    }

    /// Register a tool on the dispatch surface. Expected before serving.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateTool`] when the name is taken.
    pub fn register_tool(&self, tool: DelegatedTool) -> ConfigResult<()> {
        self.tools.register(tool)
    }

    /// Initialize the engine: JWKS preflight for every configured IdP.
    ///
    /// Unreachable endpoints are warnings, never fatal. Idempotent.
    pub async fn initialize(&self) -> PreflightReport {
        let report = self.auth.initialize().await;
        if !report.all_reachable() {
            warn!(
                unreachable = report.unreachable.len(),
                "some IdP JWKS endpoints were unreachable at startup"
            );
        }
        let mut phase = self.phase.lock();
        if *phase == Phase::Built {
            *phase = Phase::Initialized;
        }
        info!(modules = ?self.registry.module_names(), "engine initialized");
        report
    }

    /// Authenticate a bearer token (see
    /// [`AuthenticationService::authenticate`]).
    ///
    /// # Errors
    ///
    /// Validation failures as [`obomcp_auth::error::AuthError`].
    pub async fn authenticate(
        &self,
        token: &str,
        idp_name: Option<&str>,
    ) -> Result<AuthDecision, obomcp_auth::error::AuthError> {
        self.auth.authenticate(token, idp_name).await
    }

    /// Dispatch a delegated action through the registry.
    pub async fn delegate(
        self: &Arc<Self>,
        module: &str,
        session: &UserSession,
        action: &str,
        params: &serde_json::Value,
    ) -> DelegationResult {
        self.registry
            .delegate(module, session, action, params, Arc::clone(self))
            .await
    }

    /// Tools visible to a session
    pub fn list_tools(&self, session: &UserSession) -> Vec<ToolDescriptor> {
        self.tools.list_tools(session)
    }

    /// Invoke a tool for a session
    pub async fn invoke_tool(
        self: &Arc<Self>,
        session: &UserSession,
        name: &str,
        args: &serde_json::Value,
    ) -> ToolResponse {
        self.tools.invoke(self, session, name, args).await
    }

    /// Wipe cached tokens for a finished session
    pub fn end_session(&self, session_id: &str) {
        self.cache.end_session(session_id);
    }

    /// Tear the engine down: modules in reverse registration order, then
    /// token-cache root-key zeroization. Idempotent; collected module
    /// failures are returned, teardown always completes.
    pub async fn destroy(&self) -> Vec<(String, DelegationError)> {
        {
            let mut phase = self.phase.lock();
            if *phase == Phase::Destroyed {
                return Vec::new();
            }
            *phase = Phase::Destroyed;
        }

        let failures = self.registry.destroy_all().await;
        self.cache.shutdown();
        self.audit
            .log(AuditEntry::success(AuditSource::Service, "destroy"));
        info!(failed_modules = failures.len(), "engine destroyed");
        failures
    }

    /// RFC 9728 metadata for the transport's well-known endpoint
    pub fn resource_metadata(&self, resource: impl Into<String>) -> ResourceMetadata {
        ResourceMetadata::from_config(resource, &self.config)
    }

    /// The configuration this context was built from
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The audit sink
    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// The authentication service
    pub fn auth(&self) -> &Arc<AuthenticationService> {
        &self.auth
    }

    /// The token-exchange service
    pub fn token_exchange(&self) -> &Arc<TokenExchangeService> {
        &self.exchange
    }

    /// The encrypted token cache
    pub fn token_cache(&self) -> &Arc<EncryptedTokenCache> {
        &self.cache
    }

    /// The delegation registry
    pub fn registry(&self) -> &DelegationRegistry {
        &self.registry
    }
}

/// The cache policy in force: the first token-exchange block that declares
/// one (modules in name order, then IdPs in config order), defaults
/// otherwise.
fn cache_policy(config: &EngineConfig) -> CachePolicy {
    config
        .delegation
        .modules
        .values()
        .filter_map(|m| m.token_exchange.as_ref())
        .chain(
            config
                .auth
                .trusted_idps
                .iter()
                .filter_map(|idp| idp.token_exchange.as_ref()),
        )
        .map(|exchange| exchange.cache.clone())
        .next()
        .unwrap_or_default()
}
