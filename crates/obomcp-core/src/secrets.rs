//! Secret descriptors and resolution
//!
//! Any string-valued configuration field may be written as
//! `{"$secret": "NAME"}`. At load time a resolver chain substitutes the
//! value: a file store directory first (one file per secret), then the
//! process environment. Resolution failure is fatal. Secret names are opaque
//! and values never reach logs or Debug output.

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::validation::validate_identifier;

/// A configured string that may be a literal or a secret reference
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    /// A `{"$secret": "NAME"}` descriptor
    Reference {
        /// Name to look up through the resolver chain
        #[serde(rename = "$secret")]
        secret: String,
    },
    /// A literal value written directly in the document
    Plain(String),
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference { secret } => f.debug_struct("SecretValue").field("secret", secret).finish(),
            Self::Plain(_) => f.write_str("SecretValue(<literal>)"),
        }
    }
}

impl SecretValue {
    /// Resolve to the actual value through the resolver chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedSecret`] when a reference cannot be
    /// satisfied, or [`ConfigError::InvalidIdentifier`] for a malformed name.
    pub fn resolve(&self, resolver: &SecretResolver) -> ConfigResult<SecretString> {
        match self {
            Self::Plain(value) => Ok(SecretString::new(value.clone())),
            Self::Reference { secret } => resolver.resolve(secret),
        }
    }
}

/// File-store-then-environment secret resolver
#[derive(Debug, Clone, Default)]
pub struct SecretResolver {
    file_store: Option<PathBuf>,
}

impl SecretResolver {
    /// Create a resolver backed by an optional file store directory.
    ///
    /// The file store holds one file per secret, named exactly after the
    /// secret; surrounding whitespace in the file is trimmed.
    pub fn new(file_store: Option<PathBuf>) -> Self {
        Self { file_store }
    }

    /// Resolve a secret by name: file store first, then environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedSecret`] when neither source has the
    /// name, or [`ConfigError::InvalidIdentifier`] for a malformed name.
    pub fn resolve(&self, name: &str) -> ConfigResult<SecretString> {
        validate_identifier(name)?;

        if let Some(dir) = &self.file_store {
            let path = dir.join(name);
            if let Ok(contents) = std::fs::read_to_string(&path) {
                return Ok(SecretString::new(contents.trim().to_string()));
            }
        }

        if let Ok(value) = std::env::var(name) {
            return Ok(SecretString::new(value));
        }

        Err(ConfigError::UnresolvedSecret {
            name: name.to_string(),
        })
    }
}
