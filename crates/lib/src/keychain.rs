//! Registry credentials and the strategies that produce them.
//!
//! A [`Keychain`] maps a target (an optional named secret plus a registry
//! host) to [`Credentials`]. Strategies are combined with [`MultiKeychain`],
//! which asks each member in order and returns the first match.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Credentials presented to a registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub username: Option<String>,
  pub password: Option<String>,
  pub token: Option<String>,
}

impl Credentials {
  pub fn anonymous() -> Self {
    Self::default()
  }

  pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      username: Some(username.into()),
      password: Some(password.into()),
      token: None,
    }
  }

  pub fn bearer(token: impl Into<String>) -> Self {
    Self {
      username: None,
      password: None,
      token: Some(token.into()),
    }
  }

  pub fn is_anonymous(&self) -> bool {
    self.username.is_none() && self.password.is_none() && self.token.is_none()
  }
}

// Never print secrets.
impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &self.password.as_ref().map(|_| "***"))
      .field("token", &self.token.as_ref().map(|_| "***"))
      .finish()
  }
}

/// A named secret, optionally scoped to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
  pub name: String,
  pub namespace: Option<String>,
}

impl SecretRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      namespace: None,
    }
  }

  pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      namespace: Some(namespace.into()),
    }
  }
}

impl fmt::Display for SecretRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.namespace {
      Some(namespace) => write!(f, "{}/{}", namespace, self.name),
      None => write!(f, "{}", self.name),
    }
  }
}

/// What credentials are being requested for.
#[derive(Debug, Clone, Copy)]
pub struct CredentialTarget<'a> {
  pub secret: Option<&'a SecretRef>,
  pub registry: &'a str,
}

impl<'a> CredentialTarget<'a> {
  pub fn new(secret: Option<&'a SecretRef>, registry: &'a str) -> Self {
    Self { secret, registry }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeychainError {
  #[error("no keychain matched registry '{registry}'")]
  NoMatch { registry: String },

  #[error("secret not found: {name}")]
  SecretNotFound { name: String },
}

/// A credential lookup strategy.
pub trait Keychain: Send + Sync {
  /// `Ok(None)` means this strategy does not apply to the target.
  fn resolve(&self, target: CredentialTarget<'_>) -> Result<Option<Credentials>, KeychainError>;

  fn credentials(&self, target: CredentialTarget<'_>) -> Result<Credentials, KeychainError> {
    self.resolve(target)?.ok_or_else(|| KeychainError::NoMatch {
      registry: target.registry.to_string(),
    })
  }
}

/// Credentials stored in named secrets.
///
/// Applies only when the target names a secret; a named secret that is not
/// stored is an error rather than a fall-through.
#[derive(Debug, Default)]
pub struct SecretKeychain {
  secrets: BTreeMap<SecretRef, Credentials>,
}

impl SecretKeychain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_secret(mut self, secret: SecretRef, credentials: Credentials) -> Self {
    self.secrets.insert(secret, credentials);
    self
  }
}

impl Keychain for SecretKeychain {
  fn resolve(&self, target: CredentialTarget<'_>) -> Result<Option<Credentials>, KeychainError> {
    let Some(secret) = target.secret else {
      return Ok(None);
    };
    match self.secrets.get(secret) {
      Some(credentials) => {
        debug!(secret = %secret, registry = target.registry, "using secret credentials");
        Ok(Some(credentials.clone()))
      }
      None => Err(KeychainError::SecretNotFound {
        name: secret.to_string(),
      }),
    }
  }
}

/// Credentials keyed by registry host.
#[derive(Debug, Default)]
pub struct RegistryKeychain {
  hosts: BTreeMap<String, Credentials>,
}

impl RegistryKeychain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_host(mut self, host: impl Into<String>, credentials: Credentials) -> Self {
    self.hosts.insert(host.into(), credentials);
    self
  }
}

impl Keychain for RegistryKeychain {
  fn resolve(&self, target: CredentialTarget<'_>) -> Result<Option<Credentials>, KeychainError> {
    Ok(self.hosts.get(target.registry).cloned())
  }
}

/// Always matches, with anonymous credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousKeychain;

impl Keychain for AnonymousKeychain {
  fn resolve(&self, _target: CredentialTarget<'_>) -> Result<Option<Credentials>, KeychainError> {
    Ok(Some(Credentials::anonymous()))
  }
}

/// Ordered list of strategies; the first match wins.
#[derive(Default)]
pub struct MultiKeychain {
  keychains: Vec<Box<dyn Keychain>>,
}

impl MultiKeychain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, keychain: impl Keychain + 'static) -> Self {
    self.keychains.push(Box::new(keychain));
    self
  }
}

impl Keychain for MultiKeychain {
  fn resolve(&self, target: CredentialTarget<'_>) -> Result<Option<Credentials>, KeychainError> {
    for keychain in &self.keychains {
      if let Some(credentials) = keychain.resolve(target)? {
        return Ok(Some(credentials));
      }
    }
    Ok(None)
  }
}
