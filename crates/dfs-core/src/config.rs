//! Layered property lookup and connection URI resolution.

use std::collections::HashMap;

use tracing::{debug, info};

/// Prefix shared by every backend's primary URI property.
pub const DFS_PROPERTY_PREFIX: &str = "oms.storage.dfs";

/// A source of string properties, keyed by dotted names like
/// `oms.storage.dfs.s3.uri`.
pub trait PropertySource: Send + Sync {
  /// Look up a raw property value.
  fn property(&self, key: &str) -> Option<String>;

  /// Look up a property, treating blank values as absent.
  fn non_empty_property(&self, key: &str) -> Option<String> {
    self
      .property(key)
      .map(|v| v.trim().to_owned())
      .filter(|v| !v.is_empty())
  }
}

/// Properties read from process environment variables.
///
/// Dotted keys are bound the relaxed way: `oms.storage.dfs.s3.uri` is read
/// from `OMS_STORAGE_DFS_S3_URI`.
#[derive(Debug, Clone, Default)]
pub struct EnvProperties {
  vars: HashMap<String, String>,
}

impl EnvProperties {
  /// Snapshot the current process environment.
  #[must_use]
  pub fn capture() -> Self { Self::from_vars(std::env::vars()) }

  /// Build from an explicit set of environment variables.
  pub fn from_vars<I, K, V>(vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      vars: vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    }
  }

  /// The environment variable name a dotted key binds to.
  #[must_use]
  pub fn env_key(key: &str) -> String {
    key
      .chars()
      .map(|c| match c {
        '.' | '-' => '_',
        c => c.to_ascii_uppercase(),
      })
      .collect()
  }
}

impl PropertySource for EnvProperties {
  fn property(&self, key: &str) -> Option<String> {
    self.vars.get(&Self::env_key(key)).cloned()
  }
}

/// Properties held in memory, keyed by their dotted names.
#[derive(Debug, Clone, Default)]
pub struct MapProperties {
  values: HashMap<String, String>,
}

impl MapProperties {
  /// Create an empty property map.
  #[must_use]
  pub fn new() -> Self { Self::default() }

  /// Add a property.
  #[must_use]
  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapProperties {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    Self {
      values: iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    }
  }
}

impl PropertySource for MapProperties {
  fn property(&self, key: &str) -> Option<String> {
    self.values.get(key).cloned()
  }
}

/// Several property sources queried in order; the first non-empty value
/// wins.
#[derive(Default)]
pub struct LayeredProperties {
  layers: Vec<Box<dyn PropertySource>>,
}

impl LayeredProperties {
  /// Create an empty stack of sources.
  #[must_use]
  pub fn new() -> Self { Self::default() }

  /// Add a source with lower precedence than every source already added.
  #[must_use]
  pub fn layer(mut self, source: impl PropertySource + 'static) -> Self {
    self.layers.push(Box::new(source));
    self
  }
}

impl PropertySource for LayeredProperties {
  fn property(&self, key: &str) -> Option<String> {
    self
      .layers
      .iter()
      .find_map(|layer| layer.non_empty_property(key))
  }
}

/// The primary URI property for a backend kind.
#[must_use]
pub fn primary_uri_key(kind: &str) -> String {
  format!("{DFS_PROPERTY_PREFIX}.{kind}.uri")
}

/// A connection URI and the property it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUri {
  /// The property key that supplied the value
  pub key:   String,
  /// The raw URI
  pub value: String,
}

/// Resolve a backend's connection URI: the primary key first, then the
/// legacy key. Returns `None` when neither holds a non-empty value.
pub fn resolve_uri(
  source: &dyn PropertySource,
  kind: &str,
  legacy_key: Option<&str>,
) -> Option<ResolvedUri> {
  let primary = primary_uri_key(kind);
  if let Some(value) = source.non_empty_property(&primary) {
    debug!(key = %primary, "resolved connection uri from primary key");
    return Some(ResolvedUri {
      key: primary,
      value,
    });
  }

  let legacy_key = legacy_key?;
  let value = source.non_empty_property(legacy_key)?;
  info!(
    key = legacy_key,
    preferred = %primary,
    "resolved connection uri from legacy key"
  );
  Some(ResolvedUri {
    key: legacy_key.to_owned(),
    value,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const LEGACY: &str = "oms.storage.s3.uri";

  #[test]
  fn test_env_key_binding() {
    assert_eq!(
      EnvProperties::env_key("oms.storage.dfs.s3.uri"),
      "OMS_STORAGE_DFS_S3_URI"
    );
    assert_eq!(EnvProperties::env_key("a.b-c"), "A_B_C");
  }

  #[test]
  fn test_env_properties_lookup() {
    let env = EnvProperties::from_vars([("OMS_STORAGE_DFS_FS_URI", "file:///x")]);
    assert_eq!(
      env.property("oms.storage.dfs.fs.uri").as_deref(),
      Some("file:///x")
    );
  }

  #[test]
  fn test_resolve_prefers_primary() {
    let props = MapProperties::new()
      .with("oms.storage.dfs.s3.uri", "s3://primary")
      .with(LEGACY, "s3://legacy");
    let resolved = resolve_uri(&props, "s3", Some(LEGACY)).unwrap();
    assert_eq!(resolved.value, "s3://primary");
    assert_eq!(resolved.key, "oms.storage.dfs.s3.uri");
  }

  #[test]
  fn test_resolve_falls_back_to_legacy() {
    let props = MapProperties::new()
      .with("oms.storage.dfs.s3.uri", "   ")
      .with(LEGACY, "s3://legacy");
    let resolved = resolve_uri(&props, "s3", Some(LEGACY)).unwrap();
    assert_eq!(resolved.value, "s3://legacy");
    assert_eq!(resolved.key, LEGACY);
  }

  #[test]
  fn test_resolve_absent() {
    let props = MapProperties::new().with(LEGACY, "s3://legacy");
    assert!(resolve_uri(&props, "s3", None).is_none());
    assert!(resolve_uri(&MapProperties::new(), "s3", Some(LEGACY)).is_none());
  }

  #[test]
  fn test_layered_first_non_empty_wins() {
    let layered = LayeredProperties::new()
      .layer(MapProperties::new().with("k", ""))
      .layer(MapProperties::new().with("k", "second"))
      .layer(MapProperties::new().with("k", "third"));
    assert_eq!(layered.property("k").as_deref(), Some("second"));
    assert_eq!(layered.property("missing"), None);
  }
}
