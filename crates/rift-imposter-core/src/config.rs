//! Engine configuration: the imposters to load and engine-wide settings.
//!
//! ```yaml
//! proxy_timeout_ms: 5000
//! allow_injection: true
//! imposters:
//!   - port: 4545
//!     recordRequests: true
//!     stubs:
//!       - predicates:
//!           - equals: { method: GET, path: /users }
//!         responses:
//!           - is: { statusCode: 200, body: "[]" }
//! ```
//!
//! Top-level keys are snake_case; imposter definitions keep their
//! camelCase wire form so exported imposters can be pasted back in.

use crate::imposter::{ImposterDefinition, ImposterRegistry};
use crate::predicate::{Predicate, RhaiPredicateInjector};
use crate::proxy::ProxyBroker;
use crate::resolver::DEFAULT_PROXY_TIMEOUT;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn default_proxy_timeout_ms() -> u64 {
    DEFAULT_PROXY_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub imposters: Vec<ImposterDefinition>,
    /// Upper bound on a single proxied call
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,
    /// Enable Rhai `inject` predicates
    #[serde(default)]
    pub allow_injection: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            imposters: Vec::new(),
            proxy_timeout_ms: default_proxy_timeout_ms(),
            allow_injection: false,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML or JSON file and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.proxy_timeout_ms == 0 {
            anyhow::bail!("proxy_timeout_ms must be greater than zero");
        }

        let mut ports = HashSet::new();
        for imposter in &self.imposters {
            if !ports.insert(imposter.port) {
                anyhow::bail!("Duplicate imposter port {}", imposter.port);
            }
            if imposter.protocol.trim().is_empty() {
                anyhow::bail!("Imposter on port {} has an empty protocol", imposter.port);
            }
        }

        if !self.allow_injection {
            let uses_inject = self
                .imposters
                .iter()
                .flat_map(|imposter| &imposter.stubs)
                .flat_map(|stub| &stub.predicates)
                .any(uses_inject);
            if uses_inject {
                anyhow::bail!(
                    "Inject predicates found but injection is disabled. \
                     Set 'allow_injection: true' to enable them"
                );
            }
        }

        Ok(())
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    /// Registry holding every configured imposter.
    pub fn build_registry(
        &self,
        broker: Option<Arc<dyn ProxyBroker>>,
    ) -> Result<ImposterRegistry, anyhow::Error> {
        let mut registry = ImposterRegistry::new().with_proxy_timeout(self.proxy_timeout());
        if let Some(broker) = broker {
            registry = registry.with_broker(broker);
        }
        if self.allow_injection {
            registry = registry.with_injector(Arc::new(RhaiPredicateInjector::new()));
        }

        for definition in &self.imposters {
            registry
                .create(definition.clone())
                .with_context(|| format!("Failed to create imposter on port {}", definition.port))?;
        }
        Ok(registry)
    }
}

fn uses_inject(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Inject(_) => true,
        Predicate::And(children) | Predicate::Or(children) => children.iter().any(uses_inject),
        Predicate::Not(child) => uses_inject(child),
        Predicate::Leaf { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_config() {
        let file = write_config(
            r#"
proxy_timeout_ms: 2500
imposters:
  - port: 4545
    name: users
    stubs:
      - predicates:
          - deepEquals: { query: { id: "1" } }
        responses:
          - is: { statusCode: 200 }
          - proxy: { to: "http://localhost:8080", mode: proxyAlways }
  - port: 4546
"#,
        );
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.proxy_timeout(), Duration::from_millis(2500));
        assert_eq!(config.imposters.len(), 2);
        assert!(config.imposters[0].stubs[0].has_proxy());
        assert!(!config.allow_injection);

        let registry = config.build_registry(None).unwrap();
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_json_config_accepted() {
        let file = write_config(r#"{"imposters": [{"port": 5000, "protocol": "http"}]}"#);
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.proxy_timeout_ms, 30_000);
        assert_eq!(config.imposters[0].port, 5000);
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let file = write_config(
            r#"
imposters:
  - port: 4545
  - port: 4545
"#,
        );
        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate imposter port 4545"));
    }

    #[test]
    fn test_inject_requires_allow_injection() {
        let yaml = r#"
imposters:
  - port: 4545
    stubs:
      - predicates:
          - not: { inject: "request.method == \"DELETE\"" }
        responses: [{ is: { statusCode: 200 } }]
"#;
        let err = EngineConfig::from_file(write_config(yaml).path()).unwrap_err();
        assert!(err.to_string().contains("injection is disabled"));

        let allowed = format!("allow_injection: true\n{yaml}");
        let config = EngineConfig::from_file(write_config(&allowed).path()).unwrap();
        let registry = config.build_registry(None).unwrap();
        assert_eq!(registry.get(4545).unwrap().stubs().len(), 1);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = EngineConfig::from_file("/nonexistent/rift.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            proxy_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
