//! Port-keyed registry of live imposters.

use super::core::Imposter;
use super::types::{ExportOptions, ImposterDefinition, ImposterError};
use crate::predicate::PredicateInjector;
use crate::proxy::ProxyBroker;
use crate::resolver::DEFAULT_PROXY_TIMEOUT;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns every imposter and the capabilities handed to new ones.
pub struct ImposterRegistry {
    imposters: RwLock<HashMap<u16, Arc<Imposter>>>,
    broker: Option<Arc<dyn ProxyBroker>>,
    injector: Option<Arc<dyn PredicateInjector>>,
    proxy_timeout: Duration,
}

impl Default for ImposterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ImposterRegistry {
    /// Registry without a proxy broker or script injection.
    pub fn new() -> Self {
        Self {
            imposters: RwLock::new(HashMap::new()),
            broker: None,
            injector: None,
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn ProxyBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_injector(mut self, injector: Arc<dyn PredicateInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    /// Create an imposter from its definition.
    pub fn create(&self, definition: ImposterDefinition) -> Result<Arc<Imposter>, ImposterError> {
        let port = definition.port;
        if self.imposters.read().contains_key(&port) {
            return Err(ImposterError::PortInUse(port));
        }

        // Compile outside the lock, then re-check on insert.
        let imposter = Arc::new(Imposter::from_definition(
            definition,
            self.broker.clone(),
            self.injector.clone(),
            self.proxy_timeout,
        )?);

        let mut imposters = self.imposters.write();
        if imposters.contains_key(&port) {
            return Err(ImposterError::PortInUse(port));
        }
        imposters.insert(port, Arc::clone(&imposter));
        Ok(imposter)
    }

    pub fn get(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        self.imposters
            .read()
            .get(&port)
            .cloned()
            .ok_or(ImposterError::NotFound(port))
    }

    /// Close and remove an imposter, returning its final definition.
    pub fn delete(&self, port: u16) -> Result<ImposterDefinition, ImposterError> {
        let imposter = self
            .imposters
            .write()
            .remove(&port)
            .ok_or(ImposterError::NotFound(port))?;
        imposter.close();
        info!(port, "imposter deleted");
        Ok(imposter.export(ExportOptions::default()))
    }

    pub fn delete_all(&self) -> Vec<ImposterDefinition> {
        let drained: Vec<Arc<Imposter>> = {
            let mut imposters = self.imposters.write();
            imposters.drain().map(|(_, imposter)| imposter).collect()
        };
        let mut definitions: Vec<ImposterDefinition> = drained
            .iter()
            .map(|imposter| {
                imposter.close();
                imposter.export(ExportOptions::default())
            })
            .collect();
        definitions.sort_by_key(|d| d.port);
        info!(count = definitions.len(), "all imposters deleted");
        definitions
    }

    /// All imposters, ordered by port.
    pub fn list(&self) -> Vec<Arc<Imposter>> {
        let mut imposters: Vec<Arc<Imposter>> = self.imposters.read().values().cloned().collect();
        imposters.sort_by_key(|i| i.port());
        imposters
    }

    pub fn count(&self) -> usize {
        self.imposters.read().len()
    }
}
