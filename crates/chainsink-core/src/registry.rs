//! Name → constructor registry used to build sinks from configuration.

use std::collections::HashMap;

use tracing::warn;

use crate::error::SinkError;
use crate::manager::SinkManager;
use crate::sink::Sink;

/// Builds one sink from the application configuration `C`.
pub type SinkConstructor<C> =
    Box<dyn Fn(&C) -> Result<Box<dyn Sink>, SinkError> + Send + Sync>;

/// Result of resolving one configured sink name.
pub enum Resolved {
    Built(Box<dyn Sink>),
    /// Known to the configuration surface but without a driver here.
    Unsupported(String),
    /// Not known at all.
    Unknown(String),
}

/// Registry of sink constructors keyed by sink name.
pub struct SinkRegistry<C> {
    constructors: HashMap<String, SinkConstructor<C>>,
    unsupported: Vec<String>,
}

impl<C> SinkRegistry<C> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            unsupported: vec![],
        }
    }

    /// Register a constructor under `name` (case-insensitive).
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&C) -> Result<Box<dyn Sink>, SinkError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_ascii_lowercase(), Box::new(constructor));
    }

    /// Mark `name` as recognized but unsupported.
    pub fn mark_unsupported(&mut self, name: &str) {
        self.unsupported.push(name.to_ascii_lowercase());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a single name.
    pub fn resolve(&self, name: &str, config: &C) -> Result<Resolved, SinkError> {
        let key = name.trim().to_ascii_lowercase();
        if let Some(constructor) = self.constructors.get(&key) {
            return constructor(config).map(Resolved::Built);
        }
        if self.unsupported.contains(&key) {
            return Ok(Resolved::Unsupported(key));
        }
        Ok(Resolved::Unknown(key))
    }

    /// Build a manager from a list of sink names. Unsupported and unknown names
    /// are warned about and skipped; constructor errors abort.
    pub fn build_manager<S: AsRef<str>>(
        &self,
        names: &[S],
        config: &C,
    ) -> Result<SinkManager, SinkError> {
        let mut manager = SinkManager::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() {
                continue;
            }
            match self.resolve(name, config)? {
                Resolved::Built(sink) => manager.add_sink(sink),
                Resolved::Unsupported(name) => {
                    warn!(sink = %name, "sink type is not supported in this build, skipping")
                }
                Resolved::Unknown(name) => warn!(sink = %name, "unknown sink type, skipping"),
            }
        }
        Ok(manager)
    }
}

impl<C> Default for SinkRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
