use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{
    allocator::BatchAllocator,
    config::GeneratorConfig,
    error::{ConfigError, Result},
    registry::Registry,
    store::ConnectionSource,
};

/// Collects datasources and generator configs, then resolves them into a
/// [`Registry`].
///
/// All wiring errors are reported by [`RegistryBuilder::build`], before any
/// id is handed out.
#[derive(Default)]
pub struct RegistryBuilder {
    datasources: HashMap<String, Arc<dyn ConnectionSource>>,
    generators: BTreeMap<String, GeneratorConfig>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a datasource under `name`, replacing any previous one.
    #[must_use]
    pub fn datasource(mut self, name: impl Into<String>, source: Arc<dyn ConnectionSource>) -> Self {
        self.datasources.insert(name.into(), source);
        self
    }

    /// Configures the generator for the logical name `name`, replacing any
    /// previous config.
    #[must_use]
    pub fn generator(mut self, name: impl Into<String>, config: GeneratorConfig) -> Self {
        self.generators.insert(name.into(), config);
        self
    }

    /// Validates every config, binds each owning config to its datasource
    /// and follows every `refer_to` chain to the generator that owns it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidSize`] or [`ConfigError::InvalidIdentifier`]
    ///   for a malformed config
    /// - [`ConfigError::MultipleFallbacks`] if more than one config sets
    ///   `fallback`
    /// - [`ConfigError::UnknownDatasource`] if an owning config's datasource
    ///   is not registered
    /// - [`ConfigError::UnknownReference`] or [`ConfigError::ReferenceCycle`]
    ///   for a `refer_to` chain that does not end at an owning config
    pub fn build(self) -> Result<Registry> {
        for (name, config) in &self.generators {
            config.validate(name)?;
        }

        let fallbacks: Vec<_> = self
            .generators
            .iter()
            .filter(|(_, config)| config.fallback)
            .map(|(name, _)| name.clone())
            .collect();
        if fallbacks.len() > 1 {
            return Err(ConfigError::MultipleFallbacks { names: fallbacks }.into());
        }

        let mut owners = HashMap::new();
        for (name, config) in &self.generators {
            if config.refer_to.is_none() {
                let source = self.source_for(name, config)?;
                let allocator = BatchAllocator::with_shared_source(config.clone(), source);
                owners.insert(name.as_str(), Arc::new(allocator));
            }
        }

        let mut generators = HashMap::with_capacity(self.generators.len());
        for name in self.generators.keys() {
            let owner = self.owner_of(name)?;
            generators.insert(name.clone(), Arc::clone(&owners[owner]));
        }

        let fallback = match fallbacks.first() {
            Some(name) => Some(Arc::clone(&generators[name])),
            None if generators.len() == 1 => generators.values().next().cloned(),
            None => None,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            generators = generators.len(),
            owners = owners.len(),
            fallback = fallback.is_some(),
            "built registry"
        );

        Ok(Registry::new(generators, fallback))
    }

    fn source_for(
        &self,
        name: &str,
        config: &GeneratorConfig,
    ) -> Result<Arc<dyn ConnectionSource>, ConfigError> {
        let source = match &config.datasource {
            Some(datasource) => self.datasources.get(datasource),
            None => self.datasources.get(name).or_else(|| match self.datasources.len() {
                1 => self.datasources.values().next(),
                _ => None,
            }),
        };
        source.cloned().ok_or_else(|| ConfigError::UnknownDatasource {
            name: name.to_owned(),
            datasource: config.datasource.clone().unwrap_or_else(|| name.to_owned()),
        })
    }

    /// Follows `refer_to` links from `name` to the config that owns a table.
    fn owner_of<'a>(&'a self, name: &'a str) -> Result<&'a str, ConfigError> {
        let mut chain = vec![name];
        let mut current = name;
        while let Some(target) = self.generators[current].refer_to.as_deref() {
            if !self.generators.contains_key(target) {
                return Err(ConfigError::UnknownReference {
                    name: current.to_owned(),
                    target: target.to_owned(),
                });
            }
            if chain.contains(&target) {
                chain.push(target);
                return Err(ConfigError::ReferenceCycle {
                    chain: chain.into_iter().map(str::to_owned).collect(),
                });
            }
            chain.push(target);
            current = target;
        }
        Ok(current)
    }
}
