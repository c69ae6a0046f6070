use std::collections::HashMap;

use twin_core::{TwinError, TwinResult};

use crate::component::{ComponentHandle, ComponentVariant};

/// Registry of the host's components. Names are unique per variant;
/// two variants may share a name (a collector `weather` can feed a
/// harvester `weather`).
#[derive(Default)]
pub struct ComponentRegistry {
    components: Vec<ComponentHandle>,
    index: HashMap<(ComponentVariant, String), usize>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: ComponentHandle) -> TwinResult<()> {
        let key = (component.variant(), component.name().to_string());
        if self.index.contains_key(&key) {
            return Err(TwinError::configuration(format!(
                "duplicate component: {} {:?}",
                key.0.as_str(),
                key.1
            ))
            .into_anyhow());
        }
        self.index.insert(key, self.components.len());
        self.components.push(component);
        Ok(())
    }

    pub fn get(&self, variant: ComponentVariant, name: &str) -> Option<&ComponentHandle> {
        self.index
            .get(&(variant, name.to_string()))
            .map(|&i| &self.components[i])
    }

    pub fn all(&self) -> &[ComponentHandle] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn collectors(&self) -> impl Iterator<Item = &ComponentHandle> {
        self.components
            .iter()
            .filter(|c| c.variant() == ComponentVariant::Collector)
    }

    pub fn harvesters(&self) -> impl Iterator<Item = &ComponentHandle> {
        self.components
            .iter()
            .filter(|c| c.variant() == ComponentVariant::Harvester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComponentConfig, HarvesterConfig};
    use crate::component::{Collector, Harvester, SourceData, DepsData, DataFetcher, HarvestOutput};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;
    use twin_core::TwinResult;

    struct FakeCollector(ComponentConfig);

    #[async_trait]
    impl Collector for FakeCollector {
        fn configuration(&self) -> &ComponentConfig {
            &self.0
        }
        fn cron_pattern(&self) -> &str {
            "*/5 * * * *"
        }
        async fn collect(&self) -> TwinResult<Bytes> {
            Ok(Bytes::from_static(b"{}"))
        }
    }

    struct FakeHarvester(ComponentConfig, HarvesterConfig);

    #[async_trait]
    impl Harvester for FakeHarvester {
        fn configuration(&self) -> &ComponentConfig {
            &self.0
        }
        fn harvester_config(&self) -> &HarvesterConfig {
            &self.1
        }
        async fn harvest(
            &self,
            _source: &SourceData,
            _deps: &DepsData,
            _fetcher: &DataFetcher,
        ) -> TwinResult<HarvestOutput> {
            Ok(HarvestOutput::One(Bytes::new()))
        }
    }

    #[test]
    fn names_are_unique_per_variant_not_globally() {
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentHandle::Collector(Arc::new(FakeCollector(
                ComponentConfig::new("weather", "application/json"),
            ))))
            .unwrap();

        // Same name under a different variant is fine.
        registry
            .register(ComponentHandle::Harvester(Arc::new(FakeHarvester(
                ComponentConfig::new("weather", "application/json"),
                HarvesterConfig::default().with_source("weather"),
            ))))
            .unwrap();

        // Same name under the same variant is rejected.
        let err = registry
            .register(ComponentHandle::Collector(Arc::new(FakeCollector(
                ComponentConfig::new("weather", "application/json"),
            ))))
            .unwrap_err();
        let twin = TwinError::from_anyhow(&err).unwrap();
        assert_eq!(twin.kind, twin_core::ErrorKind::Configuration);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.collectors().count(), 1);
        assert_eq!(registry.harvesters().count(), 1);
    }
}
