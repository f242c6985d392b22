//! The ordered extractor registry.
//!
//! A closed set of extractors, ordered by integer priority (lower first).
//! A failing extractor contributes an empty edge list and never aborts the
//! batch; the pipeline's error counters record the degradation.

use crate::error::Result;
use crate::lookup::ResourceLookup;

use std::sync::Arc;

use async_trait::async_trait;
use spectre_graph::schema::Edge;
use spectre_k8s_util::event::RawEvent;
use tracing::{debug, warn};

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ordering key; native extractors run in 50–99, CRD extractors at 100+.
    fn priority(&self) -> u16;

    fn matches(&self, event: &RawEvent) -> bool;

    async fn extract(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> Result<Vec<Edge>>;
}

pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// The complete built-in catalogue.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::native::owner::OwnerReferenceExtractor));
        registry.register(Arc::new(crate::native::pod::PodPlacementExtractor));
        registry.register(Arc::new(crate::native::selector::SelectorExtractor));
        registry.register(Arc::new(crate::native::selector::IngressBackendExtractor));
        registry.register(Arc::new(crate::native::selector::NetworkPolicyExtractor));
        registry.register(Arc::new(crate::crd::rbac::RbacExtractor));
        registry.register(Arc::new(crate::crd::flux::FluxSourceExtractor));
        registry.register(Arc::new(crate::crd::flux::HelmReleaseExtractor::default()));
        registry.register(Arc::new(crate::crd::argocd::ArgoApplicationExtractor));
        registry.register(Arc::new(crate::crd::gateway::GatewayExtractor));
        registry.register(Arc::new(crate::crd::certmanager::CertificateExtractor));
        registry.register(Arc::new(crate::crd::externalsecrets::ExternalSecretExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let at = self
            .extractors
            .partition_point(|e| e.priority() <= extractor.priority());
        self.extractors.insert(at, extractor);
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Run every matching extractor in priority order, swallowing
    /// per-extractor failures. Returns the edges and the number of
    /// extractor errors encountered.
    pub async fn extract_all(
        &self,
        event: &RawEvent,
        lookup: &dyn ResourceLookup,
    ) -> (Vec<Edge>, u64) {
        let mut edges = Vec::new();
        let mut errors = 0;
        for extractor in &self.extractors {
            if !extractor.matches(event) {
                continue;
            }
            match extractor.extract(event, lookup).await {
                Ok(mut found) => {
                    if !found.is_empty() {
                        debug!(
                            msg = "extracted relationships",
                            extractor = extractor.name(),
                            uid = %event.resource.uid,
                            count = found.len()
                        );
                    }
                    edges.append(&mut found);
                }
                Err(error) => {
                    errors += 1;
                    warn!(
                        msg = "extractor failed, continuing batch",
                        extractor = extractor.name(),
                        uid = %event.resource.uid,
                        %error
                    );
                }
            }
        }
        (edges, errors)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{event_for, MockLookup};

    struct Fails;

    #[async_trait]
    impl Extractor for Fails {
        fn name(&self) -> &'static str {
            "fails"
        }

        fn priority(&self) -> u16 {
            10
        }

        fn matches(&self, _event: &RawEvent) -> bool {
            true
        }

        async fn extract(
            &self,
            _event: &RawEvent,
            _lookup: &dyn ResourceLookup,
        ) -> Result<Vec<Edge>> {
            Err(crate::Error::SerializationError(
                "broken".into(),
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ))
        }
    }

    #[test]
    fn registry_orders_by_priority() {
        let registry = ExtractorRegistry::with_defaults();
        let priorities: Vec<u16> = registry.extractors.iter().map(|e| e.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
        assert!(priorities.first().unwrap() >= &50);
        assert!(priorities.last().unwrap() >= &100);
    }

    #[tokio::test]
    async fn failing_extractor_does_not_abort() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(Fails));
        let lookup = MockLookup::default();
        let event = event_for("Pod", "default", "web-0", "u1", serde_json::json!({}));
        let (edges, errors) = registry.extract_all(&event, &lookup).await;
        assert!(edges.is_empty());
        assert_eq!(errors, 1);
    }
}
