//! REST mapping over a discovery document

use crate::kube::{DiscoveredResource, DiscoveryDoc};

/// Translates user-facing kind strings into discovered resources
///
/// Matching is case-insensitive over kind, plural, singular and short names.
/// Candidates keep discovery order, so the "first match" is stable for a given
/// discovery document.
pub struct RestMapper<'a> {
    discovery: &'a DiscoveryDoc,
}

impl<'a> RestMapper<'a> {
    pub fn new(discovery: &'a DiscoveryDoc) -> Self {
        Self { discovery }
    }

    /// Every resource matching `name`, in discovery order
    ///
    /// Accepts the kubectl `resource.group` form ("virtualservices.networking.istio.io").
    pub fn candidates(&self, name: &str) -> Vec<&'a DiscoveredResource> {
        let direct: Vec<_> = self
            .discovery
            .resources
            .iter()
            .filter(|r| r.matches(name))
            .collect();
        if !direct.is_empty() {
            return direct;
        }
        match name.split_once('.') {
            Some((resource, group)) => self
                .discovery
                .resources
                .iter()
                .filter(|r| r.identity.group == group && r.matches(resource))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Best match for `name`: exact `group_hint` match first, else the first candidate
    pub fn map(&self, name: &str, group_hint: &str) -> Option<&'a DiscoveredResource> {
        let candidates = self.candidates(name);
        if !group_hint.is_empty() {
            if let Some(exact) = candidates.iter().find(|r| r.identity.group == group_hint) {
                return Some(exact);
            }
        }
        candidates.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceIdentity;

    fn doc() -> DiscoveryDoc {
        let mut doc = DiscoveryDoc::builtin();
        doc.push(
            DiscoveredResource::new(ResourceIdentity::new(
                "networking.istio.io",
                "v1beta1",
                "gateways",
                "Gateway",
                true,
            ))
            .with_short_names(&["gw"]),
        );
        doc.push(DiscoveredResource::new(ResourceIdentity::new(
            "gateway.networking.k8s.io",
            "v1",
            "gateways",
            "Gateway",
            true,
        )));
        doc
    }

    #[test]
    fn test_ambiguous_kind_prefers_group_hint() {
        let doc = doc();
        let mapper = RestMapper::new(&doc);
        assert_eq!(mapper.candidates("Gateway").len(), 2);
        assert_eq!(
            mapper.map("gateway", "gateway.networking.k8s.io").unwrap().identity.group,
            "gateway.networking.k8s.io"
        );
        assert_eq!(
            mapper.map("gateway", "").unwrap().identity.group,
            "networking.istio.io"
        );
        assert_eq!(
            mapper.map("gateway", "unknown.io").unwrap().identity.group,
            "networking.istio.io"
        );
    }

    #[test]
    fn test_resource_dot_group_form() {
        let doc = doc();
        let mapper = RestMapper::new(&doc);
        let found = mapper.map("gateways.gateway.networking.k8s.io", "").unwrap();
        assert_eq!(found.identity.version, "v1");
        assert!(mapper.map("widgets.example.com", "").is_none());
    }
}
