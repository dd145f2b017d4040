//! Absolute URL and `@odata.context` construction, derived from the
//! request's scheme and host.

/// Scheme + host the service was reached on, derived per-request from the
/// incoming `Host` header (or a configured override behind a proxy).
#[derive(Debug, Clone)]
pub struct ServiceRoot {
    pub base_url: String,
}

impl ServiceRoot {
    pub fn new(scheme: &str, host: &str, service_path: &str) -> Self {
        let path = service_path.trim_end_matches('/');
        Self { base_url: format!("{scheme}://{host}{path}") }
    }

    pub fn resource_url(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url, relative.trim_start_matches('/'))
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/$metadata", self.base_url)
    }

    /// `$metadata#<suffix>`, e.g. `Products`, `Products/$entity`,
    /// `Products(1)/Supplier`, `Products(1)/Name`.
    pub fn context_url(&self, suffix: &str) -> String {
        format!("{}#{}", self.metadata_url(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_context_and_resource_urls() {
        let root = ServiceRoot::new("https", "example.com", "/odata");
        assert_eq!(root.context_url("Products"), "https://example.com/odata/$metadata#Products");
        assert_eq!(root.resource_url("Products(1)"), "https://example.com/odata/Products(1)");
    }
}
