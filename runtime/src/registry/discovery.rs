//! appc meta discovery: image name and labels to download URLs.
//!
//! For `example.com/group/app` the documents
//! `https://example.com/group/app?ac-discovery=1`,
//! `https://example.com/group?ac-discovery=1` and
//! `https://example.com?ac-discovery=1` are tried in turn (plain `http://`
//! as well when insecure). Each may carry
//! `<meta name="ac-discovery" content="<prefix> <template>">` tags.

use std::sync::LazyLock;

use acb_core::error::{BuildError, Result};
use acb_core::{host_arch, host_os};
use async_trait::async_trait;
use regex::Regex;

use super::download::RegistryClient;
use crate::aci::{AcIdentifier, AppRef, Labels, LATEST_VERSION, VERSION_LABEL};

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z][a-z0-9-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

/// Where to download an image and its detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub aci: String,
    pub asc: String,
}

/// Resolves an image reference to download endpoints.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Candidate endpoints in preference order. Empty is never returned.
    async fn discover(&self, app: &AppRef, insecure: bool) -> Result<Vec<Endpoint>>;
}

/// [`Discovery`] that answers every lookup with the same endpoints.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    endpoints: Vec<Endpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    /// One endpoint whose signature sits next to the image.
    pub fn single(aci_url: impl Into<String>) -> Self {
        let aci = aci_url.into();
        let asc = format!("{aci}.asc");
        Self::new(vec![Endpoint { aci, asc }])
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, app: &AppRef, _insecure: bool) -> Result<Vec<Endpoint>> {
        if self.endpoints.is_empty() {
            return Err(BuildError::Discovery {
                name: app.to_string(),
                message: "no endpoints discovered".to_string(),
            });
        }
        Ok(self.endpoints.clone())
    }
}

/// [`Discovery`] over HTTP meta tags.
#[derive(Debug, Clone)]
pub struct MetaDiscovery {
    client: RegistryClient,
}

impl MetaDiscovery {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Fetch one discovery document and render the templates that apply to `app`.
    pub async fn endpoints_at(&self, url: &str, app: &AppRef) -> Result<Vec<Endpoint>> {
        let Some(body) = self.client.get_text(url).await? else {
            return Ok(Vec::new());
        };
        let labels = with_platform_defaults(&app.labels)?;
        Ok(parse_templates(&body)
            .into_iter()
            .filter(|(prefix, _)| app.name.as_str().starts_with(prefix.as_str()))
            .filter_map(|(_, template)| render_endpoint(&template, &app.name, &labels))
            .collect())
    }
}

#[async_trait]
impl Discovery for MetaDiscovery {
    async fn discover(&self, app: &AppRef, insecure: bool) -> Result<Vec<Endpoint>> {
        let mut last_error = None;

        for url in discovery_urls(&app.name, insecure) {
            match self.endpoints_at(&url, app).await {
                Ok(endpoints) if !endpoints.is_empty() => {
                    tracing::debug!(name = %app.name, url = %url, count = endpoints.len(), "Discovered endpoints");
                    return Ok(endpoints);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Discovery request failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e @ BuildError::NoHost { .. }) => Err(e),
            Some(e) => Err(BuildError::Discovery {
                name: app.to_string(),
                message: e.to_string(),
            }),
            None => Err(BuildError::Discovery {
                name: app.to_string(),
                message: "no endpoints discovered".to_string(),
            }),
        }
    }
}

/// Discovery document URLs for `name`, most specific first.
pub fn discovery_urls(name: &AcIdentifier, insecure: bool) -> Vec<String> {
    let schemes: &[&str] = if insecure { &["https", "http"] } else { &["https"] };
    let mut prefixes = Vec::new();
    let mut current = name.as_str();
    loop {
        prefixes.push(current);
        match current.rfind('/') {
            Some(idx) => current = &current[..idx],
            None => break,
        }
    }

    prefixes
        .into_iter()
        .flat_map(|prefix| {
            schemes
                .iter()
                .map(move |scheme| format!("{scheme}://{prefix}?ac-discovery=1"))
        })
        .collect()
}

/// `(prefix, template)` pairs from every `ac-discovery` meta tag.
pub fn parse_templates(html: &str) -> Vec<(String, String)> {
    let mut templates = Vec::new();
    for tag in META_TAG.find_iter(html) {
        let mut name = None;
        let mut content = None;
        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string());
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => name = value,
                "content" => content = value,
                _ => {}
            }
        }
        if name.as_deref() != Some("ac-discovery") {
            continue;
        }
        let Some(content) = content else { continue };
        let mut parts = content.split_whitespace();
        if let (Some(prefix), Some(template), None) = (parts.next(), parts.next(), parts.next()) {
            templates.push((prefix.to_string(), template.to_string()));
        }
    }
    templates
}

/// Fill `{name}`, `{ext}` and label placeholders.
///
/// Returns `None` when a placeholder is left unresolved.
pub fn render_endpoint(template: &str, name: &AcIdentifier, labels: &Labels) -> Option<Endpoint> {
    let render = |ext: &str| {
        let mut out = template.replace("{name}", name.as_str()).replace("{ext}", ext);
        for label in labels.iter() {
            out = out.replace(&format!("{{{}}}", label.name), &label.value);
        }
        if out.contains('{') || out.contains('}') {
            None
        } else {
            Some(out)
        }
    };
    Some(Endpoint {
        aci: render("aci")?,
        asc: render("aci.asc")?,
    })
}

/// Labels with `version`, `os` and `arch` filled in when absent.
pub fn with_platform_defaults(labels: &Labels) -> Result<Labels> {
    let mut full = labels.clone();
    for (name, value) in [
        (VERSION_LABEL, LATEST_VERSION),
        ("os", host_os()),
        ("arch", host_arch()),
    ] {
        if full.get(name).is_none() {
            full.set(AcIdentifier::new(name)?, value);
        }
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><head>
        <meta name="ac-discovery" content="example.com https://dl.example.com/{name}-{version}-{os}-{arch}.{ext}">
        <meta name="ac-discovery-pubkeys" content="example.com https://example.com/pubkeys.gpg">
        <meta content="other.org https://other.org/{name}.{ext}" name='ac-discovery' />
        </head></html>"#;

    #[test]
    fn test_discovery_urls_walk_ancestors() {
        let name = AcIdentifier::new("example.com/group/app").unwrap();
        assert_eq!(
            discovery_urls(&name, false),
            vec![
                "https://example.com/group/app?ac-discovery=1",
                "https://example.com/group?ac-discovery=1",
                "https://example.com?ac-discovery=1",
            ]
        );
        let insecure = discovery_urls(&name, true);
        assert_eq!(insecure.len(), 6);
        assert_eq!(insecure[1], "http://example.com/group/app?ac-discovery=1");
    }

    #[test]
    fn test_parse_templates_any_attribute_order() {
        let templates = parse_templates(PAGE);
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].0, "example.com");
        assert_eq!(templates[1].1, "https://other.org/{name}.{ext}");
    }

    #[test]
    fn test_render_endpoint_substitutes_labels() {
        let name = AcIdentifier::new("example.com/app").unwrap();
        let labels = Labels::from_pairs([("version", "1.0"), ("os", "linux"), ("arch", "amd64")]).unwrap();
        let ep = render_endpoint(
            "https://dl.example.com/{name}-{version}-{os}-{arch}.{ext}",
            &name,
            &labels,
        )
        .unwrap();
        assert_eq!(ep.aci, "https://dl.example.com/example.com/app-1.0-linux-amd64.aci");
        assert_eq!(ep.asc, "https://dl.example.com/example.com/app-1.0-linux-amd64.aci.asc");
    }

    #[test]
    fn test_render_endpoint_skips_unresolved() {
        let name = AcIdentifier::new("example.com/app").unwrap();
        assert!(render_endpoint("https://x/{name}-{channel}.{ext}", &name, &Labels::new()).is_none());
    }

    #[test]
    fn test_platform_defaults_keep_explicit_labels() {
        let labels = with_platform_defaults(&Labels::from_pairs([("os", "freebsd")]).unwrap()).unwrap();
        assert_eq!(labels.get("os"), Some("freebsd"));
        assert_eq!(labels.get("arch"), Some(host_arch()));
        assert_eq!(labels.version(), "latest");
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let app = AppRef::parse("example.com/app").unwrap();
        let found = StaticDiscovery::single("http://mirror/app.aci")
            .discover(&app, false)
            .await
            .unwrap();
        assert_eq!(found[0].asc, "http://mirror/app.aci.asc");

        let err = StaticDiscovery::default().discover(&app, false).await.unwrap_err();
        assert_eq!(err.kind(), acb_core::ErrorKind::Discovery);
    }

    #[tokio::test]
    async fn test_endpoints_at_filters_by_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discovery"))
            .and(query_param("ac-discovery", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let discovery = MetaDiscovery::new(RegistryClient::new(false).unwrap());
        let app = AppRef::parse("example.com/app:2.0,os=linux,arch=arm64").unwrap();
        let endpoints = discovery
            .endpoints_at(&format!("{}/discovery?ac-discovery=1", server.uri()), &app)
            .await
            .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(
            endpoints[0].aci,
            "https://dl.example.com/example.com/app-2.0-linux-arm64.aci"
        );
    }
}
