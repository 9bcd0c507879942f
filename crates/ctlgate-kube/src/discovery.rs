//! Aggregated API discovery and category filtering
//!
//! Fetches the aggregated discovery documents from `/api` and `/apis`, then
//! keeps only the branches that contain a resource declaring the requested
//! category. Pruning happens at three levels (resource, version, group) and
//! preserves the order the API server returned.

use http::header::{HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};

use crate::client::{get_json, ApiClient, ApiRequest};
use crate::error::Result;
use crate::profile::ConnectionProfile;

/// Accept header requesting the aggregated discovery format (v2, then v2beta1)
pub const DISCOVERY_ACCEPT: &str = "application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList,application/json;g=apidiscovery.k8s.io;v=v2beta1;as=APIGroupDiscoveryList,application/json";

/// Aggregated discovery document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGroupDiscoveryList {
    /// Discovered groups
    #[serde(default)]
    pub items: Vec<ApiGroupDiscovery>,
}

/// One API group with its served versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGroupDiscovery {
    /// Group metadata; the legacy core group has an empty name
    #[serde(default)]
    pub metadata: GroupMetadata,
    /// Served versions, most preferred first
    #[serde(default)]
    pub versions: Vec<ApiVersionDiscovery>,
}

/// Group metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    /// Group name (e.g. "apps")
    #[serde(default)]
    pub name: String,
}

/// One version of a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionDiscovery {
    /// Version name (e.g. "v1")
    #[serde(default)]
    pub version: String,
    /// Resources served at this version
    #[serde(default)]
    pub resources: Vec<ApiResourceDiscovery>,
}

/// One resource of a group version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceDiscovery {
    /// Plural resource name (e.g. "deployments")
    #[serde(default)]
    pub resource: String,
    /// "Namespaced" or "Cluster"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    /// Supported verbs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
    /// Categories the resource belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// A (group, version, resource) triple that survived category filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryResource {
    /// Group name, empty for the core group
    pub group: String,
    /// Version
    pub version: String,
    /// Plural resource name
    pub resource: String,
}

impl CategoryResource {
    /// Path of the resource collection across all namespaces
    pub fn collection_path(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}/{}", self.version, self.resource)
        } else {
            format!("/apis/{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Fetch and union the discovery documents from `/api` and `/apis`
pub async fn fetch_groups<C>(client: &C, profile: &ConnectionProfile) -> Result<Vec<ApiGroupDiscovery>>
where
    C: ApiClient + ?Sized,
{
    let mut groups = Vec::new();
    for path in ["/api", "/apis"] {
        let request =
            ApiRequest::get(path).with_header(ACCEPT, HeaderValue::from_static(DISCOVERY_ACCEPT));
        let list: ApiGroupDiscoveryList = get_json(client, request, profile).await?;
        groups.extend(list.items);
    }
    Ok(groups)
}

/// Keep only groups, versions and resources that declare `category`
///
/// Category matching is exact and case-sensitive. Empty versions and empty
/// groups are pruned; survivors keep their original order.
pub fn filter_by_category(groups: Vec<ApiGroupDiscovery>, category: &str) -> Vec<ApiGroupDiscovery> {
    groups
        .into_iter()
        .filter_map(|mut group| {
            group.versions = group
                .versions
                .into_iter()
                .filter_map(|mut version| {
                    version
                        .resources
                        .retain(|r| r.categories.iter().any(|c| c == category));
                    (!version.resources.is_empty()).then_some(version)
                })
                .collect();
            (!group.versions.is_empty()).then_some(group)
        })
        .collect()
}

/// Flatten filtered groups into (group, version, resource) triples, in order
pub fn category_resources(groups: &[ApiGroupDiscovery]) -> Vec<CategoryResource> {
    groups
        .iter()
        .flat_map(|group| {
            group.versions.iter().flat_map(move |version| {
                version.resources.iter().map(move |resource| CategoryResource {
                    group: group.metadata.name.clone(),
                    version: version.version.clone(),
                    resource: resource.resource.clone(),
                })
            })
        })
        .collect()
}
