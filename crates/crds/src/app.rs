//! App custom resource
//!
//! An App is both the declarative description of an installable application
//! (`spec`) and the controller's record of what it did with it (`action`,
//! `status`, `resources`, ...). Unlike status-subresource CRDs, the
//! controller fields live at the top level of the object, next to `spec`,
//! which is how the platform has always stored them.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// API group of the App resource.
pub const APP_GROUP: &str = "klot.io";
/// API version of the App resource.
pub const APP_VERSION: &str = "v1";
/// Full `apiVersion` tag every App document must carry.
pub const APP_API_VERSION: &str = "klot.io/v1";
/// Kind tag every App document must carry.
pub const APP_KIND: &str = "App";
/// Plural resource name used in API paths.
pub const APP_PLURAL: &str = "apps";

/// A source descriptor: `{url}` or `{site, repo, version?, path?}`.
pub type SourceFields = BTreeMap<String, String>;

fn default_api_version() -> String {
    APP_API_VERSION.to_string()
}

fn default_kind() -> String {
    APP_KIND.to_string()
}

/// The App object as stored in the cluster API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct App {
    /// Always `klot.io/v1`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Always `App`
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Declarative part of the App
    #[serde(default)]
    pub spec: AppSpec,

    /// Desired intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AppAction>,

    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppStatus>,

    /// Resolved object manifests, in apply order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Value>>,

    /// Resolved dependencies on other Apps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriptions: Option<Vec<Subscription>>,

    /// Published outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publications: Option<Vec<Publication>>,

    /// External URL, once installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Failure detail, one entry per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<String>>,
}

impl App {
    /// Name of the App, empty when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// `kind/namespace/name` (namespace omitted when unset), used in logs.
    pub fn display(&self) -> String {
        match self.metadata.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}/{}/{}", self.kind, ns, self.name()),
            _ => format!("{}/{}", self.kind, self.name()),
        }
    }

    /// Observed state, `Discovered` when never set.
    pub fn current_status(&self) -> AppStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Desired intent, `Download` when never set.
    pub fn current_action(&self) -> AppAction {
        self.action.clone().unwrap_or_default()
    }

    /// Find a publication of this App by name.
    pub fn publication(&self, name: &str) -> Option<&Publication> {
        self.publications
            .as_ref()
            .and_then(|publications| publications.iter().find(|p| p.name == name))
    }
}

impl kube::Resource for App {
    type DynamicType = ();
    type Scope = k8s_openapi::ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(APP_KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(APP_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(APP_VERSION)
    }

    fn api_version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(APP_API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(APP_PLURAL)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Declarative part of an App.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Default source, merged under every manifest entry
    #[serde(default)]
    pub source: SourceFields,

    /// Manifest overrides, each merged over `source`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<SourceFields>,

    /// Dependencies on other Apps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<SubscribeSpec>,

    /// Values this App exposes once installed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publish: Vec<PublishSpec>,

    /// Publication to expose as the App's external URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlSpec>,

    /// Any other descriptor fields, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One `spec.subscribe` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeSpec {
    /// Local name of the subscription
    pub name: String,

    /// Partial source identifying the dependency App
    pub source: SourceFields,

    /// Where to project one of the dependency's publications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Projection>,
}

/// Projects a dependency publication into a ConfigMap key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Projection {
    /// Name of the dependency's publication
    pub publication: String,

    /// Namespace of the target ConfigMap
    pub namespace: String,

    /// Name of the target ConfigMap
    pub name: String,

    /// Data key, `<subscription>.<encoding>` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `yaml` (default) or `json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Projection {
    /// Encoding to serialize with.
    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("yaml")
    }

    /// Data key to write, defaulted from the subscription name.
    pub fn key_for(&self, subscription: &str) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("{}.{}", subscription, self.encoding()))
    }
}

/// One `spec.publish` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSpec {
    /// Publication name
    pub name: String,

    /// Derive host/port/ingress from this Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceRef>,

    /// Literal fields, copied verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Reference to a cluster Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRef {
    /// Service name
    pub name: String,

    /// Service namespace
    pub namespace: String,

    /// Named port whose number to publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// `spec.url`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlSpec {
    /// Publication to build the URL from
    pub publication: String,

    /// Path appended to the URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A resolved subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// Local name from `spec.subscribe`
    pub name: String,

    /// Name of the dependency App object
    pub app: String,

    /// Projection copied from `spec.subscribe`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Projection>,
}

/// A published output of an installed App.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    /// Publication name
    pub name: String,

    /// Everything else (`protocol`, `host`, `port`, `ingress`, literals)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Publication {
    /// `protocol` field, if it is a string.
    pub fn protocol(&self) -> Option<&str> {
        self.fields.get("protocol").and_then(Value::as_str)
    }

    /// `host` field, if it is a string.
    pub fn host(&self) -> Option<&str> {
        self.fields.get("host").and_then(Value::as_str)
    }

    /// `port` field, accepting numbers and numeric strings.
    pub fn port(&self) -> Option<u64> {
        match self.fields.get("port")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Desired intent of an App.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AppAction {
    /// Resolve resources only
    #[default]
    Download,

    /// Install once dependencies are installed
    Install,

    /// Remove installed resources
    Uninstall,
}

/// Observed state of an App.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AppStatus {
    /// Known, resources not yet resolved
    #[default]
    Discovered,

    /// Resources resolved
    Downloaded,

    /// Resources applied
    Installed,

    /// Processing failed; sticky until edited
    Error,
}
