//! # Network
//!
//! Sample custom resource watched by the bundled controller binary.

use serde::{Deserialize, Serialize};

/// Network Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: samplecrd.k8s.io/v1
/// kind: Network
/// metadata:
///   name: example-network
///   namespace: default
/// spec:
///   cidr: 192.168.0.0/16
///   gateway: 192.168.0.1
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "Network",
    group = "samplecrd.k8s.io",
    version = "v1",
    namespaced,
    plural = "networks",
    printcolumn = r#"{"name":"CIDR", "type":"string", "jsonPath":".spec.cidr"}, {"name":"Gateway", "type":"string", "jsonPath":".spec.gateway"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Address range in CIDR notation
    pub cidr: String,
    /// Gateway address inside the range
    pub gateway: String,
}
