//! Workload resources that carry a pod template
//!
//! Every supported kind has exactly one pod template location:
//! `spec.template` for controllers and the object itself for a bare `Pod`.
//! Fields outside the typed pod template are kept as raw JSON values so a
//! mutated workload serializes back without losing anything.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Kinds whose pod template can be injected
pub const SUPPORTED_KINDS: &[&str] = &[
    "Deployment",
    "ReplicationController",
    "ReplicaSet",
    "Job",
    "DaemonSet",
    "StatefulSet",
    "Pod",
];

pub const LIST_KIND: &str = "List";

/// Minimal view of a document, decoded before the kind is known
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<PartialObjectMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartialObjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ResourceMeta {
    pub fn decode(bytes: &[u8]) -> serde_yaml::Result<Self> {
        serde_yaml::from_slice(bytes)
    }

    /// The document kind, `None` when absent or empty
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref().filter(|k| !k.is_empty())
    }

    pub fn name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.name.as_deref())
            .unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.namespace.as_deref())
    }
}

/// A controller whose pods are described by `spec.template`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatedResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: TemplatedSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatedSpec {
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A bare pod, which is its own pod template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Sum type over the supported workload kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(TemplatedResource),
    ReplicationController(TemplatedResource),
    ReplicaSet(TemplatedResource),
    Job(TemplatedResource),
    DaemonSet(TemplatedResource),
    StatefulSet(TemplatedResource),
    Pod(PodResource),
}

/// Mutable borrows of a pod template's metadata and spec
pub struct PodTemplateMut<'a> {
    pub meta: &'a mut ObjectMeta,
    pub spec: &'a mut PodSpec,
}

impl Workload {
    /// Decode a document of a known kind, `Ok(None)` for unsupported kinds
    pub fn decode(kind: &str, bytes: &[u8]) -> serde_yaml::Result<Option<Workload>> {
        let workload = match kind {
            "Deployment" => Workload::Deployment(serde_yaml::from_slice(bytes)?),
            "ReplicationController" => Workload::ReplicationController(serde_yaml::from_slice(bytes)?),
            "ReplicaSet" => Workload::ReplicaSet(serde_yaml::from_slice(bytes)?),
            "Job" => Workload::Job(serde_yaml::from_slice(bytes)?),
            "DaemonSet" => Workload::DaemonSet(serde_yaml::from_slice(bytes)?),
            "StatefulSet" => Workload::StatefulSet(serde_yaml::from_slice(bytes)?),
            "Pod" => Workload::Pod(serde_yaml::from_slice(bytes)?),
            _ => return Ok(None),
        };
        Ok(Some(workload))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Workload::Deployment(_) => "Deployment",
            Workload::ReplicationController(_) => "ReplicationController",
            Workload::ReplicaSet(_) => "ReplicaSet",
            Workload::Job(_) => "Job",
            Workload::DaemonSet(_) => "DaemonSet",
            Workload::StatefulSet(_) => "StatefulSet",
            Workload::Pod(_) => "Pod",
        }
    }

    /// Metadata of the resource itself (not its pod template)
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Pod(pod) => &pod.metadata,
            Workload::Deployment(r)
            | Workload::ReplicationController(r)
            | Workload::ReplicaSet(r)
            | Workload::Job(r)
            | Workload::DaemonSet(r)
            | Workload::StatefulSet(r) => &r.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// The pod template, created empty if the document omitted its parts
    pub fn pod_template_mut(&mut self) -> PodTemplateMut<'_> {
        match self {
            Workload::Pod(pod) => PodTemplateMut {
                meta: &mut pod.metadata,
                spec: &mut pod.spec,
            },
            Workload::Deployment(r)
            | Workload::ReplicationController(r)
            | Workload::ReplicaSet(r)
            | Workload::Job(r)
            | Workload::DaemonSet(r)
            | Workload::StatefulSet(r) => {
                let template = &mut r.spec.template;
                PodTemplateMut {
                    meta: template.metadata.get_or_insert_with(Default::default),
                    spec: template.spec.get_or_insert_with(Default::default),
                }
            }
        }
    }

    /// Drop a pod template metadata block that a mutation left empty
    pub fn prune_empty_template_meta(&mut self) {
        if let Workload::Deployment(r)
        | Workload::ReplicationController(r)
        | Workload::ReplicaSet(r)
        | Workload::Job(r)
        | Workload::DaemonSet(r)
        | Workload::StatefulSet(r) = self
        {
            let template = &mut r.spec.template;
            if template.metadata.as_ref() == Some(&ObjectMeta::default()) {
                template.metadata = None;
            }
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        match self {
            Workload::Pod(pod) => serde_yaml::to_string(pod),
            Workload::Deployment(r)
            | Workload::ReplicationController(r)
            | Workload::ReplicaSet(r)
            | Workload::Job(r)
            | Workload::DaemonSet(r)
            | Workload::StatefulSet(r) => serde_yaml::to_string(r),
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Workload::Pod(pod) => serde_json::to_value(pod),
            Workload::Deployment(r)
            | Workload::ReplicationController(r)
            | Workload::ReplicaSet(r)
            | Workload::Job(r)
            | Workload::DaemonSet(r)
            | Workload::StatefulSet(r) => serde_json::to_value(r),
        }
    }
}

/// Fields of a document that the Kubernetes API types do not model.
///
/// `PodSpec`, `Container` and friends drop fields newer than the bundled
/// API version. The original document and its typed round trip are kept
/// so those fields can be merged back into a mutated workload.
#[derive(Debug, Clone)]
pub struct UntypedFields {
    original: Value,
    typed: Value,
}

impl UntypedFields {
    /// `original` is the document as read, `pristine` the workload decoded from it
    pub fn new(original: Value, pristine: &Workload) -> Result<Self> {
        Ok(Self {
            original,
            typed: pristine.to_value()?,
        })
    }

    /// Serialize `workload` with the untyped fields merged back in
    pub fn restore(&self, workload: &Workload) -> Result<String> {
        let mut value = workload.to_value()?;
        if restore_fields(&mut value, &self.original, &self.typed) {
            Ok(serde_yaml::to_string(&value)?)
        } else {
            Ok(workload.to_yaml()?)
        }
    }
}

/// Copy into `target` every field of `original` that `typed` lost.
///
/// Fields the typed model knows about are left to `target`, so anything a
/// transform removed stays removed. List elements are paired by `name`,
/// or by position when they have none.
fn restore_fields(target: &mut Value, original: &Value, typed: &Value) -> bool {
    match (target, original, typed) {
        (Value::Object(target), Value::Object(original), Value::Object(typed)) => {
            let mut restored = false;
            for (key, value) in original {
                let Some(typed_value) = typed.get(key) else {
                    if !target.contains_key(key) {
                        target.insert(key.clone(), value.clone());
                        restored = true;
                    }
                    continue;
                };
                if let Some(target_value) = target.get_mut(key) {
                    restored |= restore_fields(target_value, value, typed_value);
                }
            }
            restored
        }
        (Value::Array(target), Value::Array(original), Value::Array(typed)) => {
            let mut restored = false;
            for (index, (value, typed_value)) in original.iter().zip(typed).enumerate() {
                if let Some(element) = matching_element(target, value, index, original.len()) {
                    restored |= restore_fields(element, value, typed_value);
                }
            }
            restored
        }
        _ => false,
    }
}

fn matching_element<'a>(
    target: &'a mut [Value],
    original: &Value,
    index: usize,
    original_len: usize,
) -> Option<&'a mut Value> {
    match original.get("name").and_then(Value::as_str) {
        Some(name) => target
            .iter_mut()
            .find(|v| v.get("name").and_then(Value::as_str) == Some(name)),
        None if target.len() == original_len => target.get_mut(index),
        None => None,
    }
}
