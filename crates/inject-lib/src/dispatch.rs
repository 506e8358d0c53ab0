//! Resource kind dispatch
//!
//! Decodes just enough of a document to learn its kind, then either
//! recurses into a `List`, decodes a supported workload and hands it to the
//! transformer, or passes the document through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::annotations::{CONTROLLER_DEPLOYMENT, LOCALHOST_DNS_OVERRIDE};
use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::report::InjectionReport;
use crate::transform::{Transformer, WorkloadContext};
use crate::workload::{ResourceMeta, UntypedFields, Workload, LIST_KIND};

/// Result of dispatching one document
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Bytes to emit: the re-serialized resource, or the input unchanged
    pub bytes: Vec<u8>,
    /// One report per resource, several for a `List`
    pub reports: Vec<InjectionReport>,
    pub changed: bool,
}

impl Dispatched {
    fn unchanged(bytes: &[u8], reports: Vec<InjectionReport>) -> Self {
        Self {
            bytes: bytes.to_vec(),
            reports,
            changed: false,
        }
    }
}

/// A `List` wrapper with its items kept as raw values
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceList {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    api_version: String,
    kind: String,
    #[serde(default)]
    items: Vec<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Dispatch one YAML document through `transformer`.
///
/// `source_name` only labels parse errors.
pub fn dispatch(
    bytes: &[u8],
    source_name: &str,
    config: &ResolvedConfig,
    transformer: &dyn Transformer,
) -> Result<Dispatched> {
    dispatch_document(bytes, source_name, config, transformer, false)
}

fn dispatch_document(
    bytes: &[u8],
    source_name: &str,
    config: &ResolvedConfig,
    transformer: &dyn Transformer,
    in_list: bool,
) -> Result<Dispatched> {
    let mode = transformer.mode();
    let meta = ResourceMeta::decode(bytes).map_err(|e| parse_error(source_name, e))?;

    let Some(kind) = meta.kind() else {
        debug!(source = source_name, "Document has no kind");
        return Ok(Dispatched::unchanged(
            bytes,
            vec![InjectionReport::unsupported(mode, None, meta.name())],
        ));
    };

    if kind == LIST_KIND && !in_list {
        return dispatch_list(bytes, source_name, config, transformer);
    }

    let workload = Workload::decode(kind, bytes).map_err(|e| parse_error(source_name, e))?;
    let Some(mut workload) = workload else {
        debug!(kind, name = meta.name(), "Passing through unsupported resource");
        return Ok(Dispatched::unchanged(
            bytes,
            vec![InjectionReport::unsupported(mode, Some(kind), meta.name())],
        ));
    };

    let pristine = workload.clone();
    let context = workload_context(&workload, config);
    let mut report = InjectionReport::new(mode, kind, workload.name());
    let changed = transformer.transform(&mut workload, &context, &mut report)?;
    if !changed {
        return Ok(Dispatched::unchanged(bytes, vec![report]));
    }

    workload.prune_empty_template_meta();
    let original: Value = serde_yaml::from_slice(bytes).map_err(|e| parse_error(source_name, e))?;
    let untyped = UntypedFields::new(original, &pristine)?;
    Ok(Dispatched {
        bytes: untyped.restore(&workload)?.into_bytes(),
        reports: vec![report],
        changed: true,
    })
}

fn dispatch_list(
    bytes: &[u8],
    source_name: &str,
    config: &ResolvedConfig,
    transformer: &dyn Transformer,
) -> Result<Dispatched> {
    let mut list: ResourceList =
        serde_yaml::from_slice(bytes).map_err(|e| parse_error(source_name, e))?;
    debug!(items = list.items.len(), "Dispatching list items");

    let mut reports = Vec::with_capacity(list.items.len());
    let mut changed = false;
    for item in list.items.iter_mut() {
        let item_bytes = serde_yaml::to_string(item)?.into_bytes();
        let result = dispatch_document(&item_bytes, source_name, config, transformer, true)?;
        if result.changed {
            *item = serde_yaml::from_slice(&result.bytes)?;
            changed = true;
        }
        reports.extend(result.reports);
    }

    if !changed {
        return Ok(Dispatched::unchanged(bytes, reports));
    }

    Ok(Dispatched {
        bytes: serde_yaml::to_string(&list)?.into_bytes(),
        reports,
        changed: true,
    })
}

/// The control plane's own controller reaches the destination service over loopback
fn workload_context(workload: &Workload, config: &ResolvedConfig) -> WorkloadContext {
    let is_controller = matches!(workload, Workload::Deployment(_))
        && workload.name() == CONTROLLER_DEPLOYMENT
        && workload.namespace() == Some(config.control_plane_namespace.as_str());

    WorkloadContext {
        destination_override: is_controller
            .then(|| format!("{}:{}", LOCALHOST_DNS_OVERRIDE, config.destination_port)),
    }
}

fn parse_error(source_name: &str, err: serde_yaml::Error) -> Error {
    let line = err.location().map(|l| l.line());
    Error::parse(source_name, line, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Injector, Uninjector};

    const DEPLOYMENT: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
      - name: web
        image: buoyantio/emojivoto-web:v8
";

    fn inject(bytes: &str) -> Dispatched {
        let config = ResolvedConfig::default();
        dispatch(bytes.as_bytes(), "test", &config, &Injector::new(&config)).unwrap()
    }

    #[test]
    fn test_unsupported_kind_passes_through() {
        let service = "# keep me\napiVersion: v1\nkind: Service\nmetadata:\n  name: web\nspec:\n  ports:\n  - port: 80\n";
        let result = inject(service);

        assert!(!result.changed);
        assert_eq!(result.bytes, service.as_bytes());
        assert_eq!(result.reports.len(), 1);
        assert!(result.reports[0].unsupported_resource);
        assert_eq!(result.reports[0].kind, "Service");
    }

    #[test]
    fn test_missing_kind() {
        let doc = "metadata:\n  name: nothing\n";
        let result = inject(doc);

        assert!(!result.changed);
        assert_eq!(result.bytes, doc.as_bytes());
        assert!(result.reports[0].missing_kind);
        assert!(result.reports[0].unsupported_resource);
    }

    #[test]
    fn test_injects_deployment() {
        let result = inject(DEPLOYMENT);
        assert!(result.changed);

        let yaml = String::from_utf8(result.bytes).unwrap();
        assert!(yaml.contains("name: linkerd-proxy"));
        assert!(yaml.contains("name: linkerd-init"));
        assert!(result.reports[0].applied);
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let config = ResolvedConfig::default();
        let err = dispatch(
            b"kind: Deployment\nmetadata: [unclosed\n",
            "broken.yml",
            &config,
            &Injector::new(&config),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("broken.yml"));
    }

    #[test]
    fn test_supported_kind_with_bad_shape_is_parse_error() {
        let config = ResolvedConfig::default();
        let err = dispatch(
            b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec: 3\n",
            "bad.yml",
            &config,
            &Injector::new(&config),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_list_items_are_transformed_in_order() {
        let list = format!(
            "apiVersion: v1\nkind: List\nitems:\n{}\n- apiVersion: v1\n  kind: Service\n  metadata:\n    name: web-svc\n",
            DEPLOYMENT
                .lines()
                .enumerate()
                .map(|(i, l)| if i == 0 { format!("- {l}") } else { format!("  {l}") })
                .collect::<Vec<_>>()
                .join("\n")
        );
        let result = inject(&list);

        assert!(result.changed);
        assert_eq!(result.reports.len(), 2);
        assert_eq!(result.reports[0].kind, "Deployment");
        assert!(result.reports[0].applied);
        assert_eq!(result.reports[1].kind, "Service");
        assert!(result.reports[1].unsupported_resource);

        let value: Value = serde_yaml::from_slice(&result.bytes).unwrap();
        assert_eq!(value["kind"], "List");
        let items = value["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["kind"], "Deployment");
        let containers = items[0]["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(items[1]["metadata"]["name"], "web-svc");
    }

    #[test]
    fn test_unchanged_list_passes_through() {
        let list = "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: settings\n";
        let result = inject(list);
        assert!(!result.changed);
        assert_eq!(result.bytes, list.as_bytes());
        assert_eq!(result.reports.len(), 1);
    }

    #[test]
    fn test_nested_list_is_not_recursed() {
        let list = "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: List\n  items: []\n";
        let result = inject(list);
        assert!(!result.changed);
        assert_eq!(result.reports.len(), 1);
        assert_eq!(result.reports[0].kind, "List");
        assert!(result.reports[0].unsupported_resource);
    }

    #[test]
    fn test_controller_gets_loopback_destination() {
        let config = ResolvedConfig::default();
        let controller = DEPLOYMENT.replace(
            "  name: web\nspec:",
            "  name: linkerd-controller\n  namespace: linkerd\nspec:",
        );
        let result = dispatch(controller.as_bytes(), "test", &config, &Injector::new(&config)).unwrap();
        let yaml = String::from_utf8(result.bytes).unwrap();
        assert!(yaml.contains("localhost.:8086"));

        let elsewhere = controller.replace("namespace: linkerd", "namespace: other");
        let result = dispatch(elsewhere.as_bytes(), "test", &config, &Injector::new(&config)).unwrap();
        let yaml = String::from_utf8(result.bytes).unwrap();
        assert!(!yaml.contains("localhost.:8086"));
        assert!(yaml.contains("linkerd-destination.linkerd.svc.cluster.local:8086"));
    }

    const NEWER_POD_FIELDS: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      resources:
        limits:
          cpu: '1'
      containers:
      - name: web
        image: buoyantio/emojivoto-web:v8
        restartPolicyRules:
        - action: Restart
          exitCodes:
            operator: In
            values:
            - 42
";

    #[test]
    fn test_keeps_pod_fields_unknown_to_the_api_types() {
        let config = ResolvedConfig::default();
        let injected = inject(NEWER_POD_FIELDS);
        assert!(injected.changed);

        let value: Value = serde_yaml::from_slice(&injected.bytes).unwrap();
        let pod_spec = &value["spec"]["template"]["spec"];
        assert_eq!(pod_spec["resources"]["limits"]["cpu"], "1");
        let containers = pod_spec["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["name"], "web");
        assert_eq!(containers[0]["restartPolicyRules"][0]["action"], "Restart");
        assert!(containers[1].get("restartPolicyRules").is_none());

        let result = dispatch(&injected.bytes, "test", &config, &Uninjector).unwrap();
        assert!(result.changed);
        let restored: Value = serde_yaml::from_slice(&result.bytes).unwrap();
        let original: Value = serde_yaml::from_str(NEWER_POD_FIELDS).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_uninject_restores_injected_deployment() {
        let config = ResolvedConfig::default();
        let injected = inject(DEPLOYMENT);
        let result = dispatch(&injected.bytes, "test", &config, &Uninjector).unwrap();

        assert!(result.changed);
        assert_eq!(result.reports[0].line(), "deployment \"web\" uninjected");
        let restored: Value = serde_yaml::from_slice(&result.bytes).unwrap();
        let original: Value = serde_yaml::from_str(DEPLOYMENT).unwrap();
        assert_eq!(restored, original);
    }
}
