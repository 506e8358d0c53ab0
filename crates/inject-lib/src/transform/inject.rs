//! Proxy injection

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use super::proxy::{identity_volumes, init_container, proxy_container};
use super::{uses_udp, Mode, Transformer, WorkloadContext};
use crate::annotations::{
    owner_label, CONTROL_PLANE_NS_LABEL, CREATED_BY, FOREIGN_INIT_CONTAINERS,
    FOREIGN_PROXY_CONTAINERS, IDENTITY_MODE, IDENTITY_MODE_DEFAULT, IDENTITY_MODE_DISABLED, INIT_CONTAINER_NAME,
    INJECT, INJECT_DISABLED, ISTIO_SIDECAR_STATUS, PROXY_CONTAINER_NAME, PROXY_VERSION,
};
use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::report::InjectionReport;
use crate::workload::Workload;

/// Adds the proxy sidecar and init container to eligible workloads
#[derive(Debug, Clone, Copy)]
pub struct Injector<'a> {
    config: &'a ResolvedConfig,
}

impl<'a> Injector<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Self {
        Self { config }
    }
}

impl Transformer for Injector<'_> {
    fn mode(&self) -> Mode {
        Mode::Inject
    }

    fn transform(
        &self,
        workload: &mut Workload,
        context: &WorkloadContext,
        report: &mut InjectionReport,
    ) -> Result<bool> {
        let kind = workload.kind();
        let name = workload.name().to_string();
        let namespace = workload.namespace().map(str::to_string);
        let workload_disabled = is_disabled(workload.metadata().annotations.as_ref());
        let template = workload.pod_template_mut();

        report.udp = uses_udp(template.spec);
        let annotations = template.meta.annotations.clone().unwrap_or_default();

        report.inject_disabled = workload_disabled || is_disabled(Some(&annotations));
        report.host_network = template.spec.host_network.unwrap_or(false);
        report.sidecar = has_sidecar(template.spec, &annotations);
        if report.skipped() {
            debug!(kind, name = %name, "Workload not eligible for injection");
            return Ok(false);
        }

        let config = self.config.with_overrides(&annotations);
        config.validate().map_err(|err| match err {
            Error::ConfigValidation(message) => Error::ConfigValidation(format!(
                "{} {:?}: {}",
                kind.to_lowercase(),
                name,
                message
            )),
            other => other,
        })?;

        let destination = context
            .destination_override
            .clone()
            .unwrap_or_else(|| config.destination_addr());

        template
            .spec
            .containers
            .push(proxy_container(&config, &destination));

        if !config.cni_enabled {
            template
                .spec
                .init_containers
                .get_or_insert_with(Vec::new)
                .insert(0, init_container(&config));
        }

        if config.identity_enabled {
            let secret = identity_secret_name(kind, &name, namespace.as_deref());
            template
                .spec
                .volumes
                .get_or_insert_with(Vec::new)
                .extend(identity_volumes(&secret));
        }

        add_provenance(template.meta, &config, kind, &name);

        report.applied = true;
        debug!(kind, name = %name, "Injected proxy");
        Ok(true)
    }
}

/// `linkerd.io/inject: disabled` on either the workload or its pod template
fn is_disabled(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(INJECT))
        .is_some_and(|value| value == INJECT_DISABLED)
}

/// Whether the pod already runs a mesh proxy, ours or another mesh's
fn has_sidecar(spec: &PodSpec, annotations: &BTreeMap<String, String>) -> bool {
    let proxy = spec
        .containers
        .iter()
        .any(|c| c.name == PROXY_CONTAINER_NAME || FOREIGN_PROXY_CONTAINERS.contains(&c.name.as_str()));
    let init = spec
        .init_containers
        .iter()
        .flatten()
        .any(|c| c.name == INIT_CONTAINER_NAME || FOREIGN_INIT_CONTAINERS.contains(&c.name.as_str()));

    proxy || init || annotations.contains_key(ISTIO_SIDECAR_STATUS)
}

fn identity_secret_name(kind: &str, name: &str, namespace: Option<&str>) -> String {
    let kind = kind.to_lowercase();
    match namespace {
        Some(ns) => format!("{name}-{kind}-{ns}-linkerd-io-tls"),
        None => format!("{name}-{kind}-linkerd-io-tls"),
    }
}

fn add_provenance(meta: &mut ObjectMeta, config: &ResolvedConfig, kind: &str, name: &str) {
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(
        CREATED_BY.to_string(),
        format!("linkerd/cli {}", config.version),
    );
    annotations.insert(PROXY_VERSION.to_string(), config.version.clone());
    let identity_mode = if config.identity_enabled {
        IDENTITY_MODE_DEFAULT
    } else {
        IDENTITY_MODE_DISABLED
    };
    annotations.insert(IDENTITY_MODE.to_string(), identity_mode.to_string());

    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(
        CONTROL_PLANE_NS_LABEL.to_string(),
        config.control_plane_namespace.clone(),
    );
    if let Some(owner) = owner_label(kind) {
        labels.insert(owner, name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(extra_pod_spec: &str, pod_annotations: &str) -> Workload {
        let yaml = format!(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: emojivoto
spec:
  template:
    metadata:
      labels:
        app: web
{pod_annotations}
    spec:
{extra_pod_spec}
      containers:
      - name: web
        image: buoyantio/emojivoto-web:v8
        ports:
        - containerPort: 8080
"#
        );
        Workload::decode("Deployment", yaml.as_bytes()).unwrap().unwrap()
    }

    fn inject(workload: &mut Workload, config: &ResolvedConfig) -> (bool, InjectionReport) {
        let mut report = InjectionReport::new(Mode::Inject, workload.kind(), workload.name());
        let changed = Injector::new(config)
            .transform(workload, &WorkloadContext::default(), &mut report)
            .unwrap();
        (changed, report)
    }

    #[test]
    fn test_injects_eligible_deployment() {
        let config = ResolvedConfig::default();
        let mut workload = deployment("", "");
        let (changed, report) = inject(&mut workload, &config);

        assert!(changed);
        assert!(report.applied);
        assert!(!report.skipped());

        let template = workload.pod_template_mut();
        let names: Vec<&str> = template.spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["web", "linkerd-proxy"]);
        let init = template.spec.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "linkerd-init");
        assert_eq!(template.spec.volumes.as_ref().unwrap().len(), 2);

        let annotations = template.meta.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(CREATED_BY),
            Some(&format!("linkerd/cli {}", config.version))
        );
        assert_eq!(annotations.get(IDENTITY_MODE).map(String::as_str), Some("default"));

        let labels = template.meta.labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(
            labels.get("linkerd.io/control-plane-ns").map(String::as_str),
            Some("linkerd")
        );
        assert_eq!(
            labels.get("linkerd.io/proxy-deployment").map(String::as_str),
            Some("web")
        );
    }

    #[test]
    fn test_skips_disabled_annotation() {
        let config = ResolvedConfig::default();
        let mut workload = deployment("", "      annotations:\n        linkerd.io/inject: disabled");
        let before = workload.clone();
        let (changed, report) = inject(&mut workload, &config);

        assert!(!changed);
        assert!(report.inject_disabled);
        assert!(!report.applied);
        assert_eq!(workload, before);
    }

    #[test]
    fn test_skips_workload_level_disabled_annotation() {
        let config = ResolvedConfig::default();
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  annotations:
    linkerd.io/inject: disabled
spec:
  template:
    spec:
      containers:
      - name: web
        image: buoyantio/emojivoto-web:v8
"#;
        let mut workload = Workload::decode("Deployment", yaml.as_bytes()).unwrap().unwrap();
        let (changed, report) = inject(&mut workload, &config);

        assert!(!changed);
        assert!(report.inject_disabled);
        assert_eq!(report.line(), "deployment \"web\" skipped");
        assert_eq!(workload.pod_template_mut().spec.containers.len(), 1);
    }

    #[test]
    fn test_skips_host_network() {
        let config = ResolvedConfig::default();
        let mut workload = deployment("      hostNetwork: true", "");
        let (changed, report) = inject(&mut workload, &config);

        assert!(!changed);
        assert!(report.host_network);
        let template = workload.pod_template_mut();
        assert_eq!(template.spec.containers.len(), 1);
        assert!(template.spec.init_containers.is_none());
    }

    #[test]
    fn test_skips_existing_sidecar() {
        let config = ResolvedConfig::default();
        let mut workload = deployment("", "");
        inject(&mut workload, &config);

        let (changed, report) = inject(&mut workload, &config);
        assert!(!changed);
        assert!(report.sidecar);
    }

    #[test]
    fn test_skips_foreign_sidecar() {
        let config = ResolvedConfig::default();
        let mut workload = deployment(
            "      initContainers:\n      - name: istio-init\n        image: istio/proxyv2",
            "",
        );
        let (changed, report) = inject(&mut workload, &config);
        assert!(!changed);
        assert!(report.sidecar);
    }

    #[test]
    fn test_cni_mode_omits_init_container() {
        let config = ResolvedConfig {
            cni_enabled: true,
            ..Default::default()
        };
        let mut workload = deployment("", "");
        let (changed, _) = inject(&mut workload, &config);

        assert!(changed);
        let template = workload.pod_template_mut();
        assert!(template.spec.init_containers.is_none());
        assert_eq!(template.spec.containers.len(), 2);
    }

    #[test]
    fn test_identity_disabled_omits_volumes() {
        let config = ResolvedConfig {
            identity_enabled: false,
            ..Default::default()
        };
        let mut workload = deployment("", "");
        inject(&mut workload, &config);

        let template = workload.pod_template_mut();
        assert!(template.spec.volumes.is_none());
        assert_eq!(
            template
                .meta
                .annotations
                .as_ref()
                .unwrap()
                .get(IDENTITY_MODE)
                .map(String::as_str),
            Some("disabled")
        );
    }

    #[test]
    fn test_annotation_overrides_apply_to_workload() {
        let config = ResolvedConfig::default();
        let mut workload = deployment(
            "",
            "      annotations:\n        config.linkerd.io/proxy-uid: \"3000\"\n        config.linkerd.io/skip-outbound-ports: \"3306\"",
        );
        inject(&mut workload, &config);

        let template = workload.pod_template_mut();
        let proxy = template.spec.containers.last().unwrap();
        assert_eq!(
            proxy.security_context.as_ref().unwrap().run_as_user,
            Some(3000)
        );
        let args = template.spec.init_containers.as_ref().unwrap()[0]
            .args
            .clone()
            .unwrap();
        assert!(args.ends_with(&["--outbound-ports-to-ignore".to_string(), "3306".to_string()]));
        assert_eq!(config.proxy_uid, 2102);
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let config = ResolvedConfig::default();
        let mut workload = deployment(
            "",
            "      annotations:\n        config.linkerd.io/skip-inbound-ports: \"4143\"",
        );
        let mut report = InjectionReport::new(Mode::Inject, "Deployment", "web");
        let err = Injector::new(&config)
            .transform(&mut workload, &WorkloadContext::default(), &mut report)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn test_destination_override() {
        let config = ResolvedConfig::default();
        let mut workload = deployment("", "");
        let context = WorkloadContext {
            destination_override: Some("localhost.:8086".to_string()),
        };
        let mut report = InjectionReport::new(Mode::Inject, "Deployment", "web");
        Injector::new(&config)
            .transform(&mut workload, &context, &mut report)
            .unwrap();

        let template = workload.pod_template_mut();
        let proxy = template.spec.containers.last().unwrap();
        let destination = proxy
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "LINKERD2_PROXY_DESTINATION_SVC_ADDR")
            .unwrap();
        assert_eq!(destination.value.as_deref(), Some("localhost.:8086"));
    }

    #[test]
    fn test_secret_name() {
        assert_eq!(
            identity_secret_name("Deployment", "web", Some("emojivoto")),
            "web-deployment-emojivoto-linkerd-io-tls"
        );
        assert_eq!(
            identity_secret_name("Pod", "debug", None),
            "debug-pod-linkerd-io-tls"
        );
    }
}
