//! Well-known names written to or read from injected workloads

/// Pod annotation controlling injection (`enabled` / `disabled`)
pub const INJECT: &str = "linkerd.io/inject";
pub const INJECT_DISABLED: &str = "disabled";

/// Provenance annotations added on injection
pub const CREATED_BY: &str = "linkerd.io/created-by";
pub const PROXY_VERSION: &str = "linkerd.io/proxy-version";
pub const IDENTITY_MODE: &str = "linkerd.io/identity-mode";

pub const IDENTITY_MODE_DEFAULT: &str = "default";
pub const IDENTITY_MODE_DISABLED: &str = "disabled";

/// Mesh label pointing at the control plane namespace
pub const CONTROL_PLANE_NS_LABEL: &str = "linkerd.io/control-plane-ns";

/// Prefix of the owner label, e.g. `linkerd.io/proxy-deployment`
pub const PROXY_OWNER_LABEL_PREFIX: &str = "linkerd.io/proxy-";

/// Prefix of the per-resource configuration override annotations
pub const CONFIG_PREFIX: &str = "config.linkerd.io/";

pub const PROXY_CONTAINER_NAME: &str = "linkerd-proxy";
pub const INIT_CONTAINER_NAME: &str = "linkerd-init";

pub const TRUST_ANCHORS_VOLUME: &str = "linkerd-trust-anchors";
pub const TRUST_ANCHORS_CONFIG_MAP: &str = "linkerd-ca-bundle";
pub const TRUST_ANCHORS_MOUNT_PATH: &str = "/var/linkerd-io/trust-anchors";
pub const TRUST_ANCHORS_FILE: &str = "trust-anchors.pem";

pub const SECRETS_VOLUME: &str = "linkerd-secrets";
pub const SECRETS_MOUNT_PATH: &str = "/var/linkerd-io/identity";

pub const PROXY_PORT_NAME: &str = "linkerd-proxy";
pub const ADMIN_PORT_NAME: &str = "linkerd-admin";

/// Deployment in the control plane namespace that talks to itself over loopback
pub const CONTROLLER_DEPLOYMENT: &str = "linkerd-controller";
pub const LOCALHOST_DNS_OVERRIDE: &str = "localhost.";

/// Containers of other meshes that make a workload ineligible
pub const FOREIGN_PROXY_CONTAINERS: &[&str] = &["istio-proxy"];
pub const FOREIGN_INIT_CONTAINERS: &[&str] = &["istio-init"];
pub const ISTIO_SIDECAR_STATUS: &str = "sidecar.istio.io/status";

/// Annotations injection adds and uninjection strips
pub const INJECTED_ANNOTATIONS: &[&str] = &[CREATED_BY, PROXY_VERSION, IDENTITY_MODE];

/// Whether a label key is one added by injection
pub fn is_injected_label(key: &str) -> bool {
    key == CONTROL_PLANE_NS_LABEL || key.starts_with(PROXY_OWNER_LABEL_PREFIX)
}

/// Owner label for a workload kind, `None` for bare pods
pub fn owner_label(kind: &str) -> Option<String> {
    match kind {
        "Pod" => None,
        other => Some(format!("{}{}", PROXY_OWNER_LABEL_PREFIX, other.to_lowercase())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_label() {
        assert_eq!(
            owner_label("Deployment").as_deref(),
            Some("linkerd.io/proxy-deployment")
        );
        assert_eq!(
            owner_label("ReplicationController").as_deref(),
            Some("linkerd.io/proxy-replicationcontroller")
        );
        assert_eq!(owner_label("Pod"), None);
    }

    #[test]
    fn test_injected_labels() {
        assert!(is_injected_label("linkerd.io/control-plane-ns"));
        assert!(is_injected_label("linkerd.io/proxy-statefulset"));
        assert!(!is_injected_label("app"));
        assert!(!is_injected_label("linkerd.io/inject"));
    }
}
