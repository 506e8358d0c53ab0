//! Resolved proxy configuration
//!
//! A [`ResolvedConfig`] is built once per run by the caller (defaults, a
//! config file, environment and flags) and shared read-only by every
//! injection decision. Workloads may override individual settings with
//! `config.linkerd.io/*` annotations; those overrides produce a new value
//! scoped to that workload and never touch the shared one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::annotations::CONFIG_PREFIX;
use crate::error::{Error, Result};

const PULL_POLICIES: &[&str] = &["Always", "IfNotPresent", "Never"];

/// Merged configuration consulted for every injection decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// Namespace the control plane runs in
    #[serde(default = "default_control_plane_namespace")]
    pub control_plane_namespace: String,

    /// Tag for the proxy and init images, also recorded on injected pods
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_proxy_image")]
    pub proxy_image: String,

    #[serde(default = "default_pull_policy")]
    pub proxy_image_pull_policy: String,

    #[serde(default = "default_init_image")]
    pub init_image: String,

    #[serde(default = "default_pull_policy")]
    pub init_image_pull_policy: String,

    /// Port the proxy accepts redirected inbound traffic on
    #[serde(default = "default_inbound_port")]
    pub inbound_port: u16,

    /// Port the proxy accepts redirected outbound traffic on
    #[serde(default = "default_outbound_port")]
    pub outbound_port: u16,

    /// Port the proxy serves its control API on
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Port the proxy serves metrics and probes on
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Port of the control plane destination service
    #[serde(default = "default_destination_port")]
    pub destination_port: u16,

    #[serde(default = "default_proxy_uid")]
    pub proxy_uid: i64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub proxy_cpu_request: Option<String>,

    #[serde(default)]
    pub proxy_memory_request: Option<String>,

    #[serde(default)]
    pub proxy_cpu_limit: Option<String>,

    #[serde(default)]
    pub proxy_memory_limit: Option<String>,

    /// Inbound ports that bypass the proxy
    #[serde(default)]
    pub ignore_inbound_ports: Vec<u16>,

    /// Outbound ports that bypass the proxy
    #[serde(default)]
    pub ignore_outbound_ports: Vec<u16>,

    /// Whether proxies get mTLS identity
    #[serde(default = "default_true")]
    pub identity_enabled: bool,

    /// Whether a CNI plugin sets up traffic redirection instead of the init container
    #[serde(default)]
    pub cni_enabled: bool,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
}

fn default_control_plane_namespace() -> String {
    "linkerd".to_string()
}

fn default_version() -> String {
    concat!("stable-", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_proxy_image() -> String {
    "gcr.io/linkerd-io/proxy".to_string()
}

fn default_init_image() -> String {
    "gcr.io/linkerd-io/proxy-init".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_inbound_port() -> u16 {
    4143
}

fn default_outbound_port() -> u16 {
    4140
}

fn default_control_port() -> u16 {
    4190
}

fn default_admin_port() -> u16 {
    4191
}

fn default_destination_port() -> u16 {
    8086
}

fn default_proxy_uid() -> i64 {
    2102
}

fn default_log_level() -> String {
    "warn,linkerd2_proxy=info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            control_plane_namespace: default_control_plane_namespace(),
            version: default_version(),
            proxy_image: default_proxy_image(),
            proxy_image_pull_policy: default_pull_policy(),
            init_image: default_init_image(),
            init_image_pull_policy: default_pull_policy(),
            inbound_port: default_inbound_port(),
            outbound_port: default_outbound_port(),
            control_port: default_control_port(),
            admin_port: default_admin_port(),
            destination_port: default_destination_port(),
            proxy_uid: default_proxy_uid(),
            log_level: default_log_level(),
            proxy_cpu_request: None,
            proxy_memory_request: None,
            proxy_cpu_limit: None,
            proxy_memory_limit: None,
            ignore_inbound_ports: Vec::new(),
            ignore_outbound_ports: Vec::new(),
            identity_enabled: true,
            cni_enabled: false,
            cluster_domain: default_cluster_domain(),
        }
    }
}

impl ResolvedConfig {
    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        let proxy_ports = [
            ("inbound", self.inbound_port),
            ("outbound", self.outbound_port),
            ("control", self.control_port),
            ("admin", self.admin_port),
        ];

        for (i, (name, port)) in proxy_ports.iter().enumerate() {
            if *port == 0 {
                return Err(Error::ConfigValidation(format!("{name} port must be non-zero")));
            }
            if let Some((other, _)) = proxy_ports[i + 1..].iter().find(|(_, p)| p == port) {
                return Err(Error::ConfigValidation(format!(
                    "{name} and {other} ports must differ, both are {port}"
                )));
            }
            if self.ignore_inbound_ports.contains(port) {
                return Err(Error::ConfigValidation(format!(
                    "{name} port {port} cannot also be an ignored inbound port"
                )));
            }
        }

        for (name, port) in [("inbound", self.inbound_port), ("outbound", self.outbound_port)] {
            if self.ignore_outbound_ports.contains(&port) {
                return Err(Error::ConfigValidation(format!(
                    "{name} port {port} cannot also be an ignored outbound port"
                )));
            }
        }

        for (name, value) in [
            ("version", &self.version),
            ("proxy image", &self.proxy_image),
            ("init image", &self.init_image),
            ("control plane namespace", &self.control_plane_namespace),
        ] {
            if value.trim().is_empty() {
                return Err(Error::ConfigValidation(format!("{name} must not be empty")));
            }
        }

        for policy in [&self.proxy_image_pull_policy, &self.init_image_pull_policy] {
            if !PULL_POLICIES.contains(&policy.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "unknown image pull policy {policy:?}, expected one of {}",
                    PULL_POLICIES.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Fully qualified proxy image reference
    pub fn proxy_image_ref(&self) -> String {
        format!("{}:{}", self.proxy_image, self.version)
    }

    /// Fully qualified init image reference
    pub fn init_image_ref(&self) -> String {
        format!("{}:{}", self.init_image, self.version)
    }

    /// Destination service address the proxy dials
    pub fn destination_addr(&self) -> String {
        format!(
            "linkerd-destination.{}.svc.{}:{}",
            self.control_plane_namespace, self.cluster_domain, self.destination_port
        )
    }

    /// Apply `config.linkerd.io/*` overrides from a workload's annotations.
    ///
    /// Returns a new configuration; unparseable values keep the shared
    /// setting and are logged.
    pub fn with_overrides(&self, annotations: &BTreeMap<String, String>) -> ResolvedConfig {
        let mut config = self.clone();

        for (key, value) in annotations {
            let Some(setting) = key.strip_prefix(CONFIG_PREFIX) else {
                continue;
            };
            let value = value.trim();
            let applied = match setting {
                "proxy-image" => set_string(&mut config.proxy_image, value),
                "proxy-image-pull-policy" => set_string(&mut config.proxy_image_pull_policy, value),
                "init-image" => set_string(&mut config.init_image, value),
                "init-image-pull-policy" => set_string(&mut config.init_image_pull_policy, value),
                "proxy-version" => set_string(&mut config.version, value),
                "proxy-log-level" => set_string(&mut config.log_level, value),
                "proxy-uid" => set_parsed(&mut config.proxy_uid, value),
                "inbound-port" => set_parsed(&mut config.inbound_port, value),
                "outbound-port" => set_parsed(&mut config.outbound_port, value),
                "control-port" => set_parsed(&mut config.control_port, value),
                "admin-port" => set_parsed(&mut config.admin_port, value),
                "proxy-cpu-request" => set_optional(&mut config.proxy_cpu_request, value),
                "proxy-memory-request" => set_optional(&mut config.proxy_memory_request, value),
                "proxy-cpu-limit" => set_optional(&mut config.proxy_cpu_limit, value),
                "proxy-memory-limit" => set_optional(&mut config.proxy_memory_limit, value),
                "skip-inbound-ports" => set_ports(&mut config.ignore_inbound_ports, value),
                "skip-outbound-ports" => set_ports(&mut config.ignore_outbound_ports, value),
                "disable-identity" => match value.parse::<bool>() {
                    Ok(disabled) => {
                        config.identity_enabled = !disabled;
                        true
                    }
                    Err(_) => false,
                },
                _ => {
                    warn!(annotation = %key, "Ignoring unknown configuration annotation");
                    continue;
                }
            };

            if !applied {
                warn!(annotation = %key, value = %value, "Ignoring invalid configuration annotation");
            }
        }

        config
    }
}

/// Parse a comma separated port list such as `25,587`
pub fn parse_ports(value: &str) -> std::result::Result<Vec<u16>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u16>().map_err(|e| format!("invalid port {p:?}: {e}")))
        .collect()
}

fn set_string(field: &mut String, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    *field = value.to_string();
    true
}

fn set_optional(field: &mut Option<String>, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    *field = Some(value.to_string());
    true
}

fn set_parsed<T: std::str::FromStr>(field: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *field = parsed;
            true
        }
        Err(_) => false,
    }
}

fn set_ports(field: &mut Vec<u16>, value: &str) -> bool {
    match parse_ports(value) {
        Ok(ports) => {
            *field = ports;
            true
        }
        Err(_) => false,
    }
}
