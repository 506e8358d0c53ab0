//! Configuration layering for the CLI
//!
//! Defaults come from [`ResolvedConfig::default`]; an optional config file
//! and `LINKERD_*` environment variables are merged over them with the
//! `config` crate, and command line flags are applied last by the caller.

use std::path::Path;

use anyhow::{Context, Result};
use linkerd_inject::config::parse_ports;
use linkerd_inject::ResolvedConfig;
use serde::Deserialize;

/// Environment variable prefix, e.g. `LINKERD_PROXY_IMAGE`
pub const ENV_PREFIX: &str = "LINKERD";

/// Settings read from the config file and environment.
///
/// Every field is optional; unset fields keep the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    pub control_plane_namespace: Option<String>,
    pub proxy_version: Option<String>,
    pub proxy_image: Option<String>,
    pub init_image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub inbound_port: Option<u16>,
    pub outbound_port: Option<u16>,
    pub control_port: Option<u16>,
    pub admin_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub proxy_uid: Option<i64>,
    pub proxy_log_level: Option<String>,
    pub proxy_cpu_request: Option<String>,
    pub proxy_memory_request: Option<String>,
    pub proxy_cpu_limit: Option<String>,
    pub proxy_memory_limit: Option<String>,
    /// Comma separated, e.g. `25,587`
    pub skip_inbound_ports: Option<String>,
    pub skip_outbound_ports: Option<String>,
    pub disable_identity: Option<bool>,
    pub linkerd_cni_enabled: Option<bool>,
    pub cluster_domain: Option<String>,
}

impl Settings {
    /// Load settings from an optional file and the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Load settings, reading the environment from `env` when given
    pub fn load_from(file: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        // Converted per field; `LINKERD_PROXY_VERSION=1.10` stays a string
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).source(env));

        let settings = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        Ok(settings)
    }

    /// Merge these settings over `config`
    pub fn apply(&self, config: &mut ResolvedConfig) -> Result<()> {
        set(&mut config.control_plane_namespace, &self.control_plane_namespace);
        set(&mut config.version, &self.proxy_version);
        set(&mut config.proxy_image, &self.proxy_image);
        set(&mut config.init_image, &self.init_image);
        set(&mut config.proxy_image_pull_policy, &self.image_pull_policy);
        set(&mut config.init_image_pull_policy, &self.image_pull_policy);
        set(&mut config.inbound_port, &self.inbound_port);
        set(&mut config.outbound_port, &self.outbound_port);
        set(&mut config.control_port, &self.control_port);
        set(&mut config.admin_port, &self.admin_port);
        set(&mut config.destination_port, &self.destination_port);
        set(&mut config.proxy_uid, &self.proxy_uid);
        set(&mut config.log_level, &self.proxy_log_level);
        set(&mut config.cluster_domain, &self.cluster_domain);

        set_optional(&mut config.proxy_cpu_request, &self.proxy_cpu_request);
        set_optional(&mut config.proxy_memory_request, &self.proxy_memory_request);
        set_optional(&mut config.proxy_cpu_limit, &self.proxy_cpu_limit);
        set_optional(&mut config.proxy_memory_limit, &self.proxy_memory_limit);

        if let Some(ports) = &self.skip_inbound_ports {
            config.ignore_inbound_ports = parse_ports(ports)
                .map_err(anyhow::Error::msg)
                .context("Invalid skip_inbound_ports")?;
        }
        if let Some(ports) = &self.skip_outbound_ports {
            config.ignore_outbound_ports = parse_ports(ports)
                .map_err(anyhow::Error::msg)
                .context("Invalid skip_outbound_ports")?;
        }

        if let Some(disabled) = self.disable_identity {
            config.identity_enabled = !disabled;
        }
        if let Some(cni) = self.linkerd_cni_enabled {
            config.cni_enabled = cni;
        }
        Ok(())
    }
}

fn set<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn set_optional(field: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        field.clone_from(value);
    }
}
