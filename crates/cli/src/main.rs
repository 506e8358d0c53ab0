//! Linkerd CLI
//!
//! Adds the Linkerd proxy to Kubernetes manifests, or removes it. Manifests
//! are read from files, directories or stdin; transformed YAML is written
//! to stdout and a per-resource report to stderr.

mod config;
mod output;

use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use linkerd_inject::{
    read_sources, Driver, Injector, ReportRenderer, ResolvedConfig, SilentReport, TextReport,
    Transformer, Uninjector,
};
use tracing::debug;

use crate::config::Settings;

/// Linkerd CLI
#[derive(Parser)]
#[command(name = "linkerd")]
#[command(author, version, about = "Add or remove the Linkerd proxy in Kubernetes manifests", long_about = None)]
pub struct Cli {
    /// Namespace the Linkerd control plane is installed in
    #[arg(long, global = true, env = "LINKERD_NAMESPACE")]
    pub control_plane_namespace: Option<String>,

    /// Config file (YAML, TOML or JSON) with default proxy settings
    #[arg(long, global = true, env = "LINKERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Do not print the per-resource report
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add the Linkerd proxy to Kubernetes manifests
    Inject {
        /// Files or directories with manifests, or "-" for stdin
        #[arg(required = true)]
        paths: Vec<String>,

        #[command(flatten)]
        proxy: ProxyArgs,
    },

    /// Remove the Linkerd proxy from Kubernetes manifests
    Uninject {
        /// Files or directories with manifests, or "-" for stdin
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

/// Proxy settings, overriding the config file and environment
#[derive(Args, Debug, Default)]
pub struct ProxyArgs {
    /// Linkerd proxy container image name
    #[arg(long)]
    pub proxy_image: Option<String>,

    /// Linkerd init container image name
    #[arg(long)]
    pub init_image: Option<String>,

    /// Image pull policy for both injected containers
    #[arg(long)]
    pub image_pull_policy: Option<String>,

    /// Tag for the proxy and init images
    #[arg(long, short = 'v')]
    pub proxy_version: Option<String>,

    /// Proxy port for inbound traffic
    #[arg(long)]
    pub inbound_port: Option<u16>,

    /// Proxy port for outbound traffic
    #[arg(long)]
    pub outbound_port: Option<u16>,

    /// Proxy port for the control API
    #[arg(long)]
    pub control_port: Option<u16>,

    /// Proxy port for metrics and probes
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// User ID the proxy runs as
    #[arg(long)]
    pub proxy_uid: Option<i64>,

    /// Log level for the proxy
    #[arg(long)]
    pub proxy_log_level: Option<String>,

    /// CPU request for the proxy container
    #[arg(long)]
    pub proxy_cpu_request: Option<String>,

    /// Memory request for the proxy container
    #[arg(long)]
    pub proxy_memory_request: Option<String>,

    /// CPU limit for the proxy container
    #[arg(long)]
    pub proxy_cpu_limit: Option<String>,

    /// Memory limit for the proxy container
    #[arg(long)]
    pub proxy_memory_limit: Option<String>,

    /// Inbound ports that bypass the proxy
    #[arg(long, value_delimiter = ',')]
    pub skip_inbound_ports: Vec<u16>,

    /// Outbound ports that bypass the proxy
    #[arg(long, value_delimiter = ',')]
    pub skip_outbound_ports: Vec<u16>,

    /// Disable mTLS identity for injected proxies
    #[arg(long)]
    pub disable_identity: bool,

    /// Skip the init container; traffic redirection is set up by the Linkerd CNI plugin
    #[arg(long)]
    pub linkerd_cni_enabled: bool,
}

impl ProxyArgs {
    fn apply(&self, config: &mut ResolvedConfig) {
        let strings = [
            (&self.proxy_image, &mut config.proxy_image),
            (&self.init_image, &mut config.init_image),
            (&self.proxy_version, &mut config.version),
            (&self.proxy_log_level, &mut config.log_level),
        ];
        for (flag, field) in strings {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        if let Some(policy) = &self.image_pull_policy {
            config.proxy_image_pull_policy = policy.clone();
            config.init_image_pull_policy = policy.clone();
        }

        let ports = [
            (self.inbound_port, &mut config.inbound_port),
            (self.outbound_port, &mut config.outbound_port),
            (self.control_port, &mut config.control_port),
            (self.admin_port, &mut config.admin_port),
        ];
        for (flag, field) in ports {
            if let Some(port) = flag {
                *field = port;
            }
        }
        if let Some(uid) = self.proxy_uid {
            config.proxy_uid = uid;
        }

        let resources = [
            (&self.proxy_cpu_request, &mut config.proxy_cpu_request),
            (&self.proxy_memory_request, &mut config.proxy_memory_request),
            (&self.proxy_cpu_limit, &mut config.proxy_cpu_limit),
            (&self.proxy_memory_limit, &mut config.proxy_memory_limit),
        ];
        for (flag, field) in resources {
            if flag.is_some() {
                field.clone_from(flag);
            }
        }

        if !self.skip_inbound_ports.is_empty() {
            config.ignore_inbound_ports = self.skip_inbound_ports.clone();
        }
        if !self.skip_outbound_ports.is_empty() {
            config.ignore_outbound_ports = self.skip_outbound_ports.clone();
        }
        if self.disable_identity {
            config.identity_enabled = false;
        }
        if self.linkerd_cni_enabled {
            config.cni_enabled = true;
        }
    }
}

/// A pipeline failure the driver has already written to the report stream
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct Reported(#[from] linkerd_inject::Error);

fn main() -> ExitCode {
    let cli = Cli::parse();
    output::init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.downcast_ref::<Reported>().is_none() {
                output::print_error(&format!("{err:#}"));
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let mut config = ResolvedConfig::default();
    settings.apply(&mut config)?;
    if let Some(namespace) = &cli.control_plane_namespace {
        config.control_plane_namespace = namespace.clone();
    }

    let (paths, proxy) = match &cli.command {
        Commands::Inject { paths, proxy } => (paths, Some(proxy)),
        Commands::Uninject { paths } => (paths, None),
    };
    if let Some(proxy) = proxy {
        proxy.apply(&mut config);
    }
    debug!(?config, "Resolved configuration");

    let mut sources = Vec::new();
    for path in paths {
        let found = read_sources(path).with_context(|| format!("Failed to read {path}"))?;
        sources.extend(found);
    }

    let injector = Injector::new(&config);
    let transformer: &dyn Transformer = match cli.command {
        Commands::Inject { .. } => &injector,
        Commands::Uninject { .. } => &Uninjector,
    };
    let renderer: &dyn ReportRenderer = if cli.quiet { &SilentReport } else { &TextReport };

    let mut yaml_out = BufWriter::new(io::stdout().lock());
    let mut report_out = io::stderr();
    Driver::new(&config, transformer, renderer)
        .run(&sources, &mut yaml_out, &mut report_out)
        .map_err(Reported)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_inject_flags() {
        let cli = Cli::try_parse_from([
            "linkerd",
            "--control-plane-namespace",
            "mesh",
            "inject",
            "app.yml",
            "-",
            "-v",
            "edge-19.1.2",
            "--skip-inbound-ports",
            "25,587",
            "--linkerd-cni-enabled",
        ])
        .unwrap();

        assert_eq!(cli.control_plane_namespace.as_deref(), Some("mesh"));
        let Commands::Inject { paths, proxy } = cli.command else {
            panic!("expected inject");
        };
        assert_eq!(paths, vec!["app.yml", "-"]);

        let mut config = ResolvedConfig::default();
        proxy.apply(&mut config);
        assert_eq!(config.version, "edge-19.1.2");
        assert_eq!(config.ignore_inbound_ports, vec![25, 587]);
        assert!(config.cni_enabled);
        assert!(config.identity_enabled);
    }

    #[test]
    fn test_empty_flags_keep_config() {
        let mut config = ResolvedConfig {
            ignore_outbound_ports: vec![443],
            ..ResolvedConfig::default()
        };
        let expected = config.clone();
        ProxyArgs::default().apply(&mut config);
        assert_eq!(config, expected);
    }

    #[test]
    fn test_uninject_requires_path() {
        assert!(Cli::try_parse_from(["linkerd", "uninject"]).is_err());
    }
}
