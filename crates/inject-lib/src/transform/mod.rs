//! Sidecar injection and removal
//!
//! The dispatcher hands each decoded workload to a [`Transformer`], which
//! decides whether the pod template is eligible, mutates it in place and
//! fills in the resource's report. The dispatcher serializes the workload
//! only when the transformer says it changed.

mod inject;
mod proxy;
mod uninject;

pub use inject::Injector;
pub use proxy::{identity_volumes, init_container, proxy_container};
pub use uninject::Uninjector;

use k8s_openapi::api::core::v1::PodSpec;
use serde::Serialize;

use crate::error::Result;
use crate::report::InjectionReport;
use crate::workload::Workload;

/// Direction of a transform run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Inject,
    Uninject,
}

impl Mode {
    /// Past-tense verb used in reports
    pub fn verb(&self) -> &'static str {
        match self {
            Mode::Inject => "injected",
            Mode::Uninject => "uninjected",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Inject => write!(f, "inject"),
            Mode::Uninject => write!(f, "uninject"),
        }
    }
}

/// Facts about a workload that the dispatcher derives from its identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadContext {
    /// Destination address replacing the cluster DNS name, if any
    pub destination_override: Option<String>,
}

/// A per-workload mutation
pub trait Transformer {
    fn mode(&self) -> Mode;

    /// Mutate the workload in place and record the outcome on `report`.
    ///
    /// Returns whether the workload changed.
    fn transform(
        &self,
        workload: &mut Workload,
        context: &WorkloadContext,
        report: &mut InjectionReport,
    ) -> Result<bool>;
}

/// Whether any container declares a UDP port
pub(crate) fn uses_udp(spec: &PodSpec) -> bool {
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .flat_map(|c| c.ports.iter().flatten())
        .any(|p| p.protocol.as_deref() == Some("UDP"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort};

    fn container(protocol: Option<&str>) -> Container {
        Container {
            name: "dns".to_string(),
            ports: Some(vec![ContainerPort {
                container_port: 53,
                protocol: protocol.map(str::to_string),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_uses_udp() {
        let spec = PodSpec {
            containers: vec![container(Some("UDP"))],
            ..Default::default()
        };
        assert!(uses_udp(&spec));

        let spec = PodSpec {
            containers: vec![container(Some("TCP")), container(None)],
            ..Default::default()
        };
        assert!(!uses_udp(&spec));
    }

    #[test]
    fn test_mode_verbs() {
        assert_eq!(Mode::Inject.verb(), "injected");
        assert_eq!(Mode::Uninject.verb(), "uninjected");
        assert_eq!(Mode::Uninject.to_string(), "uninject");
    }
}
