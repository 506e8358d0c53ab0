//! Builders for the containers and volumes injection adds

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, Probe, ResourceRequirements, SecretVolumeSource,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::annotations::{
    ADMIN_PORT_NAME, INIT_CONTAINER_NAME, PROXY_CONTAINER_NAME, PROXY_PORT_NAME, SECRETS_MOUNT_PATH,
    SECRETS_VOLUME, TRUST_ANCHORS_CONFIG_MAP, TRUST_ANCHORS_FILE, TRUST_ANCHORS_MOUNT_PATH,
    TRUST_ANCHORS_VOLUME,
};
use crate::config::ResolvedConfig;

const TERMINATION_MESSAGE_POLICY: &str = "FallbackToLogsOnError";

/// Build the proxy sidecar container
pub fn proxy_container(config: &ResolvedConfig, destination_addr: &str) -> Container {
    let mut env = vec![
        env_value("LINKERD2_PROXY_LOG", &config.log_level),
        env_value("LINKERD2_PROXY_DESTINATION_SVC_ADDR", destination_addr),
        env_value(
            "LINKERD2_PROXY_CONTROL_LISTEN_ADDR",
            &format!("0.0.0.0:{}", config.control_port),
        ),
        env_value(
            "LINKERD2_PROXY_ADMIN_LISTEN_ADDR",
            &format!("0.0.0.0:{}", config.admin_port),
        ),
        env_value(
            "LINKERD2_PROXY_OUTBOUND_LISTEN_ADDR",
            &format!("127.0.0.1:{}", config.outbound_port),
        ),
        env_value(
            "LINKERD2_PROXY_INBOUND_LISTEN_ADDR",
            &format!("0.0.0.0:{}", config.inbound_port),
        ),
        env_value(
            "LINKERD2_PROXY_DESTINATION_PROFILE_SUFFIXES",
            &format!("svc.{}.", config.cluster_domain),
        ),
        EnvVar {
            name: "_POD_NAMESPACE".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: None,
                    field_path: "metadata.namespace".to_string(),
                }),
                ..Default::default()
            }),
        },
    ];

    let volume_mounts = if config.identity_enabled {
        env.push(env_value("LINKERD2_PROXY_IDENTITY_DIR", SECRETS_MOUNT_PATH));
        env.push(env_value(
            "LINKERD2_PROXY_IDENTITY_TRUST_ANCHORS_FILE",
            &format!("{TRUST_ANCHORS_MOUNT_PATH}/{TRUST_ANCHORS_FILE}"),
        ));
        Some(vec![
            read_only_mount(TRUST_ANCHORS_VOLUME, TRUST_ANCHORS_MOUNT_PATH),
            read_only_mount(SECRETS_VOLUME, SECRETS_MOUNT_PATH),
        ])
    } else {
        env.push(env_value("LINKERD2_PROXY_IDENTITY_DISABLED", "disabled"));
        None
    };

    Container {
        name: PROXY_CONTAINER_NAME.to_string(),
        image: Some(config.proxy_image_ref()),
        image_pull_policy: Some(config.proxy_image_pull_policy.clone()),
        env: Some(env),
        ports: Some(vec![
            named_port(PROXY_PORT_NAME, config.inbound_port),
            named_port(ADMIN_PORT_NAME, config.admin_port),
        ]),
        liveness_probe: Some(http_probe("/metrics", config.admin_port, 10)),
        readiness_probe: Some(http_probe("/ready", config.admin_port, 2)),
        resources: proxy_resources(config),
        security_context: Some(SecurityContext {
            run_as_user: Some(config.proxy_uid),
            ..Default::default()
        }),
        termination_message_policy: Some(TERMINATION_MESSAGE_POLICY.to_string()),
        volume_mounts,
        ..Default::default()
    }
}

/// Build the init container that installs the iptables redirect rules
pub fn init_container(config: &ResolvedConfig) -> Container {
    let mut inbound_ignored = vec![config.control_port, config.admin_port];
    inbound_ignored.extend(config.ignore_inbound_ports.iter().copied());

    let mut args = vec![
        "--incoming-proxy-port".to_string(),
        config.inbound_port.to_string(),
        "--outgoing-proxy-port".to_string(),
        config.outbound_port.to_string(),
        "--proxy-uid".to_string(),
        config.proxy_uid.to_string(),
        "--inbound-ports-to-ignore".to_string(),
        join_ports(&inbound_ignored),
    ];
    if !config.ignore_outbound_ports.is_empty() {
        args.push("--outbound-ports-to-ignore".to_string());
        args.push(join_ports(&config.ignore_outbound_ports));
    }

    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(config.init_image_ref()),
        image_pull_policy: Some(config.init_image_pull_policy.clone()),
        args: Some(args),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                drop: None,
            }),
            privileged: Some(false),
            run_as_non_root: Some(false),
            run_as_user: Some(0),
            ..Default::default()
        }),
        termination_message_policy: Some(TERMINATION_MESSAGE_POLICY.to_string()),
        ..Default::default()
    }
}

/// Volumes carrying the trust anchors and the workload's identity secret
pub fn identity_volumes(secret_name: &str) -> Vec<Volume> {
    vec![
        Volume {
            name: TRUST_ANCHORS_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(TRUST_ANCHORS_CONFIG_MAP.to_string()),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: SECRETS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn env_value(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn named_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(port),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: u16, initial_delay_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            host: None,
            http_headers: None,
            path: Some(path.to_string()),
            port: IntOrString::Int(i32::from(port)),
            scheme: None,
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        ..Default::default()
    }
}

fn proxy_resources(config: &ResolvedConfig) -> Option<ResourceRequirements> {
    let requests = quantities(&config.proxy_cpu_request, &config.proxy_memory_request);
    let limits = quantities(&config.proxy_cpu_limit, &config.proxy_memory_limit);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        requests,
        limits,
        ..Default::default()
    })
}

fn quantities(cpu: &Option<String>, memory: &Option<String>) -> Option<BTreeMap<String, Quantity>> {
    let map: BTreeMap<String, Quantity> = [("cpu", cpu), ("memory", memory)]
        .into_iter()
        .filter_map(|(name, value)| Some((name.to_string(), Quantity(value.clone()?))))
        .collect();
    (!map.is_empty()).then_some(map)
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
