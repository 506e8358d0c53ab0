//! Proxy removal

use std::collections::BTreeMap;

use tracing::debug;

use super::{Mode, Transformer, WorkloadContext};
use crate::annotations::{
    is_injected_label, INIT_CONTAINER_NAME, INJECTED_ANNOTATIONS, PROXY_CONTAINER_NAME,
    SECRETS_VOLUME, TRUST_ANCHORS_VOLUME,
};
use crate::error::Result;
use crate::report::InjectionReport;
use crate::workload::Workload;

/// Removes everything injection added
#[derive(Debug, Clone, Copy, Default)]
pub struct Uninjector;

impl Transformer for Uninjector {
    fn mode(&self) -> Mode {
        Mode::Uninject
    }

    fn transform(
        &self,
        workload: &mut Workload,
        _context: &WorkloadContext,
        report: &mut InjectionReport,
    ) -> Result<bool> {
        let kind = workload.kind();
        let template = workload.pod_template_mut();

        if !template
            .spec
            .containers
            .iter()
            .any(|c| c.name == PROXY_CONTAINER_NAME)
        {
            report.not_injected = true;
            return Ok(false);
        }

        template
            .spec
            .containers
            .retain(|c| c.name != PROXY_CONTAINER_NAME);

        if let Some(init) = template.spec.init_containers.as_mut() {
            init.retain(|c| c.name != INIT_CONTAINER_NAME);
        }
        clear_if_empty(&mut template.spec.init_containers);

        if let Some(volumes) = template.spec.volumes.as_mut() {
            volumes.retain(|v| v.name != TRUST_ANCHORS_VOLUME && v.name != SECRETS_VOLUME);
        }
        clear_if_empty(&mut template.spec.volumes);

        template.meta.annotations = strip(template.meta.annotations.take(), |key| {
            INJECTED_ANNOTATIONS.contains(&key)
        });
        template.meta.labels = strip(template.meta.labels.take(), is_injected_label);

        report.applied = true;
        debug!(kind, name = %report.name, "Removed proxy");
        Ok(true)
    }
}

fn clear_if_empty<T>(list: &mut Option<Vec<T>>) {
    if list.as_ref().is_some_and(Vec::is_empty) {
        *list = None;
    }
}

/// Copy a map without the keys injection owns; `None` once nothing is left
fn strip(
    map: Option<BTreeMap<String, String>>,
    injected: impl Fn(&str) -> bool,
) -> Option<BTreeMap<String, String>> {
    let kept: BTreeMap<String, String> = map?
        .into_iter()
        .filter(|(key, _)| !injected(key.as_str()))
        .collect();
    (!kept.is_empty()).then_some(kept)
}
