//! Per-resource reports and their rendering
//!
//! Reports are written to a stream separate from the manifests so the YAML
//! output can be piped straight into `kubectl apply -f -`.

use std::io::{self, Write};

use serde::Serialize;

use crate::transform::Mode;

/// Outcome of transforming one resource document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionReport {
    pub mode: Mode,
    pub kind: String,
    pub name: String,
    /// Whether the resource was injected or uninjected
    pub applied: bool,
    /// Pod template carries `linkerd.io/inject: disabled`
    pub inject_disabled: bool,
    /// Pod template uses `hostNetwork: true`
    pub host_network: bool,
    /// A sidecar proxy is already present
    pub sidecar: bool,
    /// Kind is not one that carries an injectable pod template
    pub unsupported_resource: bool,
    /// Document has no `kind` field
    pub missing_kind: bool,
    /// Uninject found no proxy to remove
    pub not_injected: bool,
    /// A container declares UDP ports, which the proxy does not intercept
    pub udp: bool,
}

impl InjectionReport {
    pub fn new(mode: Mode, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode,
            kind: kind.into(),
            name: name.into(),
            applied: false,
            inject_disabled: false,
            host_network: false,
            sidecar: false,
            unsupported_resource: false,
            missing_kind: false,
            not_injected: false,
            udp: false,
        }
    }

    /// Report for a document the pipeline does not act on
    pub fn unsupported(mode: Mode, kind: Option<&str>, name: &str) -> Self {
        let mut report = Self::new(mode, kind.unwrap_or_default(), name);
        report.unsupported_resource = true;
        report.missing_kind = kind.is_none();
        report
    }

    /// Whether an eligibility check or an unsupported kind kept the resource unchanged
    pub fn skipped(&self) -> bool {
        self.inject_disabled
            || self.host_network
            || self.sidecar
            || self.unsupported_resource
            || self.missing_kind
            || self.not_injected
    }

    /// Reasons to show in the summary block
    pub fn reasons(&self) -> Vec<&'static str> {
        let flags = [
            (self.missing_kind, "document missing \"kind\" field"),
            (
                self.unsupported_resource && !self.missing_kind,
                "not a supported resource kind",
            ),
            (self.inject_disabled, "pods have \"linkerd.io/inject: disabled\""),
            (self.host_network, "pods use \"hostNetwork: true\""),
            (self.sidecar, "pods already contain a sidecar proxy"),
            (self.not_injected, "pods do not contain a linkerd-proxy"),
            (self.udp, "uses UDP ports; UDP traffic is not proxied"),
        ];
        flags
            .into_iter()
            .filter_map(|(set, reason)| set.then_some(reason))
            .collect()
    }

    fn subject(&self) -> String {
        format!("{} {:?}", self.kind.to_lowercase(), self.name)
    }

    /// The single line describing this resource
    pub fn line(&self) -> String {
        if self.missing_kind {
            return "document missing \"kind\" field, skipped".to_string();
        }
        let verb = if self.applied && !self.skipped() {
            self.mode.verb()
        } else {
            "skipped"
        };
        format!("{} {}", self.subject(), verb)
    }
}

/// Renders the reports of one source
pub trait ReportRenderer {
    fn render(&self, reports: &[InjectionReport], out: &mut dyn Write) -> io::Result<()>;
}

/// Human readable report
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReport;

impl ReportRenderer for TextReport {
    fn render(&self, reports: &[InjectionReport], out: &mut dyn Write) -> io::Result<()> {
        if reports.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        for report in reports {
            writeln!(out, "{}", report.line())?;
        }

        let notes: Vec<(&InjectionReport, Vec<&str>)> = reports
            .iter()
            .map(|r| (r, r.reasons()))
            .filter(|(_, reasons)| !reasons.is_empty())
            .collect();

        if !notes.is_empty() {
            writeln!(out)?;
            let applied = reports.iter().filter(|r| r.applied).count();
            let mode = reports[0].mode;
            writeln!(
                out,
                "Summary: {} of {} resources {}",
                applied,
                reports.len(),
                mode.verb()
            )?;
            for (report, reasons) in notes {
                let subject = if report.missing_kind {
                    "document".to_string()
                } else {
                    report.subject()
                };
                for reason in reasons {
                    writeln!(out, "  {subject}: {reason}")?;
                }
            }
        }

        writeln!(out)?;
        Ok(())
    }
}

/// Discards reports
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReport;

impl ReportRenderer for SilentReport {
    fn render(&self, _reports: &[InjectionReport], _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}
