//! Pipeline driver
//!
//! Drains each source in order: split into documents, dispatch every
//! document, stream the resulting YAML as soon as it is ready and render
//! the source's reports once the source is exhausted.

use std::io::Write;

use tracing::{debug, info};

use crate::config::ResolvedConfig;
use crate::dispatch::dispatch;
use crate::error::{Error, Result};
use crate::reader::InputSource;
use crate::report::ReportRenderer;
use crate::splitter::DocumentSplitter;
use crate::transform::Transformer;

const DOCUMENT_SEPARATOR: &[u8] = b"---\n";
const OUTPUT_NAME: &str = "<output>";
const REPORT_NAME: &str = "<report>";

/// Counters for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub sources: usize,
    pub documents: usize,
    /// Documents whose bytes differ from the input
    pub changed: usize,
}

/// Runs one transformer over a set of sources
pub struct Driver<'a> {
    config: &'a ResolvedConfig,
    transformer: &'a dyn Transformer,
    renderer: &'a dyn ReportRenderer,
}

impl<'a> Driver<'a> {
    pub fn new(
        config: &'a ResolvedConfig,
        transformer: &'a dyn Transformer,
        renderer: &'a dyn ReportRenderer,
    ) -> Self {
        Self {
            config,
            transformer,
            renderer,
        }
    }

    /// Transform every source, writing manifests to `yaml_out` and reports
    /// to `report_out`.
    ///
    /// The first error stops the run. Output already written for earlier
    /// documents stays written and the error is also reported on
    /// `report_out` as `Error: <message>`.
    pub fn run(
        &self,
        sources: &[InputSource],
        yaml_out: &mut dyn Write,
        report_out: &mut dyn Write,
    ) -> Result<RunStats> {
        match self.run_sources(sources, yaml_out, report_out) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                let _ = writeln!(report_out, "Error: {err}");
                Err(err)
            }
        }
    }

    fn run_sources(
        &self,
        sources: &[InputSource],
        yaml_out: &mut dyn Write,
        report_out: &mut dyn Write,
    ) -> Result<RunStats> {
        self.config.validate()?;

        let mode = self.transformer.mode();
        info!(%mode, sources = sources.len(), "Starting run");

        let mut stats = RunStats::default();
        for source in sources {
            self.run_source(source, yaml_out, report_out, &mut stats)?;
            stats.sources += 1;
        }

        info!(
            %mode,
            documents = stats.documents,
            changed = stats.changed,
            "Run complete"
        );
        Ok(stats)
    }

    fn run_source(
        &self,
        source: &InputSource,
        yaml_out: &mut dyn Write,
        report_out: &mut dyn Write,
        stats: &mut RunStats,
    ) -> Result<()> {
        let name = source.name();
        debug!(source = %name, "Reading source");

        let mut splitter = DocumentSplitter::new(source.open()?, name.as_str());
        let mut reports = Vec::new();
        while let Some(document) = splitter.next() {
            let document = document?;
            let result = dispatch(&document, &name, self.config, self.transformer)
                .map_err(|e| relocate(e, splitter.document_start()))?;

            write_document(yaml_out, &result.bytes)?;
            stats.documents += 1;
            if result.changed {
                stats.changed += 1;
            }
            reports.extend(result.reports);
        }
        yaml_out.flush().map_err(|e| Error::io(OUTPUT_NAME, e))?;

        self.renderer
            .render(&reports, report_out)
            .map_err(|e| Error::io(REPORT_NAME, e))?;
        Ok(())
    }
}

fn write_document(out: &mut dyn Write, bytes: &[u8]) -> Result<()> {
    let write = |out: &mut dyn Write| -> std::io::Result<()> {
        out.write_all(bytes)?;
        if !bytes.ends_with(b"\n") {
            out.write_all(b"\n")?;
        }
        out.write_all(DOCUMENT_SEPARATOR)
    };
    write(out).map_err(|e| Error::io(OUTPUT_NAME, e))
}

/// Shift a document-relative parse line to its line in the source
fn relocate(err: Error, document_start: usize) -> Error {
    match err {
        Error::Parse {
            source_name,
            line: Some(line),
            message,
        } => Error::Parse {
            source_name,
            line: Some(line + document_start - 1),
            message,
        },
        other => other,
    }
}
