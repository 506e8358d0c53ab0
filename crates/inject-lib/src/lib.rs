//! Proxy injection library for Kubernetes manifests
//!
//! This crate provides the manifest pipeline behind `linkerd inject` and
//! `linkerd uninject`:
//! - Input discovery (stdin, files, directory trees)
//! - Multi-document YAML splitting
//! - Dispatch over workload kinds, including `List` documents
//! - Sidecar injection and removal driven by a resolved proxy configuration
//! - Per-resource reporting

pub mod annotations;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod reader;
pub mod report;
pub mod splitter;
pub mod transform;
pub mod workload;


pub use config::ResolvedConfig;
pub use dispatch::{dispatch, Dispatched};
pub use driver::{Driver, RunStats};
pub use error::{Error, Result};
pub use reader::{read_sources, InputSource};
pub use report::{InjectionReport, ReportRenderer, SilentReport, TextReport};
pub use splitter::DocumentSplitter;
pub use transform::{Injector, Mode, Transformer, Uninjector};
pub use workload::{ResourceMeta, Workload};
