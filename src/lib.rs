//! Stencil Core - Template-to-Source Transpiler
//!
//! Turns a small templating language into generated source for a host
//! runtime, incrementally:
//! 1. A single-pass, stack-based scan engine rewrites template syntax via
//!    pluggable conversion strategies.
//! 2. A generation pipeline resolves sources by name, records each unit's
//!    dependency closure, deduplicates work per batch, and answers staleness
//!    and reverse-dependency queries.
//!
//! Rendering, and the host language's compiler/loader, live behind traits.

pub mod artifacts;
pub mod attributes;
pub mod hashing;
pub mod pipeline;
pub mod resolve;
pub mod scanner;
pub mod strategies;

pub use artifacts::{GeneratedArtifact, HostCompiler, ModuleInfo};
pub use pipeline::{classify_name, CompilationPipeline, PipelineConfig, PipelineError};
pub use resolve::{DirectoryResolver, MemoryResolver, SourceResolver};
pub use scanner::{
    Reference, Scan, ScanConfig, ScanEngine, ScanError, ScanOutcome, Strategy, UnitKind,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
