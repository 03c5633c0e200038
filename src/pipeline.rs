//! Generation Pipeline - Dependency-Tracked Incremental Compilation
//!
//! Single entry point for turning template names into persisted, compilable
//! artifacts. The pipeline resolves sources, drives the scan engine per unit,
//! records each unit's flattened dependency closure, deduplicates generation
//! within a batch, and answers the two invalidation queries: "is this stale?"
//! and "who depends on this?".

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::{self, GeneratedArtifact, HostCompiler, ModuleInfo};
use crate::resolve::SourceResolver;
use crate::scanner::{ScanConfig, ScanEngine, ScanError, UnitKind};
use crate::strategies;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static GENERATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_generation_call_count() -> u32 {
    GENERATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_generation_call_count() {
    GENERATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template not found: {name}, referenced at {referenced_by}:{line}")]
    UnresolvedReference {
        name: String,
        referenced_by: String,
        line: usize,
    },

    #[error("Failed to scan {unit}: {error}")]
    ScanFailed { unit: String, error: ScanError },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host compilation failed: {message} (files: {files:?})")]
    CompilationFailed {
        message: String,
        files: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Directory generated artifacts are written under.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Extension of generated source artifacts.
    #[serde(default = "default_generated_extension")]
    pub generated_extension: String,
    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("generated")
}

fn default_generated_extension() -> String {
    "gen".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            generated_extension: default_generated_extension(),
            scan: ScanConfig::default(),
        }
    }
}

/// Classify a template name by its path: `tag/` and `layout/` prefixes mark
/// reusable units, everything else is a top-level template.
pub fn classify_name(name: &str) -> UnitKind {
    if name.starts_with("tag/") {
        UnitKind::Tag
    } else if name.starts_with("layout/") {
        UnitKind::Layout
    } else {
        UnitKind::Template
    }
}

/// One generation invocation's scope of deduplication.
#[derive(Default)]
struct Batch {
    seen: HashSet<String>,
    closures: HashMap<String, Vec<String>>,
    artifacts: Vec<GeneratedArtifact>,
}

/// The generation pipeline - single entry point for template compilation.
pub struct CompilationPipeline {
    config: PipelineConfig,
    engine: ScanEngine,
    resolver: Box<dyn SourceResolver>,
    host: Option<Box<dyn HostCompiler>>,
    // name -> flattened dependency closure, in insertion order so reverse
    // queries report units in the order they were first generated.
    dependencies: RwLock<Vec<(String, Vec<String>)>>,
    param_order: RwLock<HashMap<String, Vec<String>>>,
    modules: RwLock<HashMap<String, ModuleInfo>>,
}

impl CompilationPipeline {
    pub fn new(config: PipelineConfig, resolver: Box<dyn SourceResolver>) -> Self {
        let engine = strategies::standard_engine(config.scan.clone());
        Self {
            config,
            engine,
            resolver,
            host: None,
            dependencies: RwLock::new(Vec::new()),
            param_order: RwLock::new(HashMap::new()),
            modules: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_host_compiler(mut self, host: Box<dyn HostCompiler>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generate and persist the named units and their transitive references.
    /// The result is insertion-ordered and contains each unit at most once,
    /// no matter how many paths reached it within this batch.
    pub fn generate(&self, names: &[&str]) -> Result<Vec<GeneratedArtifact>, PipelineError> {
        let mut batch = Batch::default();
        for name in names {
            self.generate_unit(classify_name(name), name, &mut batch, None)?;
        }
        artifacts::write_artifacts(&self.config.output_root, &batch.artifacts)?;
        Ok(batch.artifacts)
    }

    /// Generate everything the resolver can enumerate.
    pub fn generate_all(&self) -> Result<Vec<GeneratedArtifact>, PipelineError> {
        let names = self.resolver.resolve_all_names();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.generate(&refs)
    }

    /// Generate, persist, and hand the written source files to the host
    /// compiler. Returns the source file names relative to the output root.
    pub fn precompile(
        &self,
        names: &[&str],
        extra_compile_path: Option<&Path>,
    ) -> Result<Vec<String>, PipelineError> {
        let artifacts = self.generate(names)?;
        let files: Vec<PathBuf> = artifacts
            .iter()
            .map(|a| self.config.output_root.join(&a.source_file))
            .collect();

        if let Some(host) = &self.host {
            host.compile(&files, extra_compile_path).map_err(|message| {
                PipelineError::CompilationFailed {
                    message,
                    files: files.iter().map(|f| f.display().to_string()).collect(),
                }
            })?;
        }

        Ok(artifacts.into_iter().map(|a| a.source_file).collect())
    }

    pub fn precompile_all(
        &self,
        extra_compile_path: Option<&Path>,
    ) -> Result<Vec<String>, PipelineError> {
        let names = self.resolver.resolve_all_names();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.precompile(&refs, extra_compile_path)
    }

    /// Metadata for a template, regenerating first when it was never
    /// generated here or is stale. This is the incremental load path.
    pub fn load(&self, name: &str) -> Result<ModuleInfo, PipelineError> {
        let recorded = {
            let deps = self
                .dependencies
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            deps.iter().any(|(n, _)| n == name)
        };

        if !recorded || self.has_changed(name) {
            self.precompile(&[name], None)?;
        }

        let module = artifacts::module_name(name);
        self.module_info(&module)
            .ok_or_else(|| PipelineError::TemplateNotFound(name.to_string()))
    }

    /// True when the unit's own source changed, or any unit in its recorded
    /// dependency closure did.
    pub fn has_changed(&self, name: &str) -> bool {
        if self.resolver.has_changed(name) {
            return true;
        }
        let deps = self
            .dependencies
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some((_, closure)) = deps.iter().find(|(n, _)| n == name) else {
            return false;
        };
        closure.iter().any(|dep| self.resolver.has_changed(dep))
    }

    /// Reverse dependency query: every recorded unit whose closure contains
    /// `name`.
    pub fn templates_using(&self, name: &str) -> Vec<String> {
        self.dependencies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, closure)| closure.iter().any(|dep| dep == name))
            .map(|(unit, _)| unit.clone())
            .collect()
    }

    /// Recorded dependency closure of a unit, if it was generated here.
    pub fn dependencies_of(&self, name: &str) -> Option<Vec<String>> {
        self.dependencies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, closure)| closure.clone())
    }

    /// Metadata by generated module name.
    pub fn module_info(&self, module_name: &str) -> Option<ModuleInfo> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_name)
            .cloned()
    }

    /// Recorded positional parameter order of a unit.
    pub fn param_order(&self, name: &str) -> Option<Vec<String>> {
        self.param_order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Generate one unit and descend into its references. Returns the unit's
    /// flattened dependency closure so callers can absorb it into their own.
    fn generate_unit(
        &self,
        kind: UnitKind,
        name: &str,
        batch: &mut Batch,
        referenced_from: Option<(&str, usize)>,
    ) -> Result<Vec<String>, PipelineError> {
        if !batch.seen.insert(name.to_string()) {
            // Already generated (or in flight) within this batch: the caller
            // has recorded its edge, nothing left to do but report the
            // closure we know about.
            return Ok(batch.closures.get(name).cloned().unwrap_or_default());
        }

        #[cfg(feature = "test-hooks")]
        GENERATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let source = self.resolve_source(name, referenced_from)?;
        let module_name = artifacts::module_name(name);
        let prologue = format!("@module {}\n", module_name);

        let outcome = self
            .engine
            .scan_unit(&source, Some(&prologue), kind)
            .map_err(|error| PipelineError::ScanFailed {
                unit: name.to_string(),
                error,
            })?;

        let mut closure: Vec<String> = Vec::new();
        for reference in &outcome.references {
            push_unique(&mut closure, &reference.name);
            let child = self.generate_unit(
                reference.kind,
                &reference.name,
                batch,
                Some((name, reference.line)),
            )?;
            for dep in &child {
                push_unique(&mut closure, dep);
            }
        }

        self.record_dependencies(name, &closure);
        self.param_order
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), outcome.params.clone());
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                module_name.clone(),
                ModuleInfo {
                    name: name.to_string(),
                    module_name: module_name.clone(),
                    kind,
                    params: outcome.params,
                    dependencies: closure.clone(),
                },
            );

        batch.closures.insert(name.to_string(), closure.clone());
        batch.artifacts.push(GeneratedArtifact {
            name: name.to_string(),
            module_name,
            source_file: artifacts::source_file_name(name, &self.config.generated_extension),
            source: outcome.source,
            binary_chunks: outcome.binary_chunks,
        });

        Ok(closure)
    }

    fn resolve_source(
        &self,
        name: &str,
        referenced_from: Option<(&str, usize)>,
    ) -> Result<String, PipelineError> {
        match self.resolver.resolve(name) {
            Some(source) => Ok(source),
            None => Err(match referenced_from {
                Some((referenced_by, line)) => PipelineError::UnresolvedReference {
                    name: name.to_string(),
                    referenced_by: referenced_by.to_string(),
                    line,
                },
                None => PipelineError::TemplateNotFound(name.to_string()),
            }),
        }
    }

    // Replace the unit's recorded closure wholesale; stale entries are never
    // merged.
    fn record_dependencies(&self, name: &str, closure: &[String]) {
        let mut deps = self
            .dependencies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = deps.iter_mut().find(|(n, _)| n == name) {
            entry.1 = closure.to_vec();
        } else {
            deps.push((name.to_string(), closure.to_vec()));
        }
    }
}

fn push_unique(set: &mut Vec<String>, value: &str) {
    if !set.iter().any(|existing| existing == value) {
        set.push(value.to_string());
    }
}
