//! Generated Artifacts and Module Metadata
//!
//! One generated unit becomes a source artifact plus, when the scan hoisted
//! long static segments, a companion binary artifact. The metadata surface
//! (`ModuleInfo`) is what a loader/render-time dispatcher needs to
//! instantiate and invoke generated modules without reflection: a stable
//! module name, the positional parameter list, and the dependency closure.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hashing;
use crate::scanner::UnitKind;

/// Metadata for one generated template unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// The template name the unit was generated from.
    pub name: String,
    /// Stable module path the host loader resolves, e.g. `generated::tag::nav`.
    pub module_name: String,
    pub kind: UnitKind,
    /// Declared parameters in order; the positional calling convention.
    pub params: Vec<String>,
    /// Flattened transitive dependency closure recorded at generation time.
    pub dependencies: Vec<String>,
}

/// One unit's generation output, ready to persist.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub name: String,
    pub module_name: String,
    /// Source file name relative to the output root.
    pub source_file: String,
    pub source: String,
    pub binary_chunks: Vec<Vec<u8>>,
}

impl GeneratedArtifact {
    /// Companion binary artifact name, next to the source artifact.
    pub fn binary_file(&self) -> String {
        format!("{}.bin", self.source_file)
    }

    /// Fingerprint of the generated source, for determinism checks and
    /// build-tool caching.
    pub fn fingerprint(&self) -> String {
        hashing::fingerprint(&self.source)
    }
}

/// Host-language module path for a template name:
/// `tag/nav.stc` becomes `generated::tag::nav`.
pub fn module_name(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    format!("generated::{}", stem.replace('/', "::"))
}

/// Source artifact file name for a template name, swapping the template
/// extension for the generated one.
pub fn source_file_name(name: &str, generated_extension: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    format!("{}.{}", stem, generated_extension)
}

/// Persist all artifacts under the output root, overwrite-on-regenerate.
/// Any I/O failure aborts; units already written stay written.
pub fn write_artifacts(root: &Path, artifacts: &[GeneratedArtifact]) -> io::Result<()> {
    for artifact in artifacts {
        let path = root.join(&artifact.source_file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &artifact.source)?;

        if !artifact.binary_chunks.is_empty() {
            let mut bytes = Vec::new();
            for chunk in &artifact.binary_chunks {
                bytes.extend_from_slice(chunk);
            }
            fs::write(root.join(artifact.binary_file()), bytes)?;
        }
    }
    Ok(())
}

/// The host runtime's compiler/loader, abstracted away: it takes the written
/// source files plus an optional additional compile-path and either makes the
/// modules loadable or reports failure as a message.
pub trait HostCompiler: Send + Sync {
    fn compile(&self, files: &[PathBuf], extra_compile_path: Option<&Path>)
        -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(module_name("page.stc"), "generated::page");
        assert_eq!(module_name("tag/nav.stc"), "generated::tag::nav");
        assert_eq!(module_name("layout/base.stc"), "generated::layout::base");
    }

    #[test]
    fn test_source_file_name_swaps_extension() {
        assert_eq!(source_file_name("tag/nav.stc", "gen"), "tag/nav.gen");
        assert_eq!(source_file_name("noext", "gen"), "noext.gen");
    }

    #[test]
    fn test_write_artifacts_with_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = GeneratedArtifact {
            name: "tag/nav.stc".to_string(),
            module_name: module_name("tag/nav.stc"),
            source_file: "tag/nav.gen".to_string(),
            source: "@module generated::tag::nav\n@text(0)".to_string(),
            binary_chunks: vec![b"part one ".to_vec(), b"part two".to_vec()],
        };

        write_artifacts(dir.path(), std::slice::from_ref(&artifact)).unwrap();

        let source = fs::read_to_string(dir.path().join("tag/nav.gen")).unwrap();
        assert_eq!(source, artifact.source);
        let bin = fs::read(dir.path().join("tag/nav.gen.bin")).unwrap();
        assert_eq!(bin, b"part one part two");
    }
}
