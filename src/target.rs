pub mod c;
pub mod python;
pub mod toolchain;

use crate::generate::artifact::CodeMap;
use crate::generate::context::{CancelToken, ProgressReporter};
use crate::model::{ActionDecl, Port, ProgramModel, ReactorId};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of an execution environment the backend can emit code for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    C,
    Python,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::C, Target::Python];
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::C => write!(f, "C"),
            Target::Python => write!(f, "Python"),
        }
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Target::C),
            "python" | "py" => Ok(Target::Python),
            other => Err(anyhow!("Unsupported target '{other}'")),
        }
    }
}

/// Capability flags consulted before generating constructs a target may not
/// support. Unsupported combinations are reported, not attempted.
#[derive(Debug, Clone)]
pub struct TargetCapabilities {
    pub target: Target,
    pub supports_generics: bool,
    pub supports_variable_width: bool,
    /// Default toolchain compiler; overridable via target properties.
    pub compiler: String,
    /// Runtime primitive the synthesized send reaction invokes.
    pub network_send: &'static str,
}

impl TargetCapabilities {
    /// Fold the program's compiler override into the capability set, so
    /// compatibility checks see the configured toolchain, not the default.
    pub fn with_compiler(mut self, compiler: Option<&str>) -> Self {
        if let Some(compiler) = compiler {
            self.compiler = compiler.to_string();
        }
        self
    }
}

/// Per-unit toolchain invocation parameters, derived by the pipeline.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Executable name for this compiled unit.
    pub unit: String,
    /// Directory holding the unit's generated sources.
    pub src_dir: PathBuf,
    /// Host-level build parallelism requested from the toolchain.
    pub jobs: usize,
    /// Compiler executable override, passed through as an environment
    /// variable on the subprocess, never hardcoded into descriptors.
    pub compiler_override: Option<String>,
}

/// Shared per-execution-environment contract. One concrete implementation per
/// target, selected through [`backend_for`] — a flat dispatch table instead of
/// an inheritance chain across unrelated targets.
pub trait TargetBackend: Send + Sync {
    fn target(&self) -> Target;

    fn capabilities(&self) -> TargetCapabilities;

    /// Extension of emitted source files, without the dot.
    fn file_extension(&self) -> &'static str;

    /// Target-specific representation of a logical duration.
    fn time_type(&self) -> &'static str;

    /// Target-specific representation of a logical tag (time + microstep).
    fn tag_type(&self) -> &'static str;

    /// File-level user code blocks for one source-file scope.
    fn emit_preamble(&self, program: &ProgramModel) -> CodeMap;

    fn emit_reactor(&self, program: &ProgramModel, id: ReactorId) -> Result<CodeMap>;

    fn emit_main(&self, program: &ProgramModel) -> Result<CodeMap>;

    /// Body of the synthesized reaction that schedules a port's payload on a
    /// delay action. Void-valued ports are left to the target toolchain.
    fn delay_body(&self, action: &ActionDecl, port: &Port) -> String;

    /// Body of the synthesized reaction that writes an action's payload back
    /// to a port, on the far side of a delay or network hop.
    fn forward_body(&self, action: &ActionDecl, port: &Port) -> String;

    /// Fixed runtime helper files copied into the shared include directory.
    fn runtime_support_files(&self) -> &'static [(&'static str, &'static str)];

    /// Build descriptor (e.g. a CMake file) for one compiled unit.
    fn build_descriptor(&self, unit: &str, sources: &[String]) -> CodeMap;

    /// Container-image descriptor for one unit, when the target supports it.
    fn emit_docker(&self, _unit: &str) -> Option<CodeMap> {
        None
    }

    /// Syntax-only check of the generated sources, used by the fast feedback
    /// build mode in place of a full compile.
    fn fast_check(&self, config: &BuildConfig, cancel: &CancelToken) -> Result<toolchain::ToolStatus>;

    /// Invoke the target's external toolchain: a configure step producing
    /// build descriptors, then a parallel build step. Must surface the
    /// toolchain's own diagnostic text verbatim on non-zero exit and kill the
    /// subprocess on cancellation.
    fn compile(
        &self,
        config: &BuildConfig,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<toolchain::ToolStatus>;
}

/// Dispatch table keyed on the target identifier.
pub fn backend_for(target: Target) -> Result<Box<dyn TargetBackend>> {
    match target {
        Target::C => Ok(Box::new(c::CBackend)),
        Target::Python => Ok(Box::new(python::PythonBackend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_all_targets() {
        for target in Target::ALL {
            let backend = backend_for(target).unwrap();
            assert_eq!(backend.target(), target);
            assert_eq!(backend.capabilities().target, target);
        }
    }

    #[test]
    fn compiler_override_replaces_the_default() {
        let overridden = backend_for(Target::C)
            .unwrap()
            .capabilities()
            .with_compiler(Some("g++"));
        assert_eq!(overridden.compiler, "g++");

        let unchanged = backend_for(Target::C).unwrap().capabilities().with_compiler(None);
        assert_eq!(unchanged.compiler, "cc");
    }

    #[test]
    fn target_parses_case_insensitively() {
        assert_eq!(Target::from_str("c").unwrap(), Target::C);
        assert_eq!(Target::from_str("Python").unwrap(), Target::Python);
        assert_eq!(Target::from_str("py").unwrap(), Target::Python);
        assert!(Target::from_str("rust").is_err());
    }

    #[test]
    fn time_and_tag_types_differ_per_target() {
        let c = backend_for(Target::C).unwrap();
        let py = backend_for(Target::Python).unwrap();
        assert_ne!(c.time_type(), py.time_type());
        assert_ne!(c.tag_type(), py.tag_type());
    }
}
