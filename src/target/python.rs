use super::c::list_sources;
use super::toolchain::{ToolCommand, ToolStatus, run_cancellable};
use super::{BuildConfig, Target, TargetBackend, TargetCapabilities};
use crate::generate::artifact::{CodeBuilder, CodeMap};
use crate::generate::context::{CancelToken, ProgressReporter};
use crate::model::{ActionDecl, Port, ProgramModel, ReactorId};
use anyhow::{Result, anyhow};
use convert_case::{Case, Casing};

/// Code emitter and toolchain driver for the Python execution environment.
/// "Compilation" here is an interpreter byte-compile pass; there is no
/// machine-code stage.
pub struct PythonBackend;

const RUNTIME_MODULE: &str = r#""""Runtime support shims for generated federate modules."""

import pickle  # noqa: F401  (re-exported for generated serializer code)

COORDINATOR_PORT_DEFAULT = 15045


class Tag:
    def __init__(self, time, microstep=0):
        self.time = time
        self.microstep = microstep


def send_network_message(socket, length, buffer):
    raise NotImplementedError("linked against the real runtime at deployment")
"#;

impl TargetBackend for PythonBackend {
    fn target(&self) -> Target {
        Target::Python
    }

    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities {
            target: Target::Python,
            supports_generics: false,
            supports_variable_width: false,
            compiler: "python3".to_string(),
            network_send: "send_network_message",
        }
    }

    fn file_extension(&self) -> &'static str {
        "py"
    }

    fn time_type(&self) -> &'static str {
        "int"
    }

    fn tag_type(&self) -> &'static str {
        "Tag"
    }

    fn emit_preamble(&self, program: &ProgramModel) -> CodeMap {
        let mut code = CodeBuilder::new();
        code.pr("\"\"\"File-level user code blocks.\"\"\"");
        code.blank();
        for reactor in &program.reactors {
            if let Some(preamble) = &reactor.preamble {
                code.pr(format!("# from reactor {}", reactor.name));
                match &reactor.position {
                    Some(position) => code.pr_at(preamble, position),
                    None => code.pr(preamble),
                }
                code.blank();
            }
        }
        code.build("preamble.py")
    }

    fn emit_reactor(&self, program: &ProgramModel, id: ReactorId) -> Result<CodeMap> {
        let capabilities = self.capabilities();
        let reactor = program
            .resolve(id)
            .ok_or_else(|| anyhow!("Unresolvable reactor handle {id:?}"))?;
        for port in reactor.inputs.iter().chain(reactor.outputs.iter()) {
            if port.variable_width && !capabilities.supports_variable_width {
                return Err(anyhow!(
                    "Port '{}' of reactor '{}' has variable width, which the {} target does not support",
                    port.name,
                    reactor.name,
                    capabilities.target
                ));
            }
        }

        let mut code = CodeBuilder::new();
        code.pr(format!("# Reactor {} -- generated, do not edit.", reactor.name));
        code.pr("from rhea_runtime import *  # noqa: F401,F403");
        code.pr("from preamble import *  # noqa: F401,F403");
        code.blank();
        code.blank();
        code.pr(format!("class {}:", reactor.name.to_case(Case::Pascal)));
        code.indent();
        code.pr("def __init__(self):");
        code.indent();
        let mut initialized = false;
        for parameter in &reactor.parameters {
            let default = parameter.default.as_deref().unwrap_or("None");
            code.pr(format!("self.{} = {}", parameter.name, default));
            initialized = true;
        }
        for state in &reactor.state {
            let initial = state.initial.as_deref().unwrap_or("None");
            code.pr(format!("self.{} = {}", state.name, initial));
            initialized = true;
        }
        if !initialized {
            code.pr("pass");
        }
        code.unindent();
        code.blank();
        for (number, reaction) in reactor.reactions.iter().enumerate() {
            let arguments: Vec<&str> = reaction
                .triggers
                .iter()
                .chain(reaction.effects.iter())
                .map(String::as_str)
                .filter(|t| *t != "startup" && *t != "shutdown")
                .collect();
            let parameter_list = if arguments.is_empty() {
                String::new()
            } else {
                format!(", {}", arguments.join(", "))
            };
            code.pr(format!("def reaction_{number}(self{parameter_list}):"));
            code.indent();
            match &reaction.position {
                Some(position) => code.pr_at(&reaction.body, position),
                None => code.pr(&reaction.body),
            }
            code.unindent();
            code.blank();
        }
        code.unindent();

        Ok(code.build(format!("{}.py", reactor.name.to_case(Case::Snake))))
    }

    fn emit_main(&self, program: &ProgramModel) -> Result<CodeMap> {
        let main = program
            .main_reactor()
            .ok_or_else(|| anyhow!("Program '{}' has no main reactor", program.name))?;
        let mut code = CodeBuilder::new();
        code.pr(format!("# Program {} -- generated, do not edit.", program.name));
        for instantiation in &main.instantiations {
            let child = program
                .resolve(instantiation.reactor)
                .ok_or_else(|| anyhow!("Unresolvable reactor handle {:?}", instantiation.reactor))?;
            code.pr(format!(
                "from {} import {}",
                child.name.to_case(Case::Snake),
                child.name.to_case(Case::Pascal)
            ));
        }
        code.blank();
        code.blank();
        code.pr("def main():");
        code.indent();
        for instantiation in &main.instantiations {
            let child = program
                .resolve(instantiation.reactor)
                .ok_or_else(|| anyhow!("Unresolvable reactor handle {:?}", instantiation.reactor))?;
            code.pr(format!(
                "{} = {}()",
                instantiation.name,
                child.name.to_case(Case::Pascal)
            ));
        }
        if main.instantiations.is_empty() {
            code.pr("pass");
        }
        code.unindent();
        code.blank();
        code.blank();
        code.pr("if __name__ == \"__main__\":");
        code.indent();
        code.pr("main()");
        code.unindent();
        Ok(code.build("main.py"))
    }

    fn delay_body(&self, action: &ActionDecl, port: &Port) -> String {
        format!("{}.schedule(0, {}.value)", action.name, port.name)
    }

    fn forward_body(&self, action: &ActionDecl, port: &Port) -> String {
        format!("{}.set({}.value)", port.name, action.name)
    }

    fn runtime_support_files(&self) -> &'static [(&'static str, &'static str)] {
        &[("rhea_runtime.py", RUNTIME_MODULE)]
    }

    fn build_descriptor(&self, unit: &str, sources: &[String]) -> CodeMap {
        let mut code = CodeBuilder::new();
        code.pr("from setuptools import setup");
        code.blank();
        code.pr("setup(");
        code.indent();
        code.pr(format!("name=\"{unit}\","));
        code.pr("version=\"0.0.0\",");
        code.pr(format!(
            "py_modules=[{}],",
            sources
                .iter()
                .filter_map(|s| s.strip_suffix(".py"))
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        code.unindent();
        code.pr(")");
        code.build("setup.py")
    }

    fn emit_docker(&self, unit: &str) -> Option<CodeMap> {
        let mut code = CodeBuilder::new();
        code.pr("FROM python:3.12-slim");
        code.pr(format!("COPY . /app/{unit}"));
        code.pr(format!("WORKDIR /app/{unit}"));
        code.pr("ENTRYPOINT [\"python3\", \"main.py\"]");
        Some(code.build("Dockerfile"))
    }

    fn fast_check(&self, config: &BuildConfig, cancel: &CancelToken) -> Result<ToolStatus> {
        // Byte-compiling is already the fastest syntax check the interpreter
        // offers.
        self.byte_compile(config, cancel)
    }

    fn compile(
        &self,
        config: &BuildConfig,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ToolStatus> {
        reporter.report(
            &format!("Checking interpreter for {}...", config.unit),
            crate::generate::context::GENERATED_PROGRESS,
        );
        let interpreter = self.interpreter(config);
        let configure = ToolCommand::new(&interpreter, &config.src_dir).args([
            "-c",
            "import sys; sys.exit(0 if sys.version_info >= (3, 8) else 1)",
        ]);
        if run_cancellable(&configure, cancel)? == ToolStatus::Cancelled {
            return Ok(ToolStatus::Cancelled);
        }

        reporter.report(
            &format!("Byte-compiling {}...", config.unit),
            crate::generate::context::GENERATED_PROGRESS,
        );
        self.byte_compile(config, cancel)
    }
}

impl PythonBackend {
    fn interpreter(&self, config: &BuildConfig) -> String {
        config
            .compiler_override
            .clone()
            .unwrap_or_else(|| self.capabilities().compiler)
    }

    fn byte_compile(&self, config: &BuildConfig, cancel: &CancelToken) -> Result<ToolStatus> {
        let sources = list_sources(config, "py")?;
        let command = ToolCommand::new(self.interpreter(config), &config.src_dir)
            .args(["-m", "py_compile"])
            .args(sources);
        run_cancellable(&command, cancel)
    }
}
