use super::toolchain::{ToolCommand, ToolStatus, run_cancellable};
use super::{BuildConfig, Target, TargetBackend, TargetCapabilities};
use crate::generate::artifact::{CodeBuilder, CodeMap};
use crate::generate::context::{CancelToken, ProgressReporter};
use crate::model::{ActionDecl, InferredType, Port, ProgramModel, ReactorId};
use anyhow::{Context, Result, anyhow};
use convert_case::{Case, Casing};

/// Code emitter and toolchain driver for the C execution environment.
pub struct CBackend;

const RUNTIME_HEADER: &str = r#"#ifndef RHEA_RUNTIME_H
#define RHEA_RUNTIME_H

#include <stddef.h>
#include <stdint.h>

typedef int64_t interval_t;
typedef struct {
    interval_t time;
    uint32_t microstep;
} tag_t;

typedef struct {
    void* value;
    size_t length;
} token_t;

void lf_set_impl(void* port, const void* value, size_t size);
#define lf_set(port, value) \
    do { __typeof__(value) _v = (value); lf_set_impl((port), &_v, sizeof(_v)); } while (0)
void lf_set_token(void* port, void* token);
void lf_schedule_token(void* action, interval_t delay, void* token);
void lf_send_network_message(int socket, size_t length, unsigned char* buffer);
int lf_reactor_c_main(int argc, const char* argv[]);

#endif // RHEA_RUNTIME_H
"#;

const NET_COMMON_HEADER: &str = r#"#ifndef RHEA_NET_COMMON_H
#define RHEA_NET_COMMON_H

// Connectivity placeholders are resolved by the launcher, not at
// generation time.
#define RHEA_COORDINATOR_PORT_DEFAULT 15045

int lf_connect_to_coordinator(const char* host, int port);

#endif // RHEA_NET_COMMON_H
"#;

fn c_type(value_type: &InferredType) -> String {
    match value_type {
        InferredType::Void => "void*".to_string(),
        InferredType::Time => "interval_t".to_string(),
        InferredType::Named(name) => name.clone(),
    }
}

fn self_type(reactor_name: &str) -> String {
    format!("{}_self_t", reactor_name.to_case(Case::Snake))
}

impl CBackend {
    fn check_widths(&self, program: &ProgramModel, id: ReactorId) -> Result<()> {
        // C banks are sized at startup, so variable width is fine here; the
        // check still guards definitions coming from other front ends.
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
        Ok(())
    }
}

impl TargetBackend for CBackend {
    fn target(&self) -> Target {
        Target::C
    }

    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities {
            target: Target::C,
            supports_generics: false,
            supports_variable_width: true,
            compiler: "cc".to_string(),
            network_send: "lf_send_network_message",
        }
    }

    fn file_extension(&self) -> &'static str {
        "c"
    }

    fn time_type(&self) -> &'static str {
        "interval_t"
    }

    fn tag_type(&self) -> &'static str {
        "tag_t"
    }

    fn emit_preamble(&self, program: &ProgramModel) -> CodeMap {
        let mut code = CodeBuilder::new();
        code.pr("#ifndef RHEA_PREAMBLE_H");
        code.pr("#define RHEA_PREAMBLE_H");
        code.blank();
        for reactor in &program.reactors {
            if let Some(preamble) = &reactor.preamble {
                code.pr(format!("// from reactor {}", reactor.name));
                match &reactor.position {
                    Some(position) => code.pr_at(preamble, position),
                    None => code.pr(preamble),
                }
                code.blank();
            }
        }
        code.pr("#endif // RHEA_PREAMBLE_H");
        code.build("preamble.h")
    }

    fn emit_reactor(&self, program: &ProgramModel, id: ReactorId) -> Result<CodeMap> {
        self.check_widths(program, id)?;
        let reactor = program
            .resolve(id)
            .ok_or_else(|| anyhow!("Unresolvable reactor handle {id:?}"))?;
        let snake = reactor.name.to_case(Case::Snake);
        let self_t = self_type(&reactor.name);

        let mut code = CodeBuilder::new();
        code.pr(format!("// Reactor {} -- generated, do not edit.", reactor.name));
        code.pr("#include \"rhea_runtime.h\"");
        code.pr("#include \"preamble.h\"");
        code.blank();

        // Port payload structs.
        for port in reactor.inputs.iter().chain(reactor.outputs.iter()) {
            code.pr(format!(
                "typedef struct {{ int is_present; {} value; }} {snake}_{}_t;",
                c_type(&port.value_type),
                port.name
            ));
        }
        for action in &reactor.actions {
            code.pr(format!(
                "typedef struct {{ int is_present; {} value; void* token; }} {snake}_{}_t;",
                c_type(&action.value_type),
                action.name
            ));
        }
        code.blank();

        // Self struct: parameters then state.
        code.pr(format!("typedef struct {self_t} {{"));
        code.indent();
        for parameter in &reactor.parameters {
            code.pr(format!("{} {};", c_type(&parameter.value_type), parameter.name));
        }
        for state in &reactor.state {
            code.pr(format!("{} {};", c_type(&state.value_type), state.name));
        }
        if reactor.parameters.is_empty() && reactor.state.is_empty() {
            code.pr("char _dummy;");
        }
        code.unindent();
        code.pr(format!("}} {self_t};"));
        code.blank();

        for (number, reaction) in reactor.reactions.iter().enumerate() {
            code.pr(format!(
                "// Reaction {number}: triggers [{}]",
                reaction.triggers.join(", ")
            ));
            code.pr(format!(
                "void {snake}_reaction_{number}(void* instance_args) {{"
            ));
            code.indent();
            code.pr(format!("{self_t}* self = ({self_t}*)instance_args;"));
            code.pr("(void)self;");
            match &reaction.position {
                Some(position) => code.pr_at(&reaction.body, position),
                None => code.pr(&reaction.body),
            }
            code.unindent();
            code.pr("}");
            code.blank();
        }

        Ok(code.build(format!("{snake}.c")))
    }

    fn emit_main(&self, program: &ProgramModel) -> Result<CodeMap> {
        let main = program
            .main_reactor()
            .ok_or_else(|| anyhow!("Program '{}' has no main reactor", program.name))?;
        let mut code = CodeBuilder::new();
        code.pr(format!("// Program {} -- generated, do not edit.", program.name));
        code.pr("#include \"rhea_runtime.h\"");
        code.blank();
        code.pr(format!("// main reactor: {}", main.name));
        for instantiation in &main.instantiations {
            let child = program
                .resolve(instantiation.reactor)
                .ok_or_else(|| anyhow!("Unresolvable reactor handle {:?}", instantiation.reactor))?;
            code.pr(format!(
                "// instance {} : {}",
                instantiation.name, child.name
            ));
        }
        code.blank();
        code.pr("int main(int argc, const char* argv[]) {");
        code.indent();
        code.pr("return lf_reactor_c_main(argc, argv);");
        code.unindent();
        code.pr("}");
        Ok(code.build("main.c"))
    }

    fn delay_body(&self, action: &ActionDecl, port: &Port) -> String {
        // Token forwarding works for void payloads too; the C compiler owns
        // the type check.
        format!("lf_schedule_token({}, 0, {}->token);", action.name, port.name)
    }

    fn forward_body(&self, action: &ActionDecl, port: &Port) -> String {
        format!("lf_set_token({}, {}->token);", port.name, action.name)
    }

    fn runtime_support_files(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("rhea_runtime.h", RUNTIME_HEADER),
            ("rhea_net_common.h", NET_COMMON_HEADER),
        ]
    }

    fn build_descriptor(&self, unit: &str, sources: &[String]) -> CodeMap {
        let mut code = CodeBuilder::new();
        code.pr("cmake_minimum_required(VERSION 3.19)");
        code.pr(format!("project({unit} LANGUAGES C)"));
        code.pr("set(CMAKE_C_STANDARD 11)");
        code.blank();
        code.pr(format!("add_executable({unit}"));
        code.indent();
        for source in sources {
            code.pr(source);
        }
        code.unindent();
        code.pr(")");
        code.pr(format!(
            "target_include_directories({unit} PRIVATE ${{CMAKE_CURRENT_LIST_DIR}}/../include)"
        ));
        code.build("CMakeLists.txt")
    }

    fn emit_docker(&self, unit: &str) -> Option<CodeMap> {
        let mut code = CodeBuilder::new();
        code.pr("FROM alpine:3 AS builder");
        code.pr("RUN apk add --no-cache build-base cmake");
        code.pr("COPY . /src");
        code.pr("RUN cmake -S /src -B /build && cmake --build /build");
        code.blank();
        code.pr("FROM alpine:3");
        code.pr(format!("COPY --from=builder /build/{unit} /usr/local/bin/{unit}"));
        code.pr(format!("ENTRYPOINT [\"/usr/local/bin/{unit}\"]"));
        Some(code.build("Dockerfile"))
    }

    fn fast_check(&self, config: &BuildConfig, cancel: &CancelToken) -> Result<ToolStatus> {
        let compiler = config
            .compiler_override
            .clone()
            .unwrap_or_else(|| self.capabilities().compiler);
        let sources = list_sources(config, "c")?;
        let command = ToolCommand::new(compiler, &config.src_dir)
            .arg("-fsyntax-only")
            .args(["-I", "../include"])
            .args(sources);
        run_cancellable(&command, cancel)
    }

    fn compile(
        &self,
        config: &BuildConfig,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> Result<ToolStatus> {
        reporter.report(
            &format!("Configuring {}...", config.unit),
            crate::generate::context::GENERATED_PROGRESS,
        );
        let mut configure = ToolCommand::new("cmake", &config.src_dir).args([
            "-S",
            ".",
            "-B",
            "build",
            "-DCMAKE_BUILD_TYPE=Release",
        ]);
        if let Some(compiler) = &config.compiler_override {
            configure = configure.env("CC", compiler);
        }
        if run_cancellable(&configure, cancel)? == ToolStatus::Cancelled {
            return Ok(ToolStatus::Cancelled);
        }

        reporter.report(
            &format!("Building {}...", config.unit),
            crate::generate::context::GENERATED_PROGRESS,
        );
        let build = ToolCommand::new("cmake", &config.src_dir).args([
            "--build".to_string(),
            "build".to_string(),
            "--parallel".to_string(),
            config.jobs.to_string(),
        ]);
        run_cancellable(&build, cancel)
    }
}

/// Sorted source file names with the given extension directly in the unit
/// directory. Sorted so toolchain invocations are reproducible.
pub(super) fn list_sources(config: &BuildConfig, extension: &str) -> Result<Vec<String>> {
    let mut sources = vec![];
    let entries = std::fs::read_dir(&config.src_dir)
        .with_context(|| format!("Failed to list sources in {}", config.src_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(&format!(".{extension}")) {
            sources.push(name);
        }
    }
    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::simple_program;

    #[test]
    fn emits_self_struct_and_reaction_functions() {
        let program = simple_program(Target::C);
        let backend = CBackend;
        let map = backend.emit_reactor(&program, ReactorId(0)).unwrap();
        assert_eq!(map.file_name.to_str(), Some("source.c"));
        assert!(map.text.contains("typedef struct source_self_t"));
        assert!(map.text.contains("void source_reaction_0(void* instance_args)"));
        assert!(map.text.contains("lf_set(out, 42);"));
    }

    #[test]
    fn main_links_the_runtime_entry_point() {
        let program = simple_program(Target::C);
        let map = CBackend.emit_main(&program).unwrap();
        assert!(map.text.contains("lf_reactor_c_main(argc, argv)"));
    }

    #[test]
    fn build_descriptor_lists_every_source() {
        let map = CBackend.build_descriptor("simple", &["main.c".to_string(), "source.c".to_string()]);
        assert_eq!(map.file_name.to_str(), Some("CMakeLists.txt"));
        assert!(map.text.contains("add_executable(simple"));
        assert!(map.text.contains("main.c"));
        assert!(map.text.contains("source.c"));
    }

    #[test]
    fn delay_and_forward_bodies_do_not_inspect_value_types() {
        let action = ActionDecl {
            name: "act".to_string(),
            value_type: InferredType::Void,
            min_delay: None,
            physical: false,
        };
        let port = Port {
            name: "out".to_string(),
            value_type: InferredType::Void,
            width: 1,
            variable_width: false,
        };
        assert_eq!(
            CBackend.delay_body(&action, &port),
            "lf_schedule_token(act, 0, out->token);"
        );
        assert_eq!(
            CBackend.forward_body(&action, &port),
            "lf_set_token(out, act->token);"
        );
    }
}
