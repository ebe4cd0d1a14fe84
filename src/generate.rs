pub mod artifact;
pub mod context;

use crate::diagnostics::{DiagnosticBag, SourcePosition};
use crate::federation::{self, FederationPlan, launcher, partition::partition};
use crate::helpers;
use crate::model::{ActionDecl, Connection, Port, ProgramModel, ReactorId};
use crate::target::{BuildConfig, TargetBackend, backend_for, toolchain::ToolStatus};
use anyhow::Result;
use regex::Regex;
use artifact::{CodeBuilder, CodeMap};
use context::{
    BuildContext, BuildMode, COMPILED_PROGRESS, GENERATED_PROGRESS, START_PROGRESS, VALIDATED_PROGRESS,
};
use convert_case::{Case, Casing};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};

/// Terminal status of one build invocation. Exactly one per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    /// No main reactor; nothing to do, no files written.
    Nothing,
    Cancelled,
    Failed,
    /// Sources emitted; compilation skipped by configuration or build mode.
    Generated,
    Compiled,
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildResult::Nothing => write!(f, "nothing to build"),
            BuildResult::Cancelled => write!(f, "cancelled"),
            BuildResult::Failed => write!(f, "failed"),
            BuildResult::Generated => write!(f, "generated"),
            BuildResult::Compiled => write!(f, "compiled"),
        }
    }
}

/// Result plus every diagnostic collected on the way. Every terminal
/// non-success status other than `Cancelled` carries at least one diagnostic
/// explaining why.
#[derive(Debug)]
pub struct BuildOutcome {
    pub result: BuildResult,
    pub diagnostics: DiagnosticBag,
}

impl BuildOutcome {
    fn new(result: BuildResult, diagnostics: DiagnosticBag) -> Self {
        Self { result, diagnostics }
    }
}

/// One generated compilation unit: its toolchain configuration plus the code
/// maps, kept alive through compilation so toolchain diagnostics can be
/// translated back to model source positions.
struct GeneratedUnit {
    config: BuildConfig,
    maps: Vec<CodeMap>,
}

/// Root of the generated tree for one program.
pub fn source_gen_root(out_root: &Path, program: &ProgramModel) -> PathBuf {
    out_root
        .join("src-gen")
        .join(program.name.to_case(Case::Snake))
}

/// Drive one build: validate, generate, and (configuration permitting)
/// compile. Cancellation is checked at every state transition; progress is
/// reported at the fixed 0/33/67/100 checkpoints.
pub fn build(program: &ProgramModel, out_root: &Path, ctx: &BuildContext) -> BuildOutcome {
    let mut diagnostics = DiagnosticBag::new();
    ctx.reporter.report("Validating...", START_PROGRESS);

    if program.main_reactor().is_none() {
        diagnostics.warning(format!(
            "Program '{}' has no main reactor; no code will be generated",
            program.name
        ));
        return BuildOutcome::new(BuildResult::Nothing, diagnostics);
    }

    diagnostics.merge(program.validate());
    ctx.reporter.report("Validation complete.", VALIDATED_PROGRESS);
    if ctx.cancel.is_cancelled() {
        return BuildOutcome::new(BuildResult::Cancelled, diagnostics);
    }
    if diagnostics.has_errors() {
        return BuildOutcome::new(BuildResult::Failed, diagnostics);
    }

    ctx.reporter.report("Generating code...", VALIDATED_PROGRESS);
    if ctx.cancel.is_cancelled() {
        return BuildOutcome::new(BuildResult::Cancelled, diagnostics);
    }

    let backend = match backend_for(program.target) {
        Ok(backend) => backend,
        Err(err) => {
            diagnostics.error(err.to_string());
            return BuildOutcome::new(BuildResult::Failed, diagnostics);
        }
    };

    let units = match generate(program, backend.as_ref(), out_root, ctx, &mut diagnostics) {
        Ok(mut units) => {
            for unit in &mut units {
                unit.config.jobs = ctx.jobs();
            }
            units
        }
        Err(()) => {
            ctx.reporter.report("Code generation complete.", GENERATED_PROGRESS);
            return BuildOutcome::new(BuildResult::Failed, diagnostics);
        }
    };
    ctx.reporter.report("Code generation complete.", GENERATED_PROGRESS);

    if diagnostics.has_errors() {
        return BuildOutcome::new(BuildResult::Failed, diagnostics);
    }
    if ctx.cancel.is_cancelled() {
        return BuildOutcome::new(BuildResult::Cancelled, diagnostics);
    }
    if ctx.generate_only {
        diagnostics.info(format!("Generated {} unit(s); compilation skipped", units.len()));
        return BuildOutcome::new(BuildResult::Generated, diagnostics);
    }

    if ctx.mode == BuildMode::FastFeedback {
        for unit in &units {
            match backend.fast_check(&unit.config, &ctx.cancel) {
                Ok(ToolStatus::Success) => {}
                Ok(ToolStatus::Cancelled) => {
                    return BuildOutcome::new(BuildResult::Cancelled, diagnostics);
                }
                Err(err) => report_toolchain_error(&mut diagnostics, unit, &err),
            }
        }
        let result = if diagnostics.has_errors() {
            BuildResult::Failed
        } else {
            BuildResult::Generated
        };
        return BuildOutcome::new(result, diagnostics);
    }

    // Units are independent; the toolchain gets its own parallelism degree,
    // so invoke it per unit in order and aggregate the worst status. Partial
    // sources are preserved for inspection on failure.
    for unit in &units {
        match backend.compile(&unit.config, &ctx.cancel, ctx.reporter) {
            Ok(ToolStatus::Success) => {}
            Ok(ToolStatus::Cancelled) => {
                return BuildOutcome::new(BuildResult::Cancelled, diagnostics);
            }
            Err(err) => report_toolchain_error(&mut diagnostics, unit, &err),
        }
    }
    if diagnostics.has_errors() {
        return BuildOutcome::new(BuildResult::Failed, diagnostics);
    }
    ctx.reporter.report("Compilation complete.", COMPILED_PROGRESS);
    BuildOutcome::new(BuildResult::Compiled, diagnostics)
}

/// Emit all sources. Returns the per-unit build configurations, or Err when a
/// fatal model error (e.g. a broken federation) prevented generation.
/// Per-federate failures are recorded as diagnostics; sibling federates are
/// still attempted.
fn generate(
    program: &ProgramModel,
    backend: &dyn TargetBackend,
    out_root: &Path,
    ctx: &BuildContext,
    diagnostics: &mut DiagnosticBag,
) -> std::result::Result<Vec<GeneratedUnit>, ()> {
    let src_gen = source_gen_root(out_root, program);

    if !program.federated {
        let unit = program.name.to_case(Case::Snake);
        match generate_unit(program, backend, &src_gen.join(&unit), &unit, None, None) {
            Ok(generated) => {
                write_runtime_support(backend, &src_gen, diagnostics);
                Ok(vec![generated])
            }
            Err(err) => {
                diagnostics.error(format!("Generation failed for '{}': {err}", program.name));
                Err(())
            }
        }
    } else {
        let plan = match partition(program) {
            Ok(plan) => plan,
            Err(err) => {
                diagnostics.error(err.to_string());
                return Err(());
            }
        };

        // Federates have no data dependencies on each other after
        // partitioning; generate them concurrently, each into its own
        // subdirectory so writes cannot race.
        let results: Vec<(String, Result<GeneratedUnit>)> = plan
            .federates
            .par_iter()
            .filter(|federate| ctx.matches_filter(&federate.name))
            .map(|federate| {
                let dir = src_gen.join(federate.directory_name());
                let unit = federate.executable(&plan.program);
                let result = generate_unit(program, backend, &dir, &unit, Some(&plan), Some(federate));
                (federate.name.clone(), result)
            })
            .collect();

        let mut units = vec![];
        for (federate_name, result) in results {
            match result {
                Ok(generated) => units.push(generated),
                Err(err) => diagnostics.error(format!(
                    "Generation failed for federate '{federate_name}': {err}"
                )),
            }
        }

        if !units.is_empty() {
            write_runtime_support(backend, &src_gen, diagnostics);
            if let Err(err) = write_launcher(&plan, &src_gen) {
                diagnostics.error(format!("Failed to write launcher artifacts: {err}"));
            }
        }
        Ok(units)
    }
}

/// Generate one compiled unit (the whole program, or one federate fragment).
/// All code maps are built before anything is written, so a failing unit
/// leaves no partial placeholder sources behind.
fn generate_unit(
    program: &ProgramModel,
    backend: &dyn TargetBackend,
    dir: &Path,
    unit: &str,
    plan: Option<&FederationPlan>,
    federate: Option<&federation::Federate>,
) -> Result<GeneratedUnit> {
    let mut maps: Vec<CodeMap> = vec![backend.emit_preamble(program)];

    let reactor_ids: Vec<ReactorId> = match federate {
        Some(federate) => federate.reactors.clone(),
        None => (0..program.reactors.len()).map(ReactorId).collect(),
    };
    for id in reactor_ids {
        maps.push(backend.emit_reactor(program, id)?);
    }

    let connections: Vec<Connection> = match (plan, federate) {
        (Some(plan), Some(federate)) => {
            maps.push(federation::emit_federate_main(program, plan, federate, backend)?);
            maps.push(federation::emit_network_glue(program, plan, federate, backend)?);
            federate.intra_connections.clone()
        }
        _ => {
            maps.push(backend.emit_main(program)?);
            program
                .main_reactor()
                .map(|main| main.connections.clone())
                .unwrap_or_default()
        }
    };
    if let Some(map) = emit_delay_glue(&connections, backend) {
        maps.push(map);
    }

    let extension = format!(".{}", backend.file_extension());
    let mut sources: Vec<String> = maps
        .iter()
        .map(|map| map.file_name.to_string_lossy().to_string())
        .filter(|name| name.ends_with(&extension))
        .collect();
    sources.sort();
    maps.push(backend.build_descriptor(unit, &sources));

    if program.target_properties.docker
        && let Some(map) = backend.emit_docker(unit)
    {
        maps.push(map);
    }

    for map in &maps {
        map.write_to(dir)?;
    }

    Ok(GeneratedUnit {
        config: BuildConfig {
            unit: unit.to_string(),
            src_dir: dir.to_path_buf(),
            jobs: num_cpus::get().max(1),
            compiler_override: program.target_properties.compiler.clone(),
        },
        maps,
    })
}

/// Record a toolchain failure, positioned at the model source location when
/// the tool output references a generated file and line.
fn report_toolchain_error(diagnostics: &mut DiagnosticBag, unit: &GeneratedUnit, err: &anyhow::Error) {
    let message = format!("Toolchain failure for '{}': {err}", unit.config.unit);
    match translate_toolchain_position(&unit.maps, &err.to_string()) {
        Some(position) => diagnostics.error_at(message, position),
        None => diagnostics.error(message),
    }
}

/// Scan toolchain output for `file:line` references into generated sources
/// and map the first resolvable one back to an original program position.
fn translate_toolchain_position(maps: &[CodeMap], output: &str) -> Option<SourcePosition> {
    let reference = Regex::new(r"([\w./-]+):(\d+)").ok()?;
    for captures in reference.captures_iter(output) {
        let Ok(line) = captures[2].parse::<u32>() else {
            continue;
        };
        let Some(name) = Path::new(&captures[1]).file_name() else {
            continue;
        };
        if let Some(map) = maps.iter().find(|map| map.file_name.as_os_str() == name)
            && let Some(position) = map.translate(line)
        {
            return Some(position.clone());
        }
    }
    None
}

/// Synthesized action/reaction pairs for `after`-delayed connections kept
/// inside one unit.
fn emit_delay_glue(connections: &[Connection], backend: &dyn TargetBackend) -> Option<CodeMap> {
    let delayed: Vec<&Connection> = connections.iter().filter(|c| c.after.is_some()).collect();
    if delayed.is_empty() {
        return None;
    }
    let mut code = CodeBuilder::new();
    let comment = if backend.target() == crate::target::Target::C { "//" } else { "#" };
    code.pr(format!("{comment} Delayed-connection glue -- generated, do not edit."));
    code.blank();
    for (number, connection) in delayed.iter().enumerate() {
        let action = ActionDecl {
            name: format!("delay_{number}"),
            value_type: connection.value_type.clone(),
            min_delay: connection.after,
            physical: false,
        };
        let source_port = Port {
            name: connection.source.to_string(),
            value_type: connection.value_type.clone(),
            width: 1,
            variable_width: false,
        };
        let sink_port = Port {
            name: connection.sink.to_string(),
            value_type: connection.value_type.clone(),
            width: 1,
            variable_width: false,
        };
        code.pr(format!(
            "{comment} {} -> {} after {}{}",
            connection.source,
            connection.sink,
            connection.after.unwrap_or(0),
            if backend.target() == crate::target::Target::C { " ns" } else { "" }
        ));
        code.pr(backend.delay_body(&action, &source_port));
        code.pr(backend.forward_body(&action, &sink_port));
        code.blank();
    }
    Some(code.build(format!("delay_glue.{}", backend.file_extension())))
}

fn write_runtime_support(backend: &dyn TargetBackend, src_gen: &Path, diagnostics: &mut DiagnosticBag) {
    let include = src_gen.join("include");
    for (name, contents) in backend.runtime_support_files() {
        if let Err(err) = helpers::write_if_changed(&include.join(name), contents) {
            diagnostics.error(format!("Failed to copy runtime support file '{name}': {err}"));
        }
    }
}

fn write_launcher(plan: &FederationPlan, src_gen: &Path) -> Result<()> {
    let descriptor = launcher::descriptor(plan)?;
    launcher::descriptor_code_map(&descriptor)?.write_to(src_gen)?;
    launcher::launch_script(&descriptor).write_to(src_gen)?;
    Ok(())
}
