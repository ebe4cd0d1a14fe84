use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::io::Write;
use std::path::Path;

use rheac::diagnostics::{DiagnosticBag, Severity};
use rheac::federation::partition::partition;
use rheac::generate::context::{BuildContext, BuildMode, CancelToken, ProgressReporter};
use rheac::generate::{self, BuildResult};
use rheac::model::ProgramModel;
use rheac::target::{Target, backend_for};
use rheac::{cli, helpers};

/// Draws the 0..100 build progress bar for interactive runs.
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos:>3}% {msg}")
                .expect("valid progress template"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, message: &str, percent: u8) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(message.to_string());
    }
}

/// Logs checkpoints instead of drawing; used when the pretty progress
/// output is turned off via the verbosity flags.
struct PlainReporter;

impl ProgressReporter for PlainReporter {
    fn report(&self, message: &str, percent: u8) {
        log::debug!("[{percent:>3}%] {message}");
    }
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let log_level_filter = cli.verbose.log_level_filter();
    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(log_level_filter)
        .target(env_logger::fmt::Target::Stdout)
        .init();

    // The 'normal run' mode shows the pretty progress bar. With the log level
    // turned up or down, checkpoints go through the logger instead.
    let show_progress = log_level_filter == LevelFilter::Info;

    match cli.command {
        cli::Command::Build(build_args) => {
            let program = ProgramModel::from_json_file(Path::new(&build_args.file))?;
            let code = run_build(&program, &build_args, show_progress)?;
            std::process::exit(code);
        }
        cli::Command::Partition { file } => {
            let program = ProgramModel::from_json_file(Path::new(&file))?;
            let plan = partition(&program)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        cli::Command::Targets => {
            for target in Target::ALL {
                let backend = backend_for(target)?;
                let capabilities = backend.capabilities();
                println!(
                    "{target}: generics={}, variable-width={}, compiler={}",
                    capabilities.supports_generics,
                    capabilities.supports_variable_width,
                    capabilities.compiler
                );
            }
            Ok(())
        }
    }
}

fn run_build(program: &ProgramModel, args: &cli::BuildArgs, show_progress: bool) -> Result<i32> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let bar_reporter = show_progress.then(BarReporter::new);
    let plain_reporter = PlainReporter;
    let reporter: &dyn ProgressReporter = match &bar_reporter {
        Some(bar) => bar,
        None => &plain_reporter,
    };

    let mut ctx = BuildContext::new(reporter, cancel);
    ctx.generate_only = args.generate_only;
    ctx.mode = if args.fast {
        BuildMode::FastFeedback
    } else {
        BuildMode::MustComplete
    };
    ctx.jobs = args.jobs;
    if let Some(pattern) = &args.filter {
        ctx.filter = Some(regex::Regex::new(pattern)?);
    }

    let out_root = helpers::get_abs_path(Path::new(&args.out));
    let outcome = generate::build(program, &out_root, &ctx);

    if let Some(bar) = &bar_reporter {
        bar.bar.finish_and_clear();
    }
    render_diagnostics(&outcome.diagnostics);

    let (code, summary) = match outcome.result {
        BuildResult::Compiled | BuildResult::Generated => {
            (0, style(format!("Build {}.", outcome.result)).green())
        }
        BuildResult::Nothing => (0, style(format!("Build {}.", outcome.result)).yellow()),
        BuildResult::Failed => (1, style(format!("Build {}.", outcome.result)).red()),
        BuildResult::Cancelled => (130, style(format!("Build {}.", outcome.result)).yellow()),
    };
    println!("{summary}");
    Ok(code)
}

fn render_diagnostics(diagnostics: &DiagnosticBag) {
    for diagnostic in diagnostics.iter() {
        match diagnostic.severity {
            Severity::Error => eprintln!("{}", style(diagnostic).red()),
            Severity::Warning => eprintln!("{}", style(diagnostic).yellow()),
            Severity::Info => eprintln!("{diagnostic}"),
            Severity::Ignore => log::debug!("{diagnostic}"),
        }
    }
}
