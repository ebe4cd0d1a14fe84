use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Backend of the Rhea compiler: turns a validated program model into
/// per-target source trees and compiled, deployable units.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Path to the program model JSON produced by the front end.
    pub file: String,

    /// Root directory for generated sources and build outputs.
    #[arg(long, default_value = ".")]
    pub out: String,

    /// Emit sources but skip the target toolchain.
    #[arg(long)]
    pub generate_only: bool,

    /// Stop after a fast syntax-only check instead of a full compile.
    #[arg(long, conflicts_with = "generate_only")]
    pub fast: bool,

    /// Only build federates whose name matches this pattern.
    #[arg(long)]
    pub filter: Option<String>,

    /// Toolchain parallelism degree. Defaults to the available CPU count.
    #[arg(long)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate, generate and compile a program.
    Build(BuildArgs),

    /// Print the federation plan for a federated program as JSON, without
    /// generating any code.
    Partition {
        /// Path to the program model JSON produced by the front end.
        file: String,
    },

    /// List supported targets and their capabilities.
    Targets,
}
