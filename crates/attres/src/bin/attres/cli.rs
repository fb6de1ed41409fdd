//! attres cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; attres ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve all attributes and print the resulting tree
    ///
    /// Reads HCL from stdin unless any other source is provided (via --input-*)
    Resolve(ResolveCommand),

    /// Evaluate an expression in the scope of the root block
    ///
    /// Reads HCL from stdin unless any other source is provided (via --input-*)
    #[command(alias = "eval")]
    Evaluate(EvaluateCommand),

    /// Check the syntax of an expression without loading anything
    Check(CheckCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct ResolveCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Recompute volatile attributes once more before printing
    #[clap(long)]
    pub refresh: bool,
}

#[derive(Parser, Debug)]
pub struct EvaluateCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Expression to evaluate
    pub expression: String,
}

#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// Expression to check
    pub expression: String,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load files from work directory
    #[clap(short = 'w', long = "input-workdir")]
    pub workdir: bool,

    /// Load a file
    #[clap(short = 'f', long = "input-file")]
    pub files: Vec<PathBuf>,

    /// Load files from given directory
    #[clap(short = 'd', long = "input-dir")]
    pub directories: Vec<PathBuf>,

    /// Provide a `$name` variable, can be given multiple times
    #[clap(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
    pub variables: Vec<(String, f64)>,
}

fn parse_variable(arg: &str) -> Result<(String, f64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{arg}'"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded documents of the work directory
    Documents,
    /// Resolved node tree of the work directory
    Tree,
}
