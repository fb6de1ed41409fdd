mod cli;

use attres::config::{ConfigLoader, Loaded};
use attres::data_node::{LookupError, NodeId};
use attres::value::Value;
use indexmap::IndexMap;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("ATTRES_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Resolve(resolve_cli) => resolve(resolve_cli),
        cli::Command::Evaluate(evaluate_cli) => evaluate(evaluate_cli),
        cli::Command::Check(check_cli) => check(check_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn resolve(cli: cli::ResolveCommand) -> anyhow::Result<()> {
    let environment = environment(&cli.input);
    let mut loaded = load(&cli.input, &environment)?;

    if cli.refresh {
        let report = loaded.refresh(&environment, None);
        loaded.report.merge(report);
    }

    output(&cli.output, &loaded.tree.to_value(NodeId::ROOT))?;
    loaded.report.into_result()?;
    Ok(())
}

pub fn evaluate(cli: cli::EvaluateCommand) -> anyhow::Result<()> {
    let environment = environment(&cli.input);
    let loaded = load(&cli.input, &environment)?;

    let scope = attres::resolver::Scope::new(&loaded.tree, NodeId::ROOT, &environment);
    let number = match attres::expression::evaluate(&cli.expression, &scope) {
        Ok(number) => number,
        // whatever was meant to assign the key failed during the load
        Err(error) => {
            if let Some(LookupError::NotInitialized(key)) = error.lookup_error() {
                anyhow::bail!("unknown identifier '{}'", loaded.tree.display_key(key));
            }
            return Err(error.into());
        }
    };

    output(&cli.output, &Value::Decimal(number))?;
    Ok(())
}

pub fn check(cli: cli::CheckCommand) -> anyhow::Result<()> {
    attres::expression::validate(&cli.expression)?;
    println!("ok");
    Ok(())
}

fn environment(input: &cli::InputArgs) -> IndexMap<String, f64> {
    input.variables.iter().cloned().collect()
}

fn load(input: &cli::InputArgs, environment: &IndexMap<String, f64>) -> anyhow::Result<Loaded> {
    let documents = documents(input)?;
    let (root, schema, report) = attres::config::from_documents(&documents);

    let mut loaded = ConfigLoader::new(&schema, environment).load(&root);
    loaded.report.merge(report);
    Ok(loaded)
}

fn documents(input: &cli::InputArgs) -> anyhow::Result<attres::hcl_documents::HclDocuments> {
    if !input.workdir && input.files.is_empty() && input.directories.is_empty() {
        let stdin = std::io::read_to_string(std::io::stdin())?;
        let body = hcl_edit::parser::parse_body(&stdin)?;
        return Ok(body.into());
    }

    let mut documents = attres::hcl_documents::HclDocuments::default();

    if input.workdir {
        documents.load_directory(&std::env::current_dir()?)?;
    }

    for file_path in &input.files {
        documents.load_file(file_path)?;
    }

    for dir_path in &input.directories {
        documents.load_directory(dir_path)?;
    }

    anyhow::ensure!(documents.source_count() > 0, "No files loaded");

    Ok(documents)
}

fn output(output: &cli::OutputArgs, value: &Value) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (attres-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let mut documents = attres::hcl_documents::HclDocuments::default();
    documents.load_directory(&std::env::current_dir()?)?;

    match cli.command {
        Documents => println!("{documents:#?}"),
        Tree => {
            let (root, schema, report) = attres::config::from_documents(&documents);
            let loaded = ConfigLoader::new(&schema, &attres::resolver::NoEnvironment).load(&root);
            println!("{:#?}", loaded.tree);
            if !report.is_valid() || !loaded.report.is_valid() {
                eprintln!("{report}\n{}", loaded.report);
            }
        }
    }

    Ok(())
}
