//! Stencil CLI - Template Generation Front-End
//!
//! Commands: list, generate, uses, info
//! Outputs JSON to stdout
//! Returns non-zero on any generation failure

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use stencil_core::{
    artifacts, CompilationPipeline, DirectoryResolver, PipelineConfig, SourceResolver,
};

#[derive(Parser)]
#[command(name = "stencil-cli")]
#[command(about = "Stencil CLI - template-to-source transpiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the template source directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Output directory for generated artifacts (overrides the config file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Optional JSON pipeline configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List resolvable template names
    List,

    /// Generate the given template names, or everything when none are given
    Generate { names: Vec<String> },

    /// Generate everything, then list the templates whose dependency closure
    /// contains NAME
    Uses {
        /// Template name to reverse-query
        #[arg(short, long)]
        name: String,
    },

    /// Generate a template and print its module metadata
    Info {
        /// Template name
        #[arg(short, long)]
        name: String,
    },
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
            serde_json::from_str(&text)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(output_dir) = &cli.output_dir {
        config.output_root = output_dir.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(r#"{{"error": "{}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    let resolver = DirectoryResolver::new(&cli.templates_dir)
        .with_extension(config.scan.template_extension.clone());

    if let Commands::List = cli.command {
        let names = resolver.resolve_all_names();
        println!("{}", serde_json::to_string_pretty(&names).unwrap());
        return ExitCode::SUCCESS;
    }

    let pipeline = CompilationPipeline::new(config, Box::new(resolver));

    match cli.command {
        Commands::List => unreachable!("handled above"),

        Commands::Generate { names } => {
            let result = if names.is_empty() {
                pipeline.generate_all()
            } else {
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                pipeline.generate(&refs)
            };

            match result {
                Ok(artifacts) => {
                    let listing: Vec<_> = artifacts
                        .iter()
                        .map(|a| {
                            serde_json::json!({
                                "name": a.name,
                                "module": a.module_name,
                                "file": a.source_file,
                                "fingerprint": a.fingerprint(),
                                "binaryChunks": a.binary_chunks.len(),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&listing).unwrap());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                    });
                    println!("{}", serde_json::to_string(&output).unwrap());
                    ExitCode::from(2)
                }
            }
        }

        Commands::Uses { name } => match pipeline.generate_all() {
            Ok(_) => {
                let users = pipeline.templates_using(&name);
                println!("{}", serde_json::to_string_pretty(&users).unwrap());
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!(r#"{{"success": false, "error": "{}"}}"#, e);
                ExitCode::from(2)
            }
        },

        Commands::Info { name } => match pipeline.load(&name) {
            Ok(info) => {
                println!("{}", serde_json::to_string_pretty(&info).unwrap());
                ExitCode::SUCCESS
            }
            Err(e) => {
                let output = serde_json::json!({
                    "success": false,
                    "module": artifacts::module_name(&name),
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string(&output).unwrap());
                ExitCode::from(2)
            }
        },
    }
}
