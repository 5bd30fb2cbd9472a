//! binary-cache - resolve binaries from the content service into the local cache

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use binary_cache::{
    BinaryReference, BinaryResolver, CachedFile, ContextData, Namespace, ResolverConfig,
};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Resolve a binary by id
    Id {
        namespace: Namespace,
        publication_id: u32,
        binary_id: u64,
    },
    /// Resolve a binary by path
    Path {
        namespace: Namespace,
        publication_id: u32,
        path: String,
    },
    /// Print a publication's base URL
    Publication {
        namespace: Namespace,
        publication_id: u32,
    },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"binary-cache - Resolve content service binaries into the local cache

USAGE:
    binary-cache id <namespace> <publication> <binary-id>
    binary-cache path <namespace> <publication> <relative-path>
    binary-cache publication <namespace> <publication>
    binary-cache help

NAMESPACES:
    tcm     Sites
    ish     Docs

EXAMPLES:
    binary-cache id tcm 1 100
    binary-cache path tcm 1 /media/logo.png

ENVIRONMENT:
    BINCACHE_CONFIG          JSON config file (overrides the variables below)
    BINCACHE_ENDPOINT        GraphQL endpoint of the content service
    BINCACHE_BASE_PATH       Cache root (binaries under <base>/BinaryData)
    BINCACHE_ACCESS_TOKEN    Bearer token for the content service
    BINCACHE_TIMEOUT_SECS    HTTP request timeout
    BINCACHE_LOCK_STRIPES    Number of refresh lock stripes
    BINCACHE_INDEX_CAPACITY  Maximum id index entries
    RUST_LOG                 Log filter, e.g. debug or binary_cache=trace
"#
    );
}

fn parse_publication(raw: &str) -> Result<u32> {
    raw.parse()
        .with_context(|| format!("Invalid publication id: {}", raw))
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "id" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: binary-cache id <namespace> <publication> <binary-id>"
                ));
            }
            Ok(Command::Id {
                namespace: Namespace::from_token(&args[2])?,
                publication_id: parse_publication(&args[3])?,
                binary_id: args[4]
                    .parse()
                    .with_context(|| format!("Invalid binary id: {}", args[4]))?,
            })
        }
        "path" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: binary-cache path <namespace> <publication> <relative-path>"
                ));
            }
            Ok(Command::Path {
                namespace: Namespace::from_token(&args[2])?,
                publication_id: parse_publication(&args[3])?,
                path: args[4].clone(),
            })
        }
        "publication" => {
            if args.len() < 4 {
                return Err(anyhow!(
                    "Usage: binary-cache publication <namespace> <publication>"
                ));
            }
            Ok(Command::Publication {
                namespace: Namespace::from_token(&args[2])?,
                publication_id: parse_publication(&args[3])?,
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

fn load_config() -> Result<ResolverConfig> {
    match env::var("BINCACHE_CONFIG") {
        Ok(path) => ResolverConfig::from_file(&PathBuf::from(path)),
        Err(_) => ResolverConfig::from_env(),
    }
}

fn print_file(file: &CachedFile) {
    println!("{}", file.path.display());
    println!("  content-type: {}", file.content_type);
    println!("  versioned:    {}", file.versioned);
}

fn run(command: Command) -> Result<ExitCode> {
    let config = load_config()?;

    // Resolver calls block, so the runtime must not own this thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    let resolver = BinaryResolver::from_config(&config, runtime.handle().clone())?;

    let reference = match command {
        Command::Id {
            namespace,
            publication_id,
            binary_id,
        } => BinaryReference::by_id(namespace, publication_id, binary_id),
        Command::Path {
            namespace,
            publication_id,
            path,
        } => BinaryReference::by_path(namespace, publication_id, path),
        Command::Publication {
            namespace,
            publication_id,
        } => {
            let url = resolver.resolve_publication_url(
                namespace,
                publication_id,
                &ContextData::new(),
            )?;
            println!("{}", url);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Help => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
    };

    info!(reference = ?reference, "Resolving binary");
    let resolved = resolver.resolve(&reference, &ContextData::new());
    resolver.store().index().log_metrics();

    match resolved? {
        Some(file) => {
            print_file(&file);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No content available for {:?}", reference);
            Ok(ExitCode::from(2))
        }
    }
}

fn main() -> ExitCode {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Resolution failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("binary-cache")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_id_command() {
        match parse_args(&args(&["id", "tcm", "1", "100"])).unwrap() {
            Command::Id {
                namespace,
                publication_id,
                binary_id,
            } => {
                assert_eq!(namespace, Namespace::Sites);
                assert_eq!(publication_id, 1);
                assert_eq!(binary_id, 100);
            }
            other => panic!("Expected Id command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_path_command() {
        match parse_args(&args(&["path", "ish", "3", "/media/a.pdf"])).unwrap() {
            Command::Path {
                namespace, path, ..
            } => {
                assert_eq!(namespace, Namespace::Docs);
                assert_eq!(path, "/media/a.pdf");
            }
            other => panic!("Expected Path command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["id", "xyz", "1", "100"])).is_err());
        assert!(parse_args(&args(&["id", "tcm", "one", "100"])).is_err());
        assert!(parse_args(&args(&["path", "tcm", "1"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(matches!(parse_args(&args(&[])).unwrap(), Command::Help));
    }
}
