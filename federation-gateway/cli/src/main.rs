//! Command line entry point: compose, plan and execute over a configuration file.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use federation_gateway::Configuration;
use federation_gateway::Gateway;
use federation_gateway::compose_configuration;
use federation_gateway::error::GatewayError;
use federation_gateway::graphql;
use tracing_subscriber::EnvFilter;

/// Options for the gateway
#[derive(Parser, Debug)]
#[command(name = "fedgw", about = "Federated GraphQL gateway", version)]
struct Opt {
    /// Log level (off|error|warn|info|debug|trace). `RUST_LOG` takes precedence.
    #[arg(long = "log", default_value = "info", global = true, env = "FEDGW_LOG")]
    log_level: String,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose the configured subgraphs and print the supergraph SDL.
    Compose {
        #[arg(short, long = "config")]
        config_path: PathBuf,

        /// Write the SDL to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the query plan of an operation as JSON.
    Plan {
        #[arg(short, long = "config")]
        config_path: PathBuf,

        /// File holding the operation, `-` for stdin.
        #[arg(short, long)]
        query: PathBuf,

        #[arg(long)]
        operation_name: Option<String>,
    },
    /// Run an operation against the configured subgraphs.
    Execute {
        #[arg(short, long = "config")]
        config_path: PathBuf,

        /// File holding the operation, `-` for stdin.
        #[arg(short, long)]
        query: PathBuf,

        #[arg(long)]
        operation_name: Option<String>,

        /// Variables as a JSON object.
        #[arg(long)]
        variables: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{error:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let opt = Opt::parse();
    init_tracing(&opt)?;

    match opt.command {
        Command::Compose {
            config_path,
            output,
        } => {
            let configuration = Configuration::from_file(&config_path)?;
            let supergraph = match compose_configuration(&configuration) {
                Ok(supergraph) => supergraph,
                Err(GatewayError::Composition(errors)) => {
                    eprintln!("composition failed with {} error(s):", errors.len());
                    for error in errors.iter() {
                        eprintln!("  {error}");
                    }
                    return Ok(ExitCode::FAILURE);
                }
                Err(error) => return Err(error.into()),
            };
            match output {
                Some(output) => fs::write(&output, supergraph.sdl())
                    .with_context(|| format!("could not write {}", output.display()))?,
                None => println!("{}", supergraph.sdl()),
            }
        }
        Command::Plan {
            config_path,
            query,
            operation_name,
        } => {
            let gateway = gateway(&config_path)?;
            let query = read_query(&query)?;
            let plan = gateway.plan(&query, operation_name.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&*plan)?);
        }
        Command::Execute {
            config_path,
            query,
            operation_name,
            variables,
        } => {
            let gateway = gateway(&config_path)?;
            let mut request = graphql::Request::new(read_query(&query)?);
            request.operation_name = operation_name;
            if let Some(variables) = variables {
                request.variables =
                    serde_json::from_str(&variables).context("variables must be a JSON object")?;
            }
            let response = gateway.execute(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(opt: &Opt) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if opt.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn gateway(config_path: &Path) -> Result<Gateway> {
    let configuration = Configuration::from_file(config_path)?;
    Ok(Gateway::from_configuration(&configuration)?)
}

fn read_query(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut query = String::new();
        std::io::stdin()
            .read_to_string(&mut query)
            .context("could not read the query from stdin")?;
        return Ok(query);
    }
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}
