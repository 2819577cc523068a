//! # Protogate CLI Entry Point
//!
//! Drives the `protogate_core` engine from the command line:
//!
//! 1. **Initialization**: Parses arguments with [`cli::Cli`], loads the gateway
//!    configuration and installs the tracing subscriber.
//! 2. **Schema**: Loads a descriptor set from disk or fetches it through server reflection.
//! 3. **Execution**: Publishes the schema into an [`Engine`] and dispatches the call.
//! 4. **Presentation**: Formats the resulting data or error status for the terminal.
mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, ListCommands, SchemaArgs};
use formatter::{FormattedString, ServiceList};
use protogate_core::{
    Checksum, DescriptorSource, DynamicRequest, DynamicResponse, Engine, GatewayConfig,
    GrpcChannel, InvokeError, ReflectionClient,
    config::TracingConfig,
    tonic::transport::{Channel, Endpoint},
};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&config.tracing) {
        eprintln!("{}", FormattedString::from(err));
        process::exit(1);
    }

    if let Err(err) = run(args.command, config).await {
        eprintln!("{}", FormattedString::from(err));
        process::exit(1);
    }
}

async fn run(command: Commands, config: GatewayConfig) -> anyhow::Result<()> {
    match command {
        Commands::Call {
            url,
            endpoint,
            body,
            headers,
            file_descriptor_set,
            namespace,
            timeout,
        } => {
            let (service, method) = endpoint;
            let call = Call {
                namespace,
                service,
                method,
                body,
                headers,
                timeout,
            };
            run_call(&url, file_descriptor_set, call, config).await
        }
        Commands::List {
            sub: ListCommands::Services { schema },
        } => {
            let source = load_source(&schema).await?;
            println!("{}", FormattedString::from(ServiceList(source.list_services())));
            Ok(())
        }
        Commands::Describe { symbol, schema } => {
            let source = load_source(&schema).await?;
            let descriptor = source.find_symbol(&symbol)?;
            println!("{}", FormattedString::from(descriptor));
            Ok(())
        }
        Commands::Checksum { file } => {
            let bytes = read_file(&file)?;
            println!("{}", Checksum::of(&bytes));
            Ok(())
        }
    }
}

struct Call {
    namespace: String,
    service: String,
    method: String,
    body: serde_json::Value,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

async fn run_call(
    url: &str,
    file_descriptor_set: Option<PathBuf>,
    call: Call,
    config: GatewayConfig,
) -> anyhow::Result<()> {
    let channel = connect(url).await?;
    let engine = Engine::new(config.engine);

    match file_descriptor_set {
        Some(path) => {
            engine.update(&call.namespace, &read_file(&path)?)?;
        }
        None => {
            let mut client = ReflectionClient::new(channel.clone());
            let source = DescriptorSource::from_reflection(&mut client)
                .await
                .context("Failed to fetch schema through server reflection")?;
            engine.update_from_source(&call.namespace, source)?;
        }
    }
    tracing::debug!(url, namespace = %call.namespace, "schema published");

    let mut request = DynamicRequest::new(
        call.namespace,
        call.service,
        call.method,
        call.body.to_string(),
    );
    request.headers = call.headers;
    request.timeout = call.timeout;

    let mut response = DynamicResponse::new();
    match engine
        .invoke(&GrpcChannel::new(channel), &request, &mut response)
        .await
    {
        Ok(()) => println!("{}", FormattedString::from(response.to_json()?)),
        Err(InvokeError::Status(status)) => println!("{}", FormattedString::from(status)),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

async fn load_source(schema: &SchemaArgs) -> anyhow::Result<DescriptorSource> {
    if let Some(path) = &schema.file_descriptor_set {
        let bytes = read_file(path)?;
        return DescriptorSource::load(&bytes)
            .with_context(|| format!("Invalid descriptor set '{}'", path.display()));
    }

    let url = schema
        .url
        .as_deref()
        .context("Either --file-descriptor-set or --url is required")?;
    let mut client = ReflectionClient::new(connect(url).await?);

    DescriptorSource::from_reflection(&mut client)
        .await
        .with_context(|| format!("Failed to fetch schema from '{url}'"))
}

async fn connect(url: &str) -> anyhow::Result<Channel> {
    Endpoint::new(url.to_string())
        .with_context(|| format!("Invalid URL '{url}'"))?
        .connect()
        .await
        .with_context(|| format!("Failed to connect to '{url}'"))
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => Ok(GatewayConfig::from_yaml_file(path)?),
        None => Ok(GatewayConfig::default()),
    }
}

fn init_tracing(config: &TracingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directive())
            .with_context(|| format!("Invalid log filter '{}'", config.directive()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
