//! # CLI
//!
//! Command-line interface of `protogate`, parsed with `clap`.
//!
//! Validation of user input (endpoints, `key:value` headers, JSON bodies) happens here,
//! before anything touches the network.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "protogate", version, about = "Descriptor-driven dynamic gRPC gateway tooling")]
pub struct Cli {
    /// Gateway configuration file (YAML). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform a unary gRPC call through the invocation engine
    ///
    /// The schema is published into a fresh engine under `--namespace` and the call
    /// is dispatched exactly like the gateway would.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protogate call http://localhost:50051 my.pkg.Service/Method --body '{"key": "value"}'
    /// ```
    Call {
        /// The server URL to call (e.g. http://localhost:50051)
        url: String,

        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),

        /// JSON body, an empty body sends the default message
        #[arg(long, value_parser = parse_body, default_value = "{}")]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Path to the descriptor set (.bin). Server reflection is used when omitted.
        #[arg(long)]
        file_descriptor_set: Option<PathBuf>,

        /// Namespace the schema is published under
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Call deadline in milliseconds
        #[arg(long, value_parser = parse_millis)]
        timeout: Option<Duration>,
    },

    /// List available services or other resources
    List {
        #[command(subcommand)]
        sub: ListCommands,
    },

    /// Describe a service, method, message, enum or extension
    Describe {
        /// Fully qualified symbol (e.g. my.package.Service or my.package.Service.Method)
        symbol: String,

        #[command(flatten)]
        schema: SchemaArgs,
    },

    /// Print the checksum the engine and the disk cache use for a schema blob
    Checksum {
        /// Path to the schema blob
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ListCommands {
    /// List all services defined by a schema
    Services {
        #[command(flatten)]
        schema: SchemaArgs,
    },
}

/// Where a schema comes from: a local descriptor set or a live server.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct SchemaArgs {
    /// Path to the descriptor set (.bin)
    #[arg(long)]
    pub file_descriptor_set: Option<PathBuf>,

    /// Server URL to fetch the schema from through reflection
    #[arg(long)]
    pub url: Option<String>,
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_millis(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| format!("Invalid timeout '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn endpoint_requires_both_parts() {
        assert_eq!(
            parse_endpoint("pkg.Svc/Call").unwrap(),
            ("pkg.Svc".to_string(), "Call".to_string())
        );
        assert!(parse_endpoint("pkg.Svc").is_err());
        assert!(parse_endpoint("/Call").is_err());
    }

    #[test]
    fn schema_source_is_exclusive() {
        let parsed = Cli::try_parse_from([
            "protogate",
            "list",
            "services",
            "--file-descriptor-set",
            "a.bin",
            "--url",
            "http://localhost:50051",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["protogate", "describe", "pkg.Svc"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn call_defaults() {
        let cli = Cli::try_parse_from([
            "protogate",
            "--config",
            "gateway.yaml",
            "call",
            "http://localhost:50051",
            "echo.EchoService/UnaryEcho",
            "-H",
            "x-tenant: a",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("gateway.yaml")));
        match cli.command {
            Commands::Call {
                body,
                headers,
                namespace,
                timeout,
                ..
            } => {
                assert_eq!(body, serde_json::json!({}));
                assert_eq!(headers, [("x-tenant".to_string(), "a".to_string())]);
                assert_eq!(namespace, "default");
                assert!(timeout.is_none());
            }
            _ => panic!("Expected call command"),
        }
    }
}
