use eventbus::library::helpers::parse_seconds;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Event ingestion and webhook delivery backed by a streaming broker.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,hyper=warn,warp=warn,kube=warn,tower=warn,h2=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Format of the log output
    #[structopt(
        long,
        global = true,
        env,
        default_value = "text",
        possible_values = &["text", "compact", "json"],
        case_insensitive = true
    )]
    pub log_format: LogFormat,

    /// OpenTelemetry collector endpoint
    ///
    /// Omitting it disables tracing
    #[structopt(long, global = true, env)]
    pub telemetry_endpoint: Option<String>,

    /// Enable status reporting server which can be used as a readiness probe
    #[structopt(long, global = true, env, value_name = "port")]
    pub status_server: Option<u16>,

    /// Seconds that jobs get to shut down gracefully before they are aborted
    #[structopt(
        long,
        global = true,
        env,
        default_value = "10",
        parse(try_from_str = parse_seconds),
        value_name = "seconds"
    )]
    pub termination_grace_period: Duration,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Accepts events over HTTP and publishes them onto the broker
    Publisher(eventbus::module::publisher::Options),
    /// Delivers events from the broker to subscribed webhooks
    Dispatcher(eventbus::module::dispatcher::Options),
}

impl Command {
    pub fn service_name(&self) -> &'static str {
        match self {
            Command::Publisher(_) => "eventbus-publisher",
            Command::Dispatcher(_) => "eventbus-dispatcher",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}
