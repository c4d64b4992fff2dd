use anyhow::Result;
use eventbus::harness::ModuleRunner;
use eventbus::module::dispatcher::Dispatcher;
use eventbus::module::publisher::Publisher;
use opentelemetry::sdk::trace::Tracer;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

mod options;
mod telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init()?;

    let result = match command {
        Command::Publisher(options) => runner.run(Publisher::new(options)).await,
        Command::Dispatcher(options) => runner.run(Dispatcher::new(options)).await,
    };

    deinit();

    Ok(result?)
}

fn init() -> Result<(Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();
    let filter = EnvFilter::try_new(&options.log)?;

    let tracer = match &options.telemetry_endpoint {
        Some(endpoint) => Some(telemetry::tracer(endpoint, options.command.service_name())?),
        None => None,
    };
    let tracing_enabled = tracer.is_some();

    match options.log_format {
        LogFormat::Text => install(filter, tracing_subscriber::fmt::layer(), tracer)?,
        LogFormat::Compact => {
            install(filter, tracing_subscriber::fmt::layer().compact(), tracer)?
        }
        LogFormat::Json => install(filter, tracing_subscriber::fmt::layer().json(), tracer)?,
    };

    if tracing_enabled {
        eventbus::library::tracing::enable();
    }

    let runner = match options.status_server {
        Some(port) => ModuleRunner::new_with_status_server(port),
        None => ModuleRunner::default(),
    }
    .with_termination_grace_period(options.termination_grace_period);

    info!(tracing_enabled, "Eventbus {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, runner))
}

fn install<L>(filter: EnvFilter, output: L, tracer: Option<Tracer>) -> Result<()>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let subscriber = Registry::default().with(output).with(filter);

    match tracer {
        Some(tracer) => subscriber
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?,
        None => subscriber.try_init()?,
    }

    Ok(())
}

fn deinit() {
    telemetry::flush();
}
