use actix_web::{middleware::Logger, web, App, HttpServer};
use archimedes::{api, local_ipv4, model::common::{AppState, Configuration}, service::Registry};
use clap::Parser;
use config::Config;

use tracing::{warn, Subscriber, subscriber::set_global_default};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry as SubscriberRegistry};

#[derive(Parser)]
#[command()]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = "conf/application.yml")]
    config: String,
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Neighbor registry addresses to join at startup; repeatable.
    #[arg(short = 'n', long = "neighbor")]
    neighbors: Vec<String>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let subscriber = get_subscriber("archimedes", "info", std::io::stdout);
    init_subscriber(subscriber);

    let mut config_builder = Config::builder();
    config_builder = config_builder.add_source(config::File::with_name(&args.config).required(false));
    if let Some(port) = args.port {
        config_builder = config_builder.set_override("server.port", port as i64)?;
    }
    let configuration = Configuration::new(config_builder.build()?);

    let address = configuration.server_address();
    let server_port = configuration.server_port();

    let registry = Registry::new(configuration.registry_config(local_ipv4()))?;
    registry.start();

    for neighbor in &args.neighbors {
        if let Err(e) = registry.add_neighbor(neighbor).await {
            warn!("could not join neighbor {}: {}", neighbor, e);
        }
    }

    let app_state = AppState {
        configuration,
        registry,
    };

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(app_state.clone()))
            .service(api::route::routes())
    })
    .bind((address, server_port))?
    .run()
    .await?;

    Ok(())
}

pub fn get_subscriber(
    name: &str,
    env_filter: &str,
    sink: impl for<'a> MakeWriter<'a> + 'static + Send + Sync,
) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);

    SubscriberRegistry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
