use stamp_health::configuration::get_configuration;
use stamp_health::startup::run;
use stamp_health::telemetry::{get_subscriber, init_subscriber};
use std::net::TcpListener;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber("stamp-health".into(), "info".into());
    init_subscriber(subscriber);

    let settings = get_configuration().expect("Failed to read configuration.");

    tracing::info!(
        db_host = %settings.database.host,
        amqp_host = %settings.amqp.host,
        workspace_id = %settings.health.telemetry.workspace_id,
        "Probing stamp dependencies"
    );

    let address = format!("{}:{}", settings.app_host, settings.app_port);
    tracing::info!("Start server at {:?}", &address);
    let listener =
        TcpListener::bind(&address).expect(&format!("failed to bind to {}", address));

    run(listener, settings)?.await
}
