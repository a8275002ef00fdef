use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use points_client::{configuration::get_configuration, startup::Application};

const POINTS_COUNT: usize = 1_000;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let tracing_subscriber =
        get_tracing_subscriber("points_client".into(), "info".into(), std::io::stdout);
    if let Err(error) = init_tracing_subscriber(tracing_subscriber) {
        panic!("Failed to set up tracing: {:?}", error);
    }

    // Panics if the configuration can't be read
    let configuration = get_configuration().expect("Failed to read configuration.");

    let application = match Application::build(configuration) {
        Ok(application) => application,
        Err(error) => panic!("Failed to build application: {:?}", error),
    };

    if let Err(error) = application.run_scenario(POINTS_COUNT).await {
        panic!("Client scenario failed: {:?}", error);
    }

    Ok(())
}
