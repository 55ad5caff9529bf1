use domain::{Registry, RegistryOptions};
use log::{error, info};
use service::{config::Config, logging::Logger};

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config);

    info!(
        "Starting buddy presence service [{}] in {} mode",
        config.listen_address(),
        config.runtime_env()
    );

    let store = match service::init_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open the user store: {e}");
            std::process::exit(1);
        }
    };

    let registry = Registry::new(store, RegistryOptions::from_config(&config));
    let app_state = server::AppState::new(config, registry);

    if let Err(e) = server::init_server(app_state).await {
        error!("Server stopped with an error: {e}");
        std::process::exit(1);
    }
}
