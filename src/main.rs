use log::{error, info};

#[tokio::main]
async fn main()
{   env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or("info")
    ).init();

    let config = match convly::config::AppConfig::from_env()
    {   Ok(config) => config
      , Err(e) => {
          error!("{}", e);
          std::process::exit(2);
        }
    };

    info!(
      "Starting convly with {} providers",
      config.providers.len()
    );
    let dispatcher = convly::Dispatcher::from_config(&config);

    if let Err(e) = convly::server::run(&config, dispatcher).await
    {   error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
