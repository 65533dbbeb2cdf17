use std::{env, io};

use coordinator::{CoordinatorBuilder, CoordinatorConfig, serve};
use log::{error, info};
use tokio::{net::TcpListener, signal};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let mode = env::args().nth(1);
    let config = CoordinatorConfig::load(mode.as_deref())?;
    let policy = config.straggler_policy();

    let listener = TcpListener::bind(config.addr()).await?;
    info!(
        "listening on {}, dimension {}, {}",
        config.addr(),
        config.dimension,
        policy.rule()
    );

    let mut coordinator = CoordinatorBuilder::from_config(&config)?.build();

    tokio::select! {
        res = serve(&listener, &mut coordinator) => {
            if let Err(e) = res {
                error!("accept loop failed: {e}");
            }
        }
        _ = signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    let model = coordinator.shutdown().await;
    info!("final model: {model:?}");

    Ok(())
}
