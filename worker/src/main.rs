use std::{env, io, process};

use log::info;
use tokio::{net::TcpStream, signal};

use worker::{Worker, WorkerConfig};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "9999";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string()),
    );
    let config = WorkerConfig::from_env()?;
    let worker_id = process::id() as usize;

    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    info!(worker_id = worker_id; "connected to {addr}");

    let mut worker = Worker::new(worker_id, config);

    tokio::select! {
        ret = worker.run(rx, tx) => {
            let report = ret?;
            info!(
                worker_id = worker_id;
                "{} rounds in {:?}, mean wait {:?}, last model {:?}",
                report.rounds,
                report.elapsed,
                report.metrics.mean_wait(),
                report.last_model
            );
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}
