mod app;
mod batch;
mod codec;
mod config;
mod connection;
mod console;
mod display;
mod error;
mod exchange;
mod liveness;
mod model;
mod producers;

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = app::run().await {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
    // The stdin reader can stay parked on a blocking read past shutdown.
    std::process::exit(0);
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
