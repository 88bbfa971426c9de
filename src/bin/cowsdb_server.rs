use std::{error::Error, process, sync::Arc};

use clap::Parser;
use cowsdb::{CommandEngine, ServerConfig, protocol::NativeServer};
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let config = ServerConfig::parse();

    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        process::exit(0);
    })?;

    let engine = Arc::new(CommandEngine::new(&config.engine));
    let server = NativeServer::bind(&config, engine)?;
    info!(
        "sessions under {} ({:?} mode), engine {}",
        config.data_dir.display(),
        config.session_mode,
        config.engine.display()
    );

    server.serve()?;
    Ok(())
}
