use std::{error::Error, net::SocketAddr};

use clap::Parser;
use dnd::protocol::{Directory, PseudoServer};
use log::info;

/// Serve the canned test directory over the DND protocol.
#[derive(Debug, Parser)]
struct Cli {
    /// Listen for new connection at address
    address: SocketAddr,
    /// Password accepted for validations
    #[arg(long, default_value = "testpass")]
    password: String,
    /// Challenge issued for validations, 24 octal digits
    #[arg(long, default_value = "240147326165005023201134")]
    challenge: String,
    /// Maximum number of records returned per lookup
    #[arg(long, default_value_t = 25)]
    cap: usize,
    /// Number of clients served concurrently
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        std::process::exit(0);
    })?;

    let directory = Directory::fixture()
        .with_password(cli.password)
        .with_challenge(cli.challenge)
        .with_cap(cli.cap);
    let server = PseudoServer::bind(cli.address, directory)?;

    server.listen(cli.workers)?;
    Ok(())
}
