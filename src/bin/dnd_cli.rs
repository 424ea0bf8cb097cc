use std::{error::Error, io, time::Duration};

use clap::Parser;
use dnd::{
    Command, CredentialMode, Session, SessionConfig,
    cli::{execute, prompt},
    session::DEFAULT_PORT,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// DND server to connect to
    #[arg(short, long, default_value = "dnd.dartmouth.edu")]
    server: String,
    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds to wait on a reply before giving up on the session
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,
    /// Answer validation challenges with the encrypted credential
    #[arg(short, long)]
    encrypt: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let timeout = Some(Duration::from_secs(cli.timeout));
    let config = SessionConfig {
        read_timeout: timeout,
        write_timeout: timeout,
        ..SessionConfig::new(cli.server, cli.port)
    };
    let mode = if cli.encrypt {
        CredentialMode::Encrypted
    } else {
        CredentialMode::Plaintext
    };

    let session = Session::connect(&config)?;
    println!("{}", session.banner());

    let stdin = io::stdin();
    let stdout = io::stdout();

    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let exit = cmd == Command::Exit;
        if let Err(e) = execute(&session, cmd, mode, stdin.lock(), stdout.lock()) {
            eprintln!("error: {e}");
        }

        if exit || session.is_closed() {
            break;
        }
    }

    Ok(())
}
