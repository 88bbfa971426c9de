use std::{
    error::Error,
    io::{self, Write},
    net::SocketAddr,
};

use clap::Parser;
use cowsdb::{
    Command, format_block, prompt,
    protocol::{NativeClient, QueryResponse},
};

#[derive(Debug, Parser)]
#[command(version, about = "Interactive client for a CowsDB server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:9000")]
    address: SocketAddr,
    #[arg(long, default_value = "")]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long, default_value = "default")]
    database: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut client = NativeClient::connect(cli.address, &cli.user, &cli.password, &cli.database)?;
    if let Some(server) = client.server() {
        println!(
            "connected to {} {}.{} at {}",
            server.name, server.version_major, server.version_minor, cli.address
        );
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Empty => {}
            Command::Ping => {
                client.ping()?;
                println!("pong");
            }
            Command::Query(sql) => match client.query(&sql)? {
                QueryResponse::Blocks(blocks) => {
                    for block in &blocks {
                        write!(stdout, "{}", format_block(block))?;
                    }
                    stdout.flush()?;
                }
                QueryResponse::Exception(message) => eprintln!("query error: {message}"),
            },
        }
    }

    Ok(())
}
