use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use portal::config::Config;
use portal::password::Password;
use portal::receiver::ReceiveOptions;
use portal::sender::SendOptions;
use portal::{commands, Result};

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Quick and easy file transfer from any computer to another", long_about = None)]
#[command(version)]
struct Cli {
    /// IP or hostname of the rendezvous server to use
    #[arg(short = 's', long = "server", global = true)]
    server: Option<String>,

    /// Port of the rendezvous server to use
    #[arg(short = 'p', long = "port", global = true)]
    port: Option<u16>,

    /// Log detailed debug information, optionally into the given file
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        num_args = 0..=1,
        default_missing_value = "",
        value_name = "FILE"
    )]
    verbose: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one or more files or directories
    Send {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Receive files with the password the sender gave you
    Receive {
        /// The full password, for instance 1-cosmic-ray-quasar
        password: String,
    },
    /// Run the rendezvous server in the foreground
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let config = match Config::load_or_init() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return ExitCode::from(2);
        }
    };

    init_logging(&cli.verbose, config.verbose);

    match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err.user_message());
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    let server = cli.server.unwrap_or(config.rendezvous_address);
    let port = cli.port.unwrap_or(config.rendezvous_port);

    match cli.command {
        Commands::Send { paths } => {
            commands::send::run(
                SendOptions {
                    rendezvous_address: server,
                    rendezvous_port: port,
                    allow_direct: true,
                },
                paths,
            )
            .await?;
        }
        Commands::Receive { password } => {
            let password: Password = match password.parse() {
                Ok(password) => password,
                Err(_) => {
                    eprintln!(
                        "Provide the password the file sender gave to you, \
                         for instance 1-cosmic-ray-quasar."
                    );
                    return Ok(ExitCode::from(1));
                }
            };
            commands::receive::run(
                ReceiveOptions {
                    rendezvous_address: server,
                    rendezvous_port: port,
                },
                password,
                std::env::current_dir()?,
            )
            .await?;
        }
        Commands::Serve => {
            commands::serve::run(port).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: &Option<String>, config_verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    let enabled = verbose.is_some() || config_verbose;
    builder.filter_level(if enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Some(path) = verbose.as_deref().filter(|path| !path.is_empty()) {
        match std::fs::File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("could not open log file {path}: {err}"),
        }
    }
    builder.init();
}
