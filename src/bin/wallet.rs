// kaidos-wallet entry point

use clap::error::ErrorKind;
use clap::Parser;

use kaidos::cli::WalletCli;

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = match WalletCli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{err}");
            return;
        }
        Err(err) => {
            eprint!("{err}");
            std::process::exit(3);
        }
    };

    if let Err(err) = cli.run().await {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}
