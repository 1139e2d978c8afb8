// kaidos-wallet commands

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::{node_post, CliError};
use crate::core::{unix_time_now, Address, Amount};
use crate::network::message::{RpcRequest, UtxosData};
use crate::wallet::{Keystore, TransactionBuilder};

#[derive(Parser)]
#[command(name = "kaidos-wallet")]
#[command(about = "Kaidos wallet: keys, balances and signed transactions", long_about = None)]
pub struct WalletCli {
    /// Node to query for ledger state
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub node: String,

    /// Directory holding the keystore file
    #[arg(long, default_value = "./kaidos-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: WalletCommands,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet address
    Create {
        /// Seal the secret key under a passphrase
        #[arg(long)]
        encrypted: bool,
    },

    /// List wallet addresses
    List,

    /// Sum of unspent outputs for an address
    Balance { address: String },

    /// Build and sign a transaction
    Tx {
        from: String,
        to: String,
        amount: String,
        /// Write the signed transaction to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List unspent outputs for an address
    Utxos { address: String },
}

fn parse_address(s: &str) -> Result<Address, CliError> {
    Address::parse(s).map_err(|e| CliError::BadArgs(e.to_string()))
}

fn parse_amount(s: &str) -> Result<Amount, CliError> {
    s.parse().map_err(|_| {
        CliError::BadArgs(format!(
            "invalid amount '{s}': expected a decimal with at most 8 fractional digits"
        ))
    })
}

fn prompt_passphrase() -> Result<String, CliError> {
    print!("Passphrase: ");
    std::io::stdout()
        .flush()
        .map_err(|e| CliError::Io(e.to_string()))?;
    let mut passphrase = String::new();
    std::io::stdin()
        .read_line(&mut passphrase)
        .map_err(|e| CliError::Io(e.to_string()))?;
    Ok(passphrase.trim_end_matches('\n').to_string())
}

impl WalletCli {
    pub async fn run(self) -> Result<(), CliError> {
        let keystore_path = self.data_dir.join("keystore.json");

        match self.command {
            WalletCommands::Create { encrypted } => {
                let mut keystore = Keystore::load(&keystore_path)?;
                let passphrase = if encrypted {
                    Some(prompt_passphrase()?)
                } else {
                    None
                };
                let address = keystore.create(passphrase.as_deref())?;

                println!("Wallet created");
                println!("  Address: {address}");
                if encrypted {
                    println!("  The secret key is sealed; the passphrase is required to spend.");
                }
                Ok(())
            }

            WalletCommands::List => {
                let keystore = Keystore::load(&keystore_path)?;
                let wallets = keystore.list();
                println!("Wallets ({}):", wallets.len());
                for (address, public_key, encrypted) in wallets {
                    let marker = if encrypted { " (encrypted)" } else { "" };
                    println!("  {address}{marker}");
                    println!("    public key: {public_key}");
                }
                Ok(())
            }

            WalletCommands::Balance { address } => {
                let address = parse_address(&address)?;
                let data: UtxosData = node_post(
                    &self.node,
                    "/rpc",
                    &RpcRequest::GetUtxos {
                        address: address.clone(),
                    },
                )
                .await?;
                println!("Balance for {address}: {}", data.balance);
                Ok(())
            }

            WalletCommands::Tx {
                from,
                to,
                amount,
                output,
            } => {
                let from = parse_address(&from)?;
                let to = parse_address(&to)?;
                let amount = parse_amount(&amount)?;

                let keystore = Keystore::load(&keystore_path)?;
                let passphrase = if keystore
                    .list()
                    .iter()
                    .any(|(a, _, encrypted)| a == &from && *encrypted)
                {
                    Some(prompt_passphrase()?)
                } else {
                    None
                };

                let data: UtxosData = node_post(
                    &self.node,
                    "/rpc",
                    &RpcRequest::GetUtxos {
                        address: from.clone(),
                    },
                )
                .await?;

                let tx = TransactionBuilder::new(&keystore).build(
                    &from,
                    &to,
                    amount,
                    &data.utxos,
                    passphrase.as_deref(),
                    unix_time_now(),
                )?;

                let json = serde_json::to_string_pretty(&tx)
                    .map_err(|e| CliError::Io(e.to_string()))?;

                println!("Transaction created");
                println!("  Txid:    {}", tx.txid);
                println!("  Inputs:  {}", tx.inputs.len());
                println!("  Outputs: {}", tx.outputs.len());

                match output {
                    Some(path) => {
                        std::fs::write(&path, json).map_err(|e| CliError::Io(e.to_string()))?;
                        println!("  Written to {}", path.display());
                    }
                    None => println!("{json}"),
                }
                Ok(())
            }

            WalletCommands::Utxos { address } => {
                let address = parse_address(&address)?;
                let data: UtxosData =
                    node_post(&self.node, "/rpc", &RpcRequest::GetUtxos { address }).await?;

                println!("Unspent outputs ({}):", data.utxos.len());
                for utxo in &data.utxos {
                    println!("  {}:{}  {}", utxo.txid, utxo.vout, utxo.amount);
                }
                println!("Total: {}", data.balance);
                Ok(())
            }
        }
    }
}
