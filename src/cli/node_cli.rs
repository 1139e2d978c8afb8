// kaidos-node commands

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::{node_get, node_post, CliError};
use crate::consensus::{Blockchain, ChainParams};
use crate::core::{Address, Transaction};
use crate::network::message::{
    AddPeerRequest, BlocksData, ConsensusData, MineData, MineRequest, PeersData, RpcRequest,
    SubmitTxData,
};
use crate::network::{serve, NodeState};
use crate::storage::{SledStore, Store};

#[derive(Parser)]
#[command(name = "kaidos-node")]
#[command(about = "Kaidos node: chain storage, mining and peer RPC", long_about = None)]
pub struct NodeCli {
    /// Node to send operator commands to
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub node: String,

    /// Directory holding the node database
    #[arg(long, default_value = "./kaidos-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: NodeCommands,
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Create the data directory and the genesis block
    Init,

    /// Run the node server
    Start {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 5000)]
        port: u16,
    },

    /// Mine one block, paying the reward to an address
    Mine { address: String },

    /// Submit a signed transaction from a file
    Send { file: PathBuf },

    /// Query a range of blocks
    Blocks {
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
    },

    /// Run one consensus round against the known peers
    Consensus,

    /// Register a peer address
    AddPeer { address: String },

    /// List known peers
    ListPeers,
}

impl NodeCli {
    pub async fn run(self) -> Result<(), CliError> {
        match self.command {
            NodeCommands::Init => {
                let store = SledStore::open(self.data_dir.join("node"))?;
                let stored = store.load_chain()?;
                if stored.is_empty() {
                    let chain = Blockchain::new(ChainParams::default());
                    store.save_chain(chain.blocks())?;
                    store.save_utxo_snapshot(chain.utxos())?;
                    println!("Blockchain initialized");
                    println!("  Genesis hash: {}", chain.tip().hash);
                } else {
                    let chain = Blockchain::from_blocks(ChainParams::default(), stored)
                        .map_err(|e| CliError::Validation(format!("stored chain is invalid: {e}")))?;
                    println!("Blockchain already initialized");
                    println!("  Height: {}", chain.height());
                    println!("  Tip:    {}", chain.tip().hash);
                }
                Ok(())
            }

            NodeCommands::Start { host, port } => {
                let addr: SocketAddr = format!("{host}:{port}")
                    .parse()
                    .map_err(|_| CliError::BadArgs(format!("invalid listen address {host}:{port}")))?;

                let store: Box<dyn Store> =
                    Box::new(SledStore::open(self.data_dir.join("node"))?);
                let state = NodeState::load(store, ChainParams::default(), format!("{host}:{port}"))
                    .map_err(|e| CliError::Io(format!("refusing to start: {e}")))?;

                println!("Starting node on {addr}");
                serve(Arc::new(state), addr)
                    .await
                    .map_err(|e| CliError::Io(e.to_string()))
            }

            NodeCommands::Mine { address } => {
                let miner_address =
                    Address::parse(&address).map_err(|e| CliError::BadArgs(e.to_string()))?;
                let data: MineData =
                    node_post(&self.node, "/mine", &MineRequest { miner_address }).await?;

                println!("Block mined");
                println!("  Height:       {}", data.block.index);
                println!("  Hash:         {}", data.block.hash);
                println!("  Nonce:        {}", data.block.nonce);
                println!("  Transactions: {}", data.block.transactions.len());
                println!("  Reward:       {}", data.reward);
                Ok(())
            }

            NodeCommands::Send { file } => {
                let bytes = std::fs::read(&file)
                    .map_err(|e| CliError::Io(format!("{}: {e}", file.display())))?;
                let tx: Transaction = serde_json::from_slice(&bytes)
                    .map_err(|e| CliError::Validation(format!("malformed transaction file: {e}")))?;

                let data: SubmitTxData =
                    node_post(&self.node, "/rpc", &RpcRequest::SubmitTx { tx }).await?;
                println!("Transaction accepted: {}", data.txid);
                Ok(())
            }

            NodeCommands::Blocks { start, end } => {
                let data: BlocksData =
                    node_post(&self.node, "/rpc", &RpcRequest::GetBlocks { start, end }).await?;

                println!("Blocks ({}):", data.length);
                for block in &data.blocks {
                    println!(
                        "  [{}] {} ({} txs, difficulty {})",
                        block.index,
                        block.hash,
                        block.transactions.len(),
                        block.difficulty
                    );
                }
                Ok(())
            }

            NodeCommands::Consensus => {
                let data: ConsensusData = node_post(&self.node, "/consensus", &()).await?;
                if data.replaced {
                    println!("Chain was replaced, new length {}", data.length);
                } else {
                    println!("Chain is authoritative, length {}", data.length);
                }
                Ok(())
            }

            NodeCommands::AddPeer { address } => {
                let data: PeersData = node_post(
                    &self.node,
                    "/peers",
                    &AddPeerRequest { address },
                )
                .await?;
                println!("Peer added ({} known)", data.peers.len());
                Ok(())
            }

            NodeCommands::ListPeers => {
                let data: PeersData = node_get(&self.node, "/peers").await?;
                println!("Peers ({}):", data.peers.len());
                for peer in &data.peers {
                    println!("  {peer}");
                }
                Ok(())
            }
        }
    }
}
