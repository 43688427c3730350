//! The `starlight` operator CLI. Explicitly out of scope for this agent's
//! specification ("implementers provide whatever thin wrapper their
//! platform wants") -- this is one reasonable thin wrapper, grounded on the
//! source workspace's `argh`-based `cli::Args`/`Command` shape.

use argh::FromArgs;
use starlight_common::{AccountId, FederationAddress};

use crate::app;

/// the starlight payment-channel agent
#[derive(FromArgs)]
pub struct Args {
    #[argh(subcommand)]
    cmd: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Init(InitCommand),
    Serve(ServeCommand),
    CreateChannel(CreateChannelCommand),
    Pay(PayCommand),
    TopUp(TopUpCommand),
    Close(CloseCommand),
    ForceClose(ForceCloseCommand),
    CleanUp(CleanUpCommand),
    Status(StatusCommand),
}

/// Options shared by every subcommand that needs an authenticated agent.
#[derive(FromArgs)]
pub struct Shared {
    /// directory holding the agent's durable store
    #[argh(option)]
    pub data_dir: String,
    /// the agent's configured username
    #[argh(option)]
    pub username: String,
    /// the agent's password (prefer $STARLIGHT_PASSWORD over this flag on a
    /// shared machine)
    #[argh(option)]
    pub password: String,
    /// address this agent's peer RPC surface listens on
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    pub listen_addr: String,
}

/// Create a new agent identity and request testnet funding.
#[derive(FromArgs)]
#[argh(subcommand, name = "init")]
struct InitCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "starlight_common::network::DEFAULT_TESTNET_HORIZON_URL.to_string()")]
    horizon_url: String,
    #[argh(option, default = "starlight_common::network::TESTNET_PASSPHRASE.to_string()")]
    network_passphrase: String,
}

/// Run the agent's dispatch loop and peer RPC surface until interrupted.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
struct ServeCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
}

impl ServeCommand {
    fn shared(self) -> Shared {
        Shared {
            data_dir: self.data_dir,
            username: self.username,
            password: self.password,
            listen_addr: self.listen_addr,
        }
    }
}

/// Open a channel with a federation address (host path); keeps serving
/// afterwards so the protocol can run to completion.
#[derive(FromArgs)]
#[argh(subcommand, name = "create-channel")]
struct CreateChannelCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    /// the counterparty's federation address, e.g. bob*example.com
    #[argh(option)]
    recipient: FederationAddress,
    /// amount the host funds the channel with, in lumens
    #[argh(option)]
    lumens: i64,
    /// this host's own federation base URL, announced to the counterparty
    #[argh(option)]
    host_url: String,
}

/// Propose a channel payment; keeps serving afterwards.
#[derive(FromArgs)]
#[argh(subcommand, name = "pay")]
struct PayCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    #[argh(option)]
    channel: AccountId,
    #[argh(option)]
    lumens: i64,
}

/// Top up a channel's escrow with an on-ledger payment; keeps serving
/// afterwards.
#[derive(FromArgs)]
#[argh(subcommand, name = "top-up")]
struct TopUpCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    #[argh(option)]
    channel: AccountId,
    #[argh(option)]
    lumens: i64,
}

/// Request a cooperative close; keeps serving afterwards.
#[derive(FromArgs)]
#[argh(subcommand, name = "close")]
struct CloseCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    #[argh(option)]
    channel: AccountId,
}

/// Force a unilateral ratchet + settlement close; keeps serving afterwards.
#[derive(FromArgs)]
#[argh(subcommand, name = "force-close")]
struct ForceCloseCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    #[argh(option)]
    channel: AccountId,
}

/// Submit the CleanUp command for a channel stuck before funding.
#[derive(FromArgs)]
#[argh(subcommand, name = "clean-up")]
struct CleanUpCommand {
    #[argh(option)]
    data_dir: String,
    #[argh(option)]
    username: String,
    #[argh(option)]
    password: String,
    #[argh(option, default = "\"127.0.0.1:7000\".to_string()")]
    listen_addr: String,
    #[argh(option)]
    channel: AccountId,
}

/// Print the wallet balance and every channel's state, read-only.
#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
struct StatusCommand {
    #[argh(option)]
    data_dir: String,
}

impl Args {
    pub fn run(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to build tokio runtime");
        match self.cmd {
            Command::Init(c) => rt.block_on(app::init(
                c.data_dir,
                c.username,
                c.password,
                c.horizon_url,
                c.network_passphrase,
            )),
            Command::Serve(c) => rt.block_on(app::serve(c.shared())),
            Command::CreateChannel(c) => rt.block_on(app::create_channel(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.recipient,
                c.lumens,
                c.host_url,
            )),
            Command::Pay(c) => rt.block_on(app::pay(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.channel,
                c.lumens,
            )),
            Command::TopUp(c) => rt.block_on(app::top_up(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.channel,
                c.lumens,
            )),
            Command::Close(c) => rt.block_on(app::close(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.channel,
            )),
            Command::ForceClose(c) => rt.block_on(app::force_close(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.channel,
            )),
            Command::CleanUp(c) => rt.block_on(app::clean_up(
                Shared {
                    data_dir: c.data_dir,
                    username: c.username,
                    password: c.password,
                    listen_addr: c.listen_addr,
                },
                c.channel,
            )),
            Command::Status(c) => rt.block_on(app::status(c.data_dir)),
        }
    }
}
