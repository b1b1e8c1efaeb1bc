use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use opcheck::config::Options;
use opcheck::driver;
use opcheck::message::comm::{ChannelCommunicator, Communicator};
use opcheck::message::mailbox::Mailbox;
use opcheck::message::tcp::TcpCommunicator;

#[derive(Debug, Parser)]
#[clap(version, about = "Apply differential operators to test functions on every configured mesh")]
struct Opts {
    /// Directory holding the configuration and receiving the output
    #[clap(short = 'd', long)]
    datadir: Option<PathBuf>,

    /// Configuration file [default: <datadir>/BOUT.toml]
    #[clap(short = 'f', long)]
    config: Option<PathBuf>,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,

    /// Rank of this process in a multi-process run
    #[clap(long, default_value = "0")]
    rank: usize,

    /// Listening addresses of every rank, in rank order
    #[clap(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// Configuration overrides, like mesh_0:nx=20
    overrides: Vec<String>,
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    SimpleLogger::new().with_level(opts.log_level).init()?;

    let datadir = opts.datadir.clone().unwrap_or_else(|| PathBuf::from("data"));
    let config = opts.config.clone().unwrap_or_else(|| datadir.join("BOUT.toml"));
    let mut options = Options::load(&config)?;

    for assignment in &opts.overrides {
        options.apply_override(assignment)?;
    }
    if let Some(datadir) = &opts.datadir {
        options.set("datadir", toml::Value::String(datadir.to_string_lossy().into_owned()))?;
    }

    if opts.peers.is_empty() {
        run(&options, ChannelCommunicator::serial())?;
    } else {
        let comm = TcpCommunicator::new(opts.rank, opts.peers.clone())
            .with_context(|| format!("rank {} could not join {:?}", opts.rank, opts.peers))?;
        run(&options, comm)?.finalize();
    }
    Ok(())
}

fn run<C: Communicator>(options: &Options, comm: C) -> Result<C> {
    let mailbox = Mailbox::new(comm);

    match driver::run(options, &mailbox) {
        Ok(summary) => {
            info!(
                "[{}] wrote {} files, skipped {} meshes",
                mailbox.rank(),
                summary.written.len(),
                summary.skipped.len());
            Ok(mailbox.into_inner())
        }
        Err(e) => {
            error!("[{}] {}", mailbox.rank(), e);
            Err(e.into())
        }
    }
}
