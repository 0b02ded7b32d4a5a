//! Byzantine generals agreement node
//!
//! One process per general. The process that is given an order with `-o`
//! acts as the commander; every other process is a lieutenant. On
//! termination each process prints the order it agreed on.

use std::path::PathBuf;

use anyhow::Result;
use bg_consensus::{General, Order};
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

/// The order given on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum OrderArg {
    Attack,
    Retreat,
}

impl From<OrderArg> for Order {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Attack => Order::Attack,
            OrderArg::Retreat => Order::Retreat,
        }
    }
}

/// Signed-messages solution of the Byzantine generals problem
#[derive(Parser, Debug)]
#[command(name = "general", disable_help_flag = true)]
pub(crate) struct Args {
    /// UDP port every general listens on
    #[arg(short = 'p', value_parser = clap::value_parser!(u16).range(1024..=65535))]
    pub(crate) port: u16,

    /// File listing one hostname per line; line order assigns ids from 1
    #[arg(short = 'h')]
    pub(crate) hostfile: PathBuf,

    /// Maximum number of faulty generals to tolerate
    #[arg(short = 'f')]
    pub(crate) max_failures: u32,

    /// Turn signature verification off (testing only)
    #[arg(short = 'c', action = ArgAction::SetTrue)]
    pub(crate) crypto_off: bool,

    /// Act as commander and issue this order
    #[arg(short = 'o', value_enum)]
    pub(crate) order: Option<OrderArg>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let (config, order) = config::bootstrap(&args).await?;
    let my_id = config.my_id;
    tracing::info!(
        "general {} of {}, tolerating {} failure(s)",
        my_id,
        config.num_generals,
        config.max_failures
    );

    let general = General::new(config, order)?;
    let decision = general.run().await?;

    println!("\n{}: Agreed on {}", my_id, decision);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
