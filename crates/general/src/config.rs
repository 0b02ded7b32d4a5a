//! Bootstrap: hostfile to configuration
//!
//! Reads the hostfile, resolves every general to an IPv4 address for the
//! reverse lookup, and finds this process's own id by matching the local
//! hostname against the file. Resolution failures for peers are tolerated
//! (their datagrams will simply be dropped); failing to place ourselves
//! is fatal.

use std::collections::HashMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bg_consensus::{Config, GeneralId, Order};
use tokio::net::lookup_host;

use crate::Args;

pub(crate) async fn bootstrap(args: &Args) -> Result<(Config, Option<Order>)> {
    let text = fs::read_to_string(&args.hostfile)
        .with_context(|| format!("could not read hostfile {}", args.hostfile.display()))?;
    let hosts: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if hosts.is_empty() {
        bail!("hostfile {} lists no generals", args.hostfile.display());
    }

    let my_name = hostname::get()
        .context("could not determine local hostname")?
        .to_string_lossy()
        .into_owned();

    let mut my_id: Option<GeneralId> = None;
    let mut ip_to_id = HashMap::new();
    for (index, host) in hosts.iter().enumerate() {
        let id = index as GeneralId + 1;
        match resolve_v4(host, args.port).await {
            Some(ip) => {
                ip_to_id.insert(ip, id);
            }
            None => tracing::warn!("could not resolve {}; its datagrams will be dropped", host),
        }
        if host == &my_name {
            my_id = Some(id);
        }
    }

    let Some(my_id) = my_id else {
        bail!(
            "local hostname {} does not appear in {}",
            my_name,
            args.hostfile.display()
        );
    };
    let Some((&my_addr, _)) = ip_to_id.iter().find(|&(_, &id)| id == my_id) else {
        bail!("could not resolve own hostname {}", my_name);
    };

    let config = Config {
        my_id,
        num_generals: hosts.len() as u32,
        max_failures: args.max_failures,
        port: args.port,
        hosts,
        ip_to_id,
        my_addr,
        crypto_off: args.crypto_off,
        keys_dir: PathBuf::from("generals"),
    };
    Ok((config, args.order.map(Order::from)))
}

async fn resolve_v4(host: &str, port: u16) -> Option<Ipv4Addr> {
    match lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        }),
        Err(e) => {
            tracing::warn!("resolving {} failed: {}", host, e);
            None
        }
    }
}
