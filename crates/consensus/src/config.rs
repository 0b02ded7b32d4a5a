//! Immutable per-process configuration
//!
//! Assembled once by the bootstrap code (CLI, hostfile, name resolution)
//! and handed to the engine; nothing here changes while the protocol runs.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::GeneralId;

/// Everything a general needs to know about the system it runs in.
#[derive(Debug, Clone)]
pub struct Config {
    /// This general's id, 1-based.
    pub my_id: GeneralId,
    /// Total number of generals in the hostfile.
    pub num_generals: u32,
    /// Maximum number of traitors the run must tolerate.
    pub max_failures: u32,
    /// UDP service port shared by every general.
    pub port: u16,
    /// Hostnames in id order; `hosts[id - 1]` belongs to general `id`.
    pub hosts: Vec<String>,
    /// Reverse lookup from a peer's IPv4 address to its id.
    pub ip_to_id: HashMap<Ipv4Addr, GeneralId>,
    /// This general's own address, used as the source of every datagram.
    pub my_addr: Ipv4Addr,
    /// Skip cryptographic signature verification.
    pub crypto_off: bool,
    /// Directory holding `host_<id>_key.pem` and `host_<id>_cert.pem`.
    pub keys_dir: PathBuf,
}

impl Config {
    /// Check the invariants the protocol depends on.
    pub fn validate(&self) -> Result<()> {
        if self.num_generals < self.max_failures + 2 {
            return Err(Error::InvalidConfig(format!(
                "tolerating {} failures requires at least {} generals, hostfile lists {}",
                self.max_failures,
                self.max_failures + 2,
                self.num_generals
            )));
        }
        if self.my_id == 0 || self.my_id > self.num_generals {
            return Err(Error::InvalidConfig(format!(
                "id {} is outside 1..={}",
                self.my_id, self.num_generals
            )));
        }
        if self.hosts.len() != self.num_generals as usize {
            return Err(Error::InvalidConfig(format!(
                "host list has {} entries for {} generals",
                self.hosts.len(),
                self.num_generals
            )));
        }
        Ok(())
    }

    /// Hostname of general `id`.
    pub fn host(&self, id: GeneralId) -> &str {
        &self.hosts[(id - 1) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_generals: u32, max_failures: u32) -> Config {
        Config {
            my_id: 1,
            num_generals,
            max_failures,
            port: 4950,
            hosts: (1..=num_generals).map(|i| format!("127.0.0.{i}")).collect(),
            ip_to_id: HashMap::new(),
            my_addr: Ipv4Addr::new(127, 0, 0, 1),
            crypto_off: false,
            keys_dir: PathBuf::from("generals"),
        }
    }

    #[test]
    fn test_accepts_minimum_size() {
        assert!(config(3, 1).validate().is_ok());
        assert!(config(4, 1).validate().is_ok());
    }

    #[test]
    fn test_rejects_too_few_generals() {
        // three generals cannot tolerate two traitors
        let err = config(3, 2).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_out_of_range_id() {
        let mut cfg = config(4, 1);
        cfg.my_id = 5;
        assert!(cfg.validate().is_err());
        cfg.my_id = 0;
        assert!(cfg.validate().is_err());
    }
}
