use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::framework::OperationMode;

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;

/// Immutable parameters handed to [`Interface::start`](crate::Interface::start).
///
/// Built through [`StartConfig::prepare`], which rejects invalid ranges
/// before the framework ever sees them. The framework reserves the first
/// address of the range for the gateway; guests get leases from the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConfig {
    pub start_addr: Ipv4Addr,
    pub end_addr: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub mode: OperationMode,
    /// Restrict VM-to-VM traffic on the shared network.
    pub isolation: bool,
    /// Verbose framework diagnostics.
    pub debug: bool,
}

impl StartConfig {
    /// Validate the address range against the mask and freeze the start
    /// parameters. Pure: no side effects, no framework calls.
    pub fn prepare(
        start_addr: Ipv4Addr,
        end_addr: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        mode: OperationMode,
        isolation: bool,
        debug: bool,
    ) -> Result<Self> {
        let mask = u32::from(subnet_mask);
        if mask == 0 || !is_contiguous_mask(mask) {
            return Err(Error::InvalidConfiguration(format!(
                "{subnet_mask} is not a valid subnet mask"
            )));
        }

        let start = u32::from(start_addr);
        let end = u32::from(end_addr);
        if start > end {
            return Err(Error::InvalidConfiguration(format!(
                "address range {start_addr}-{end_addr} is empty"
            )));
        }
        if start & mask != end & mask {
            return Err(Error::InvalidConfiguration(format!(
                "range {start_addr}-{end_addr} crosses the {subnet_mask} subnet boundary"
            )));
        }

        Ok(Self {
            start_addr,
            end_addr,
            subnet_mask,
            mode,
            isolation,
            debug,
        })
    }

    /// Shared-mode configuration over the range host frameworks use by
    /// default: 192.168.64.1-192.168.64.255 / 255.255.255.0.
    pub fn default_shared() -> Self {
        Self {
            start_addr: Ipv4Addr::new(192, 168, 64, 1),
            end_addr: Ipv4Addr::new(192, 168, 64, 255),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            mode: OperationMode::Shared,
            isolation: false,
            debug: false,
        }
    }
}

// A valid mask is a run of ones followed by a run of zeroes.
fn is_contiguous_mask(mask: u32) -> bool {
    mask.leading_ones() + mask.trailing_zeros() == 32
}
