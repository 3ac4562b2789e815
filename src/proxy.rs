//! Duplex pump between a VM-side datagram socket and a running interface.
//!
//! One datagram carries exactly one link-layer frame in each direction.
//! Frames from the VM are written to the network as they arrive on the
//! socket; inbound frames are drained in response to bridge events, one
//! read per announced packet.

use anyhow::{Context, Result};
use tokio::net::UnixDatagram;

use crate::bridge::{Event, EventBridge};
use crate::error::Error;
use crate::iface::Interface;

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod proxy_tests;

/// Run until the interface is stopped (clean return), the framework reports
/// it dead, or the socket fails.
pub async fn run(iface: &Interface, bridge: &mut EventBridge, sock: &UnixDatagram) -> Result<()> {
    let capacity = iface
        .capacity()
        .context("proxy needs a running interface")?;
    let mut buf = vec![0u8; capacity.max_packet_size];

    loop {
        tokio::select! {
            received = sock.recv(&mut buf) => {
                let n = received.context("receiving from VM socket")?;
                if n == 0 {
                    continue;
                }
                match iface.write(&buf[..n]) {
                    Ok(()) => {}
                    // Oversized or congested frames are dropped; the pump keeps going.
                    Err(err @ (Error::PacketTooLarge { .. } | Error::WriteFailed(_))) => {
                        tracing::warn!(error = %err, len = n, "dropping frame from VM");
                    }
                    Err(err) => return Err(err).context("writing to interface"),
                }
            }
            event = bridge.recv() => {
                match event {
                    Some(Event::PacketsAvailable { count }) => {
                        drain(iface, sock, count).await?;
                    }
                    Some(Event::InterfaceDead) => {
                        return Err(Error::InterfaceDead).context("interface died under the proxy");
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

async fn drain(iface: &Interface, sock: &UnixDatagram, count: u64) -> Result<()> {
    for _ in 0..count {
        let frame = match iface.read() {
            Ok(frame) => frame,
            Err(err @ Error::ReadFailed(_)) => {
                // The queue ran dry early; abandon the rest of this batch.
                tracing::warn!(error = %err, "reading announced packet");
                return Ok(());
            }
            Err(err) => return Err(err).context("reading from interface"),
        };
        if let Err(err) = sock.send(&frame).await {
            tracing::warn!(error = %err, len = frame.len(), "dropping frame to VM");
        }
    }
    Ok(())
}
