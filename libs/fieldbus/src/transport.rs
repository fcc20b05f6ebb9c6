//! Register transport over Modbus TCP
//!
//! The PLC nodes in the cell expose both their sensor words and their
//! actuator words as holding registers at fixed base addresses, so a single
//! read/write register pair covers the whole surface. Each exchange opens a
//! fresh connection and drops it afterwards; the PLC side tears down idle
//! sockets aggressively and a connect-per-exchange client never trips over
//! that. Callers decide retry policy, the transport itself never retries.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client;
use tokio_modbus::prelude::*;
use tracing::trace;

use crate::error::{BusError, Result};

/// Request/response access to a remote bank of 16-bit registers.
///
/// Object-safe so controllers can run against the TCP transport or the
/// in-memory bank interchangeably.
#[async_trait]
pub trait RegisterBus: Send + Sync {
    /// Read `quantity` words starting at `address`. Fresh data every call.
    async fn read_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>>;

    /// Write `words` starting at `address`, acknowledged by the device.
    async fn write_registers(&self, address: u16, words: &[u16]) -> Result<()>;
}

/// Connection tuning for one PLC node
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Deadline applied separately to connect and to each request
    pub exchange_timeout: Duration,
    /// Modbus unit identifier
    pub slave_id: u8,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_millis(2000),
            slave_id: 1,
        }
    }
}

/// Modbus TCP register transport, one connection per exchange
pub struct ModbusTransport {
    addr: SocketAddr,
    options: TransportOptions,
}

impl ModbusTransport {
    pub fn new(addr: SocketAddr, options: TransportOptions) -> Self {
        Self { addr, options }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a connection for a single exchange. Dropping the returned
    /// context closes the socket.
    async fn open(&self) -> Result<client::Context> {
        let connect = client::tcp::connect_slave(self.addr, Slave(self.options.slave_id));
        let ctx = timeout(self.options.exchange_timeout, connect)
            .await
            .map_err(|_| {
                BusError::timeout(format!(
                    "connect to {} after {} ms",
                    self.addr,
                    self.options.exchange_timeout.as_millis()
                ))
            })?
            .map_err(|e| BusError::connect(format!("{}: {}", self.addr, e)))?;
        Ok(ctx)
    }

    fn exchange_error(&self, op: &str, address: u16, err: std::io::Error) -> BusError {
        // tokio-modbus surfaces device exceptions as InvalidData
        if err.kind() == std::io::ErrorKind::InvalidData {
            BusError::protocol(format!("{} at {}: {}", op, address, err))
        } else {
            BusError::io(format!("{} at {}: {}", op, address, err))
        }
    }
}

#[async_trait]
impl RegisterBus for ModbusTransport {
    async fn read_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        trace!(addr = %self.addr, address, quantity, "reading registers");

        let mut ctx = self.open().await?;
        let words = timeout(
            self.options.exchange_timeout,
            ctx.read_holding_registers(address, quantity),
        )
        .await
        .map_err(|_| {
            BusError::timeout(format!(
                "read {} words at {} after {} ms",
                quantity,
                address,
                self.options.exchange_timeout.as_millis()
            ))
        })?
        .map_err(|e| self.exchange_error("read", address, e))?;

        if words.len() != quantity as usize {
            return Err(BusError::protocol(format!(
                "read at {}: expected {} words, got {}",
                address,
                quantity,
                words.len()
            )));
        }
        Ok(words)
    }

    async fn write_registers(&self, address: u16, words: &[u16]) -> Result<()> {
        trace!(addr = %self.addr, address, count = words.len(), "writing registers");

        let mut ctx = self.open().await?;
        timeout(
            self.options.exchange_timeout,
            ctx.write_multiple_registers(address, words),
        )
        .await
        .map_err(|_| {
            BusError::timeout(format!(
                "write {} words at {} after {} ms",
                words.len(),
                address,
                self.options.exchange_timeout.as_millis()
            ))
        })?
        .map_err(|e| self.exchange_error("write", address, e))?;
        Ok(())
    }
}
