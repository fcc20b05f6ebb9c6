//! In-process register bank
//!
//! Stands in for a PLC node in tests and bench runs: a sparse word map with
//! the same `RegisterBus` contract as the TCP transport, plus poke/peek
//! helpers for scripting sensor states and inspecting actuator words.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bits::{clear_bit_u16, set_bit_u16, test_bit_u16};
use crate::error::{BusError, Result};
use crate::transport::RegisterBus;

/// In-memory register bank. Clones share the same words.
#[derive(Clone, Default)]
pub struct MemoryBus {
    words: Arc<RwLock<HashMap<u16, u16>>>,
    fail_budget: Arc<AtomicU32>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` exchanges fail with an IO error.
    pub fn fail_exchanges(&self, count: u32) {
        self.fail_budget.store(count, Ordering::SeqCst);
    }

    fn consume_failure(&self) -> Result<()> {
        // Decrement-if-positive; concurrent exchanges may race but the
        // budget never goes negative.
        let mut budget = self.fail_budget.load(Ordering::SeqCst);
        while budget > 0 {
            match self.fail_budget.compare_exchange(
                budget,
                budget - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(BusError::io("injected exchange failure")),
                Err(current) => budget = current,
            }
        }
        Ok(())
    }

    /// Overwrite one word directly, bypassing the bus contract.
    pub async fn poke(&self, address: u16, word: u16) {
        self.words.write().await.insert(address, word);
    }

    /// Read one word directly; unwritten addresses read 0.
    pub async fn peek(&self, address: u16) -> u16 {
        self.words.read().await.get(&address).copied().unwrap_or(0)
    }

    /// Set or clear one bit of a word directly.
    pub async fn poke_bit(&self, address: u16, bit_index: u8, on: bool) {
        let mut words = self.words.write().await;
        let word = words.get(&address).copied().unwrap_or(0);
        let word = if on {
            set_bit_u16(word, bit_index)
        } else {
            clear_bit_u16(word, bit_index)
        };
        words.insert(address, word);
    }

    /// Test one bit of a word directly.
    pub async fn peek_bit(&self, address: u16, bit_index: u8) -> bool {
        test_bit_u16(self.peek(address).await, bit_index)
    }
}

#[async_trait]
impl RegisterBus for MemoryBus {
    async fn read_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        self.consume_failure()?;
        let words = self.words.read().await;
        // Widened so a read ending exactly at the top of the window is legal
        let end = address as u32 + quantity as u32;
        if end > u16::MAX as u32 + 1 {
            return Err(BusError::address_range(format!(
                "read {}+{}",
                address, quantity
            )));
        }
        Ok((address as u32..end)
            .map(|a| words.get(&(a as u16)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<()> {
        self.consume_failure()?;
        let mut words = self.words.write().await;
        for (i, value) in values.iter().enumerate() {
            let a = address
                .checked_add(i as u16)
                .ok_or_else(|| BusError::address_range(format!("write {}+{}", address, i)))?;
            words.insert(a, *value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unwritten_words_read_zero() {
        let bus = MemoryBus::new();
        assert_eq!(bus.read_registers(8001, 2).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let bus = MemoryBus::new();
        bus.write_registers(8003, &[0b0110, 7]).await.unwrap();
        assert_eq!(bus.read_registers(8003, 2).await.unwrap(), vec![0b0110, 7]);
        assert_eq!(bus.peek(8003).await, 0b0110);
    }

    #[tokio::test]
    async fn test_clones_share_words() {
        let bus = MemoryBus::new();
        let other = bus.clone();
        other.poke_bit(8001, 5, true).await;
        assert!(bus.peek_bit(8001, 5).await);
        assert_eq!(bus.read_registers(8001, 1).await.unwrap(), vec![0b10_0000]);
    }

    #[tokio::test]
    async fn test_injected_failures_exhaust() {
        let bus = MemoryBus::new();
        bus.fail_exchanges(2);
        assert!(bus.read_registers(0, 1).await.is_err());
        assert!(bus.write_registers(0, &[1]).await.is_err());
        assert!(bus.read_registers(0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_address_overflow_rejected() {
        let bus = MemoryBus::new();
        let err = bus.read_registers(u16::MAX, 2).await.unwrap_err();
        assert!(matches!(err, BusError::AddressRange(_)));

        // The last word of the window is still addressable
        bus.poke(u16::MAX, 42).await;
        assert_eq!(bus.read_registers(u16::MAX, 1).await.unwrap(), vec![42]);
    }
}
