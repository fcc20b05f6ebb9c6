//! Field-Bus Register Access Library
//!
//! Register-level access to the drilling cell's PLC nodes.
//!
//! # Architecture
//!
//! This library provides:
//! - **`RegisterBus`**: object-safe async trait over a remote bank of 16-bit registers
//! - **`ModbusTransport`**: Modbus TCP implementation, one connection per exchange
//! - **`MemoryBus`**: in-process register bank for tests and bench runs
//! - **Bit helpers**: word-level bit test/set/clear used by the actuator maps

pub mod bits;
pub mod error;
pub mod memory;
pub mod transport;

// Re-export core types
pub use bits::{clear_bit_u16, set_bit_u16, test_bit_u16};
pub use error::{BusError, Result};
pub use memory::MemoryBus;
pub use transport::{ModbusTransport, RegisterBus, TransportOptions};
