//! Discovery subsystem
//!
//! - **address**: best-effort hardware address from manufacturer data
//! - **device**: the per-session device record
//! - **registry**: deduplicating, insertion-ordered device store
//! - **session**: scan session state machine
//! - **connect**: connection hand-off through the radio's peripheral cache

pub mod address;
pub mod connect;
pub mod device;
pub mod registry;
pub mod session;

pub use address::{derive_address, DERIVED_ADDRESS_LEN};
pub use connect::{ConnectState, ConnectionManager, ConnectionStatus};
pub use device::{Device, UNKNOWN_DEVICE_NAME};
pub use registry::DeviceRegistry;
pub use session::{
    ScanConfig, ScanController, ScanEvent, SessionPhase, DEFAULT_SCAN_WINDOW,
};
