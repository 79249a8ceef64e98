//! Inspection relay: forward, quarantine or block

mod mode;
mod pipeline;

pub use mode::{DeliveryGate, ScanStrategy};
pub use pipeline::InspectionRelay;
