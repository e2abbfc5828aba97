//! SAE J1939 building blocks: network management (NAME, address claiming)
//! and CAN transport (identifiers, frames, BAM).
pub mod managment;
pub mod transport;
