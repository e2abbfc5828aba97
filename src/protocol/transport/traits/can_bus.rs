//! Minimal abstraction for an asynchronous CAN bus. Allows the engine to plug
//! into various implementations (SocketCAN, vendor adapters, in-memory pairs…).
use async_trait::async_trait;

use crate::protocol::transport::can_frame::CanFrame;

/// Contract to send and receive CAN frames asynchronously.
///
/// The adapter clones the bus once: one handle is owned by the receive pump,
/// the other serves transmissions. Implementations must therefore route
/// frames received on any clone to the single `recv` caller.
#[async_trait]
pub trait CanBus: Clone + Send + Sync + 'static {
    type Error: core::fmt::Debug + Send;
    /// Emit a frame on the bus.
    async fn send(&mut self, frame: &CanFrame) -> Result<(), Self::Error>;
    /// Retrieve the next available frame. Asynchronously waits until data arrives.
    async fn recv(&mut self) -> Result<CanFrame, Self::Error>;
}
