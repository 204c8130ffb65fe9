/*!
    credit based flow control between the host and the MAC-PHY

    the counters are refreshed by every received footer, or by an explicit read of [crate::registers::BUFFER_STATUS] when they are unknown.
*/

use crate::{
    header::DataFooter,
    registers::BufferStatus,
    };


/// highest value a footer can report for either counter
pub const MAX_CREDITS: u8 = 31;

/// last known transmit credits and receive chunks available
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowControl {
    tx_credits: u8,
    rx_chunks_available: u8,
    seeded: bool,
}
impl FlowControl {
    /// unknown state, must be seeded before any data transfer
    pub const fn new() -> Self {
        Self {tx_credits: 0, rx_chunks_available: 0, seeded: false}
    }
    /// counters reflect the device state
    pub fn seeded(&self) -> bool {self.seeded}
    /// chunks the device can accept before the next refresh
    pub fn tx_credits(&self) -> u8 {self.tx_credits}
    /// chunks of receive data waiting in the device
    pub fn rx_chunks_available(&self) -> u8 {self.rx_chunks_available}

    /// seed the counters from the buffer status register
    pub fn seed(&mut self, status: BufferStatus) {
        self.tx_credits = status.tx_credits().min(MAX_CREDITS);
        self.rx_chunks_available = status.rx_chunks_available().min(MAX_CREDITS);
        self.seeded = true;
    }
    /// refresh the counters from a received footer
    pub fn update(&mut self, footer: &DataFooter) {
        self.tx_credits = footer.tx_credits().value();
        self.rx_chunks_available = footer.rx_chunks_available().value();
        self.seeded = true;
    }
    /// number of data chunks that may be sent now, at most `limit`
    pub fn sendable(&self, limit: usize) -> usize {
        usize::from(self.tx_credits).min(limit)
    }
    /// account for chunks sent before the next footer arrives
    pub fn consume(&mut self, chunks: usize) {
        self.tx_credits = self.tx_credits.saturating_sub(u8::try_from(chunks).unwrap_or(u8::MAX));
    }
    /// forget everything, the next transfer must seed again
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
