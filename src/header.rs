/*!
    32 bit headers and footers of the control and data sub-protocols

    every word travels big endian, and its bit 0 is an odd parity over the 31 other bits.
    Fields are only accessed through the bitfield accessors, the conversion to and from
    wire bytes happens in [Word::encode] and [Word::decode].
*/

use bilge::prelude::*;

use crate::utils::{parity_ok, with_parity};


/// size of a header or footer on the wire
pub const HEADER_SIZE: usize = 4;
/// size of the turnaround word at the end of every control frame
pub const TRAILER_SIZE: usize = 4;
/// maximum number of registers in one control command
pub const MAX_REGISTERS: usize = 128;


/// conversion of a header word to and from its wire bytes
pub trait Word: Copy + From<u32> + Into<u32> {
    /// big endian bytes with the parity bit recomputed
    fn encode(self) -> [u8; HEADER_SIZE] {
        with_parity(self.into()).to_be_bytes()
    }
    /// fields of received bytes, parity is not checked here
    fn decode(bytes: [u8; HEADER_SIZE]) -> Self {
        Self::from(u32::from_be_bytes(bytes))
    }
    /// decode the first 4 bytes of `bytes`, which must be at least that long
    fn decode_slice(bytes: &[u8]) -> Option<Self> {
        Some(Self::decode(bytes.get(.. HEADER_SIZE)?.try_into().ok()?))
    }
    /// true if the word has a correct odd parity
    fn parity_ok(self) -> bool {
        parity_ok(self.into())
    }
}


/// header of a control command, also echoed back by the MAC-PHY
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct ControlHeader {
    pub parity: bool,
    /// number of registers minus one
    pub length: u7,
    /// first register address
    pub address: u16,
    /// memory map selector
    pub memory_map: u4,
    /// keep accessing the same address instead of incrementing it for each register
    pub address_increment_disable: bool,
    /// write registers, otherwise read them
    pub write: bool,
    /// set by the MAC-PHY in its echo when the received header had a bad parity
    pub header_bad: bool,
    /// always false for a control header
    pub data_not_control: bool,
}
crate::pack_word!(ControlHeader);
impl Word for ControlHeader {}

/// header of a transmitted data chunk
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct DataHeader {
    pub parity: bool,
    _reserved: u5,
    /// capture the transmit time of the frame starting in this chunk in one of the 3 timestamp slots
    pub time_stamp_capture: u2,
    /// last valid byte of a frame ending in this chunk
    pub end_byte_offset: u6,
    /// a frame ends in this chunk
    pub end_valid: bool,
    _reserved2: bool,
    /// first 32 bit word of a frame starting in this chunk
    pub start_word_offset: u4,
    /// a frame starts in this chunk
    pub start_valid: bool,
    /// the payload carries frame data
    pub data_valid: bool,
    pub vendor_specific: u2,
    _reserved3: u5,
    /// ask the MAC-PHY not to send receive data in the reply
    pub no_receive: bool,
    /// toggled on every chunk
    pub sequence: bool,
    /// always true for a data header
    pub data_not_control: bool,
}
crate::pack_word!(DataHeader);
impl Word for DataHeader {}

impl DataHeader {
    /// header of a chunk carrying no frame data, used to poll the receive side
    pub fn empty() -> Self {
        let mut header = Self::default();
        header.set_data_not_control(true);
        header
    }
}

/// footer following the payload of a received data chunk
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct DataFooter {
    pub parity: bool,
    /// number of chunks the MAC-PHY can accept right now
    pub tx_credits: u5,
    pub receive_timestamp_parity: bool,
    /// the frame starting in this chunk is prefixed by its 8 byte receive timestamp
    pub receive_timestamp_added: bool,
    pub end_byte_offset: u6,
    pub end_valid: bool,
    /// the frame ending in this chunk must be dropped
    pub frame_drop: bool,
    pub start_word_offset: u4,
    pub start_valid: bool,
    pub data_valid: bool,
    pub vendor_specific: u2,
    /// number of chunks of receive data waiting in the MAC-PHY
    pub rx_chunks_available: u5,
    /// the MAC-PHY configuration has been synchronized by the host
    pub config_sync: bool,
    /// the header of the matching transmitted chunk had a bad parity
    pub header_bad: bool,
    /// STATUS0 holds an unmasked event
    pub extended_status: bool,
}
crate::pack_word!(DataFooter);
impl Word for DataFooter {}

impl DataFooter {
    /// first payload byte of a frame starting in this chunk
    pub fn start_offset(&self) -> usize {
        usize::from(self.start_word_offset().value()) * 4
    }
    /// last payload byte of a frame ending in this chunk
    pub fn end_offset(&self) -> usize {
        usize::from(self.end_byte_offset().value())
    }
}
