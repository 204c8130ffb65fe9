/*!
    define standard MAC-PHY registers

    each register is described by a serializable data type and a constant of type [Register] giving its memory map and address in the device.
    The address space is a fixed contract with the device:

    - memory map 0 holds the transport configuration and status registers, and the clause 22 PHY registers
    - memory map 1 holds the MAC registers
    - memory maps 2 to 6 hold the clause 45 PHY registers, memory map 4 also holds the vendor specific and PLCA registers
*/

use core::{
    fmt,
    marker::PhantomData,
    };
use bilge::prelude::*;

use crate::{
    chunk::PayloadSize,
    pack_word,
    };


/// transport configuration and status
pub const MMS_STANDARD: u8 = 0;
/// MAC registers
pub const MMS_MAC: u8 = 1;
/// vendor specific and PLCA registers
pub const MMS_VENDOR: u8 = 4;
/// highest memory map selector
pub const MMS_MAX: u8 = 15;


/**
    a register is a typed pointer in the MAC-PHY memory maps

    it only holds the memory map and address of the referenced 32 bit value, hence can be created, copied or destroyed at no cost
*/
pub struct Register<T> {
    memory_map: u8,
    address: u16,
    ty: PhantomData<T>,
}
impl<T> Register<T> {
    /// create a register from its memory map and address
    pub const fn new(memory_map: u8, address: u16) -> Self {
        Self{memory_map, address, ty: PhantomData}
    }
    pub const fn memory_map(&self) -> u8 {self.memory_map}
    pub const fn address(&self) -> u16 {self.address}
}
impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Register<T> {}
impl<T> PartialEq for Register<T> {
    fn eq(&self, other: &Self) -> bool {
        self.memory_map == other.memory_map && self.address == other.address
    }
}
impl<T> fmt::Debug for Register<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Register({}, {:#06x})", self.memory_map, self.address)
    }
}


/// identification and version
pub const IDVER: Register<u32> = Register::new(MMS_STANDARD, 0x00);
/// PHY identifier
pub const PHYID: Register<u32> = Register::new(MMS_STANDARD, 0x01);
/// standard capabilities
pub const STDCAP: Register<Capabilities> = Register::new(MMS_STANDARD, 0x02);
/// software reset
pub const RESET: Register<Reset> = Register::new(MMS_STANDARD, 0x03);
/// transport configuration, writing it changes the chunk payload size
pub const CONFIG0: Register<Config0> = Register::new(MMS_STANDARD, 0x04);
/// status events, write 1 to clear
pub const STATUS0: Register<Status0> = Register::new(MMS_STANDARD, 0x08);
pub const STATUS1: Register<u32> = Register::new(MMS_STANDARD, 0x09);
/// transmit credits and receive chunks available
pub const BUFFER_STATUS: Register<BufferStatus> = Register::new(MMS_STANDARD, 0x0B);
/// masks STATUS0 events from raising the extended status and the interrupt
pub const IMASK0: Register<Status0> = Register::new(MMS_STANDARD, 0x0C);

/// MAC network control
pub const MAC_NCR: Register<u32> = Register::new(MMS_MAC, 0x00);
/// MAC network configuration
pub const MAC_NCFGR: Register<u32> = Register::new(MMS_MAC, 0x01);
/// MAC timer increment
pub const MAC_TI: Register<u32> = Register::new(MMS_MAC, 0x77);

/// collision detector control
pub const CDCTL0: Register<CollisionDetect> = Register::new(MMS_VENDOR, 0x87);
/// address of a field read through the indirect access port
pub const INDIRECT_ADDRESS: Register<u32> = Register::new(MMS_VENDOR, 0xD8);
/// value of the indirectly read field
pub const INDIRECT_VALUE: Register<u32> = Register::new(MMS_VENDOR, 0xD9);
/// width of the indirectly read field
pub const INDIRECT_WIDTH: Register<u32> = Register::new(MMS_VENDOR, 0xDA);

/// PLCA register map identification and version
pub const PLCA_IDVER: Register<u32> = Register::new(MMS_VENDOR, 0xCA00);
/// PLCA enable and reset
pub const PLCA_CTRL0: Register<PlcaControl0> = Register::new(MMS_VENDOR, 0xCA01);
/// PLCA node id and node count
pub const PLCA_CTRL1: Register<PlcaControl1> = Register::new(MMS_VENDOR, 0xCA02);
pub const PLCA_STATUS: Register<u32> = Register::new(MMS_VENDOR, 0xCA03);
/// PLCA transmit opportunity timer
pub const PLCA_TO_TIMER: Register<u32> = Register::new(MMS_VENDOR, 0xCA04);
/// PLCA burst mode
pub const PLCA_BURST: Register<u32> = Register::new(MMS_VENDOR, 0xCA05);

/// high and low words of the 3 transmit timestamp capture slots A, B and C
pub const TX_TIMESTAMPS: [(Register<u32>, Register<u32>); 3] = [
    (Register::new(MMS_STANDARD, 0x10), Register::new(MMS_STANDARD, 0x11)),
    (Register::new(MMS_STANDARD, 0x12), Register::new(MMS_STANDARD, 0x13)),
    (Register::new(MMS_STANDARD, 0x14), Register::new(MMS_STANDARD, 0x15)),
    ];


/// clause 22 PHY register, mapped in memory map 0
pub const fn phy_c22(register: u8) -> Register<u32> {
    Register::new(MMS_STANDARD, 0xFF00 | register as u16)
}
/// clause 45 PHY register, each MMD is mapped in its own memory map
pub const fn phy_c45(mmd: Mmd, address: u16) -> Register<u32> {
    Register::new(mmd.memory_map(), address)
}

/// clause 45 MDIO manageable devices reachable through the MAC-PHY memory maps
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mmd {
    PmaPmd = 1,
    Pcs = 3,
    AutoNegotiation = 7,
    PowerUnit = 13,
    Vendor2 = 31,
}
impl Mmd {
    pub const fn memory_map(self) -> u8 {
        match self {
            Mmd::Pcs => 2,
            Mmd::PmaPmd => 3,
            Mmd::Vendor2 => 4,
            Mmd::AutoNegotiation => 5,
            Mmd::PowerUnit => 6,
        }
    }
    pub const fn from_device(device: u8) -> Option<Self> {
        match device {
            1 => Some(Mmd::PmaPmd),
            3 => Some(Mmd::Pcs),
            7 => Some(Mmd::AutoNegotiation),
            13 => Some(Mmd::PowerUnit),
            31 => Some(Mmd::Vendor2),
            _ => None,
        }
    }
}


/// standard capabilities
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Capabilities {
    /// minimum supported chunk payload size
    pub minimum_payload_size: u3,
    _reserved: u1,
    /// cut-through supported
    pub cut_through: bool,
    /// frame timestamps supported
    pub frame_timestamps: bool,
    /// transmit frame FCS validation supported
    pub tx_fcs_validation: bool,
    /// sequence bit check supported
    pub sequence_check: bool,
    /// PHY registers directly mapped in the memory maps
    pub direct_phy_access: bool,
    /// MAC-PHY implements the indirect PHY access port
    pub indirect_phy_access: bool,
    /// control data protection supported
    pub control_protection: bool,
    _reserved2: u21,
}
pack_word!(Capabilities);

/// software reset
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Reset {
    /// reset the whole MAC-PHY, self clearing
    pub software_reset: bool,
    _reserved: u31,
}
pack_word!(Reset);

/// transport configuration
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Config0 {
    /// encoded chunk payload size, see [PayloadSize]
    pub payload_size_code: u3,
    _reserved: u1,
    /// check the sequence bit of transmitted chunks
    pub sequence_enable: bool,
    /// protect control data with their complement
    pub protected: bool,
    /// receive timestamps are 64 bits rather than 32
    pub frame_timestamp_select: bool,
    /// prefix received frames with their timestamp
    pub frame_timestamp_enable: bool,
    pub rx_cut_through: bool,
    pub tx_cut_through: bool,
    pub tx_credit_threshold: u2,
    /// align received frames on the first byte of the chunk payload
    pub zero_align_rx_frame: bool,
    pub cut_through_store_and_forward: bool,
    pub tx_fcs_validation: bool,
    /// the host has configured the MAC-PHY, reported in every footer
    pub sync: bool,
    _reserved2: u16,
}
pack_word!(Config0);

impl Config0 {
    pub fn payload_size(&self) -> PayloadSize {
        PayloadSize::from_code(self.payload_size_code().value())
    }
    pub fn set_payload_size(&mut self, size: PayloadSize) {
        self.set_payload_size_code(u3::new(size.code()));
    }
}

/// status events, write 1 to clear them
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Status0 {
    /// transmit protocol error
    pub tx_protocol_error: bool,
    pub tx_buffer_overflow: bool,
    pub tx_buffer_underflow: bool,
    /// receive buffer overflow, frames were lost
    pub rx_buffer_overflow: bool,
    /// loss of framing
    pub loss_of_frame: bool,
    /// header error
    pub header_error: bool,
    /// reset complete
    pub reset_complete: bool,
    /// PHY interrupt
    pub phy_interrupt: bool,
    pub tx_timestamp_a: bool,
    pub tx_timestamp_b: bool,
    pub tx_timestamp_c: bool,
    pub tx_fcs_error: bool,
    /// control data protection error
    pub control_protection_error: bool,
    _reserved: u19,
}
pack_word!(Status0);

/// transmit credits and receive chunks available
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct BufferStatus {
    pub rx_chunks_available: u8,
    pub tx_credits: u8,
    _reserved: u16,
}
pack_word!(BufferStatus);

/// collision detector control
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct CollisionDetect {
    _reserved: u15,
    /// collision detection enabled, must be off in PLCA mode
    pub enable: bool,
    _reserved2: u16,
}
pack_word!(CollisionDetect);

/// PLCA enable and reset
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct PlcaControl0 {
    _reserved: u14,
    pub reset: bool,
    pub enable: bool,
    _reserved2: u16,
}
pack_word!(PlcaControl0);

/// PLCA node identity
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct PlcaControl1 {
    /// local node id, 0 is the coordinator
    pub node_id: u8,
    /// number of transmit opportunities in a cycle, only meaningful on the coordinator
    pub node_count: u8,
    _reserved: u16,
}
pack_word!(PlcaControl1);
