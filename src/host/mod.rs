/*!
    implement the host side of the protocol in `std` environment.

    The central resource is the [Session] struct which owns the [crate::Transport] and all protocol state: flow control, frame accumulators, negotiated payload size.

    - for direct sequential use, call the [Session] methods: register access, bring-up, data transfers
    - for concurrent use, split a session with [worker] into a cloneable [MacPhy] handle and a [Worker] that **must** be running to serve the handle requests
*/

/// protocol session, data exchanges and status decoding, this is the tricky part of the code
mod session;
/// control commands reading and writing registers
mod control;
/// PLCA node configuration and link bring-up
mod plca;
/// session configuration
mod config;
/// single task serializing all accesses to the transport
mod worker;
/// transport over an `embedded-hal-async` SPI device
#[cfg(feature = "embedded-hal")]
mod spi;


pub use session::{Session, Statistics};
pub use control::AddressMode;
pub use config::{Config, NodeConfig, NodeRole};
pub use worker::{MacPhy, Worker, worker};
#[cfg(feature = "embedded-hal")]
pub use spi::SpiTransport;

use std::{
    string::String,
    vec::Vec,
    };
use thiserror::Error;

use crate::{
    chunk::{FrameError, Timestamp},
    status::StatusKind,
    };


/// error regarding the protocol exchanges with the MAC-PHY
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("header rejected by the MAC-PHY or echo mismatch")]
    HeaderParityRejected,
    #[error("MAC-PHY reported {0}")]
    DeviceExtendedStatus(StatusKind),
    #[error("MAC-PHY configuration is not synchronized")]
    ConfigUnsynced,
    #[error("cannot transmit an empty frame")]
    EmptyFrame,
    #[error("frame of {0} bytes is too large")]
    FrameTooLarge(usize),
    #[error("register count {0} is not in 1..=128")]
    InvalidRegisterCount(usize),
    #[error("memory map {0} does not exist")]
    InvalidMemoryMap(u8),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("software reset did not complete in time")]
    ResetTimeout,
    #[error("protocol worker is not running")]
    Closed,
}
impl ProtocolError {
    /// the session cannot continue, the link must be brought up again
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::TransportFailure(_)
            | ProtocolError::HeaderParityRejected
            | ProtocolError::ResetTimeout
            | ProtocolError::Closed => true,
            ProtocolError::DeviceExtendedStatus(kind) => kind.is_fatal(),
            _ => false,
        }
    }
}
impl From<FrameError> for ProtocolError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Empty => Self::EmptyFrame,
            FrameError::TooLarge(size) => Self::FrameTooLarge(size),
        }
    }
}

pub type Result<T> = core::result::Result<T, ProtocolError>;


/// received ethernet frame
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    /// receive timestamp, when the MAC-PHY is configured to add them
    pub timestamp: Option<Timestamp>,
}

/// delivery of reassembled inbound frames to the network stack
pub trait FrameSink {
    /// called once per complete frame, in arrival order
    fn on_frame_received(&mut self, frame: &[u8], timestamp: Option<Timestamp>);
}
impl FrameSink for Vec<Frame> {
    fn on_frame_received(&mut self, frame: &[u8], timestamp: Option<Timestamp>) {
        self.push(Frame {data: frame.to_vec(), timestamp});
    }
}
impl FrameSink for tokio::sync::mpsc::UnboundedSender<Frame> {
    fn on_frame_received(&mut self, frame: &[u8], timestamp: Option<Timestamp>) {
        // a closed receiver means nobody listens anymore
        self.send(Frame {data: frame.to_vec(), timestamp}).ok();
    }
}
