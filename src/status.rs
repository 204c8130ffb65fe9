/*!
    classification of the events reported in [crate::registers::STATUS0] when a footer has its extended status flag set
*/

use core::fmt;

use crate::registers::Status0;


/// device condition behind an extended status
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusKind {
    /// receive buffer overflow, frames were lost but the session can go on
    BufferOverflow,
    /// the device rejected the chunk sequence sent by the host
    TransmitProtocolError,
    /// the device lost chunk framing
    LossOfFrame,
    /// the device received a header it could not accept
    HeaderError,
}
impl StatusKind {
    /// only a buffer overflow leaves the session usable
    pub fn is_fatal(self) -> bool {
        self != StatusKind::BufferOverflow
    }
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::BufferOverflow => "receive buffer overflow",
            StatusKind::TransmitProtocolError => "transmit protocol error",
            StatusKind::LossOfFrame => "loss of framing",
            StatusKind::HeaderError => "header error",
        }
    }
}
impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// most severe condition in a status value, fatal conditions first
pub fn classify(status: Status0) -> Option<StatusKind> {
    if status.tx_protocol_error()
        {Some(StatusKind::TransmitProtocolError)}
    else if status.loss_of_frame()
        {Some(StatusKind::LossOfFrame)}
    else if status.header_error()
        {Some(StatusKind::HeaderError)}
    else if status.rx_buffer_overflow()
        {Some(StatusKind::BufferOverflow)}
    else
        {None}
}
