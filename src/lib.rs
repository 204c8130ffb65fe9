/*!
    protocol engine of the OPEN Alliance 10BASE-T1x MAC-PHY serial interface

    a host configures a MAC-PHY through control commands reading and writing its registers, and exchanges ethernet frames with it as fixed size data chunks, all over a full-duplex byte channel (SPI).

    - the no_std core ([header], [registers], [chunk], [flow], [status]) implements the wire formats and the protocol state machines
    - the `host` feature provides the protocol session and its worker task, over any [Transport]
    - the `device` feature provides a simulated MAC-PHY answering like a real one
*/
#![no_std]
#[cfg(any(feature = "std", test))]
extern crate std;

mod utils;
mod transport;

pub mod header;
pub mod registers;
pub mod chunk;
pub mod flow;
pub mod status;
#[cfg(feature = "host")]
pub mod host;
#[cfg(feature = "device")]
pub mod device;

pub use transport::Transport;
