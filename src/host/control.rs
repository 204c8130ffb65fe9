use std::vec::Vec;
use packbytes::{FromBytes, ToBytes};
use bilge::prelude::*;
use log::*;

use crate::{
    Transport,
    chunk::{TimestampCapture, Timestamp},
    header::{ControlHeader, Word, HEADER_SIZE, TRAILER_SIZE, MAX_REGISTERS},
    registers::{Register, CONFIG0, MMS_MAX, MMS_STANDARD, TX_TIMESTAMPS},
    };
use super::{
    ProtocolError, Result,
    session::{Session, exchange},
    };


/// how the device moves between registers of a multi-register command
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// block access, the address increments after each register
    #[default]
    Increment,
    /// FIFO style access, every register of the command hits the same address
    Fixed,
}

/// bytes of a control command on the wire for `count` registers
pub(super) const fn control_frame_size(count: usize) -> usize {
    HEADER_SIZE + count * 4 + TRAILER_SIZE
}


impl<T: Transport> Session<T> {
    /**
        read `count` consecutive registers

        `count` must be in `1 ..= 128`, it is checked before anything is exchanged
    */
    pub async fn read_registers(&mut self, memory_map: u8, address: u16, count: usize, mode: AddressMode) -> Result<Vec<u32>> {
        let result = self.command(memory_map, address, count, mode, None).await;
        self.check(result)
    }

    /**
        write consecutive registers

        writing memory map 0 may change the chunk payload size, so the configuration register is read back after such writes
    */
    pub async fn write_registers(&mut self, memory_map: u8, address: u16, values: &[u32], mode: AddressMode) -> Result<()> {
        let mut result = self.command(memory_map, address, values.len(), mode, Some(values)).await.map(drop);
        if result.is_ok() && memory_map == MMS_STANDARD {
            result = self.refresh_payload_size().await;
        }
        self.check(result)
    }

    /// read a typed register
    pub async fn read<R: FromBytes<Bytes=[u8; 4]>>(&mut self, register: Register<R>) -> Result<R> {
        let values = self.read_registers(register.memory_map(), register.address(), 1, AddressMode::Increment).await?;
        Ok(R::from_be_bytes(values[0].to_be_bytes()))
    }
    /// write a typed register
    pub async fn write<R: ToBytes<Bytes=[u8; 4]>>(&mut self, register: Register<R>, value: R) -> Result<()> {
        let value = u32::from_be_bytes(value.to_be_bytes());
        self.write_registers(register.memory_map(), register.address(), &[value], AddressMode::Increment).await
    }
    /// read a typed register, change it and write it back
    pub async fn modify<R>(&mut self, register: Register<R>, change: impl FnOnce(R) -> R) -> Result<()>
    where R: FromBytes<Bytes=[u8; 4]> + ToBytes<Bytes=[u8; 4]>
    {
        let value = self.read(register).await?;
        self.write(register, change(value)).await
    }

    /// read the negotiated chunk payload size back from the configuration register
    pub async fn refresh_payload_size(&mut self) -> Result<()> {
        let size = self.read(CONFIG0).await?.payload_size();
        if size != self.payload_size {
            info!("chunk payload size is now {} bytes", size.bytes());
            self.payload_size = size;
        }
        Ok(())
    }

    /// transmit timestamp captured in the given slot, `None` for [TimestampCapture::None]
    pub async fn tx_timestamp(&mut self, slot: TimestampCapture) -> Result<Option<Timestamp>> {
        let (high, low) = match slot {
            TimestampCapture::None => return Ok(None),
            TimestampCapture::A => TX_TIMESTAMPS[0],
            TimestampCapture::B => TX_TIMESTAMPS[1],
            TimestampCapture::C => TX_TIMESTAMPS[2],
        };
        let seconds = self.read(high).await?;
        let nanoseconds = self.read(low).await?;
        Ok(Some(Timestamp {seconds, nanoseconds}))
    }

    /// exchange one control command, returning the read values
    async fn command(&mut self, memory_map: u8, address: u16, count: usize, mode: AddressMode, values: Option<&[u32]>) -> Result<Vec<u32>> {
        if count == 0 || count > MAX_REGISTERS
            {return Err(ProtocolError::InvalidRegisterCount(count))}
        if memory_map > MMS_MAX
            {return Err(ProtocolError::InvalidMemoryMap(memory_map))}

        let mut header = ControlHeader::default();
        header.set_write(values.is_some());
        header.set_address_increment_disable(mode == AddressMode::Fixed);
        header.set_memory_map(u4::new(memory_map));
        header.set_address(address);
        header.set_length(u7::new((count - 1) as u8));
        // the echo is compared with the header as sent, parity included
        let header = ControlHeader::decode(header.encode());

        let size = control_frame_size(count);
        let tx = &mut self.control_tx[.. size];
        tx.fill(0);
        tx[.. HEADER_SIZE].copy_from_slice(&header.encode());
        if let Some(values) = values {
            for (slot, value) in tx[HEADER_SIZE ..].chunks_exact_mut(4).zip(values) {
                slot.copy_from_slice(&value.to_be_bytes());
            }
        }
        debug!("{} {} registers at {}:{:#06x}",
            if values.is_some() {"write"} else {"read"},
            count, memory_map, address);

        exchange(
            &mut self.transport,
            self.config.timeout,
            &self.control_tx[.. size],
            &mut self.control_rx[.. size],
            ).await?;

        // the reply is shifted by the turnaround word
        let rx = &self.control_rx[HEADER_SIZE .. size];
        let echo = ControlHeader::decode_slice(rx)
            .ok_or(ProtocolError::HeaderParityRejected)?;
        if echo.header_bad() {
            error!("MAC-PHY rejected control header {:?}", header);
            return Err(ProtocolError::HeaderParityRejected);
        }
        match values {
            Some(_) => {
                if rx != &self.control_tx[.. size - HEADER_SIZE] {
                    error!("control write echo mismatch at {}:{:#06x}", memory_map, address);
                    return Err(ProtocolError::HeaderParityRejected);
                }
                Ok(Vec::new())
            },
            None => {
                if echo != header {
                    error!("control read echo mismatch: sent {:?}, received {:?}", header, echo);
                    return Err(ProtocolError::HeaderParityRejected);
                }
                Ok(rx[HEADER_SIZE ..][.. count * 4]
                    .chunks_exact(4)
                    .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                    .collect())
            },
        }
    }
}
