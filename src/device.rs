/*!
    simulated MAC-PHY

    [SimulatedMacPhy] implements [Transport] and answers control commands and data chunks the way a real MAC-PHY does. It is meant for testing host code without hardware.

    The simulated device holds a register file, a transmit buffer counted in chunks and a queue of receive chunks. Tests inject receive frames, raise status events or transport failures, and inspect what the host wrote and transmitted.
*/

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    vec::Vec,
    };
use bilge::prelude::*;
use log::*;

use crate::{
    Transport,
    chunk::{PayloadSize, Timestamp},
    header::{ControlHeader, DataHeader, DataFooter, Word, HEADER_SIZE, TRAILER_SIZE},
    registers::{self, Config0, Register},
    };


/// STATUS0 events raising the extended status flag
const STATUS_ERRORS: u32 = 0x3F;
const STATUS_TX_PROTOCOL_ERROR: u32 = 1 << 0;
const STATUS_TX_BUFFER_OVERFLOW: u32 = 1 << 1;
const STATUS_RESET_COMPLETE: u32 = 1 << 6;
/// transmit buffer size in chunks
const DEFAULT_CREDITS: u8 = 24;


/// failure of the simulated transport
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// injected by [SimulatedMacPhy::fail_next_exchange]
    Disconnected,
    /// the exchange size matches neither a control command nor whole chunks
    Framing(usize),
}

/// receive chunk waiting in the device
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawChunk {
    /// payload, zero padded to the chunk payload size
    pub payload: Vec<u8>,
    /// word offset of a frame starting in this chunk
    pub start: Option<u8>,
    /// byte offset of the last byte of a frame ending in this chunk
    pub end: Option<u8>,
    pub timestamp_added: bool,
    pub frame_drop: bool,
}

/// exchange as seen by the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exchange {
    Control {
        write: bool,
        memory_map: u8,
        address: u16,
        count: usize,
    },
    Data {
        /// chunks carrying transmit data
        data_chunks: usize,
        /// all chunks of the exchange
        chunks: usize,
    },
}

/// cloneable handle to a simulated MAC-PHY, all clones share the same device
#[derive(Clone, Default)]
pub struct SimulatedMacPhy {
    state: Arc<Mutex<DeviceState>>,
}

struct DeviceState {
    registers: HashMap<(u8, u16), u32>,
    indirect: HashMap<u32, u32>,
    writes: Vec<(u8, u16, u32)>,
    exchanges: Vec<Exchange>,

    credit_limit: u8,
    credits_used: u8,
    hold_credits: bool,
    /// credits the host last observed, from a footer or the buffer status
    reported_credits: Option<u8>,
    credit_violations: usize,

    tx_frame: Vec<u8>,
    tx_in_progress: bool,
    transmitted: Vec<Vec<u8>>,
    rx_chunks: VecDeque<RawChunk>,

    fail_next: bool,
    stall_next: bool,
    reject_next_header: bool,
    stall_reset: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        let mut state = Self {
            registers: HashMap::new(),
            indirect: HashMap::from([(0x04, 0x03), (0x08, 0x1E)]),
            writes: Vec::new(),
            exchanges: Vec::new(),
            credit_limit: DEFAULT_CREDITS,
            credits_used: 0,
            hold_credits: false,
            reported_credits: None,
            credit_violations: 0,
            tx_frame: Vec::new(),
            tx_in_progress: false,
            transmitted: Vec::new(),
            rx_chunks: VecDeque::new(),
            fail_next: false,
            stall_next: false,
            reject_next_header: false,
            stall_reset: false,
        };
        state.reset();
        state
    }
}

impl SimulatedMacPhy {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// current value of a register
    pub fn register(&self, memory_map: u8, address: u16) -> u32 {
        self.lock().read(memory_map, address)
    }
    /// set a register without logging it as a host write
    pub fn set_register(&self, memory_map: u8, address: u16, value: u32) {
        self.lock().registers.insert((memory_map, address), value);
    }
    /// set a field read through the indirect access port
    pub fn set_indirect(&self, field: u32, value: u32) {
        self.lock().indirect.insert(field, value);
    }
    /// every register write performed by the host, in order
    pub fn writes(&self) -> Vec<(u8, u16, u32)> {
        self.lock().writes.clone()
    }
    /// every exchange performed by the host, in order
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.lock().exchanges.clone()
    }
    /// frames completely received from the host
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.lock().transmitted.clone()
    }
    /// exchanges carrying more data chunks than the host had observed credits for
    pub fn credit_violations(&self) -> usize {
        self.lock().credit_violations
    }
    /// receive chunks not yet fetched by the host
    pub fn pending_rx_chunks(&self) -> usize {
        self.lock().rx_chunks.len()
    }

    /// size of the transmit buffer in chunks
    pub fn set_credit_limit(&self, limit: u8) {
        self.lock().credit_limit = limit;
    }
    /// keep the transmit buffer full between exchanges instead of draining it
    pub fn hold_credits(&self, hold: bool) {
        self.lock().hold_credits = hold;
    }
    /// the next exchange fails at the transport level
    pub fn fail_next_exchange(&self) {
        self.lock().fail_next = true;
    }
    /// the next exchange never completes, as with a hung bus
    pub fn stall_next_exchange(&self) {
        self.lock().stall_next = true;
    }
    /// the next received header is answered as having a bad parity
    pub fn reject_next_header(&self) {
        self.lock().reject_next_header = true;
    }
    /// never report the completion of software resets
    pub fn stall_reset(&self, stall: bool) {
        self.lock().stall_reset = stall;
    }
    /// set STATUS0 events, reported through the extended status flag
    pub fn raise_status(&self, bits: u32) {
        let mut state = self.lock();
        let status = state.read(registers::STATUS0.memory_map(), registers::STATUS0.address());
        state.registers.insert(address_of(registers::STATUS0), status | bits);
    }
    /// forget the host configuration, as after a brown out of the configuration logic
    pub fn lose_config_sync(&self) {
        let mut state = self.lock();
        let mut config = Config0::from(state.read_register(registers::CONFIG0));
        config.set_sync(false);
        state.registers.insert(address_of(registers::CONFIG0), u32::from(config));
    }

    /// queue a frame for reception, split into chunks of the current payload size
    pub fn inject_frame(&self, frame: &[u8]) {
        self.inject(frame, false);
    }
    /// queue a frame prefixed with its receive timestamp
    pub fn inject_timestamped_frame(&self, frame: &[u8], timestamp: Timestamp) {
        let mut data = timestamp.to_be_bytes().to_vec();
        data.extend_from_slice(frame);
        self.inject(&data, true);
    }
    /// queue a raw receive chunk with explicit frame boundaries
    pub fn inject_chunk(&self, chunk: RawChunk) {
        self.lock().rx_chunks.push_back(chunk);
    }

    fn inject(&self, frame: &[u8], timestamp_added: bool) {
        let mut state = self.lock();
        let size = state.payload_size().bytes();
        let count = frame.len().div_ceil(size);
        for (index, data) in frame.chunks(size).enumerate() {
            let mut payload = data.to_vec();
            payload.resize(size, 0);
            state.rx_chunks.push_back(RawChunk {
                payload,
                start: (index == 0).then_some(0),
                end: (index + 1 == count).then_some((data.len() - 1) as u8),
                timestamp_added: timestamp_added && index == 0,
                frame_drop: false,
            });
        }
    }
}

fn address_of<T>(register: Register<T>) -> (u8, u16) {
    (register.memory_map(), register.address())
}

impl DeviceState {
    /// power-on register values
    fn reset(&mut self) {
        self.registers = HashMap::from([
            (address_of(registers::IDVER), 0x0000_0011),
            (address_of(registers::PHYID), 0x0007_C1B3),
            // direct PHY access, 8 byte minimum payload
            (address_of(registers::STDCAP), 0x0000_0103),
            (address_of(registers::CONFIG0), 0x0000_0006),
            (address_of(registers::STATUS0), STATUS_RESET_COMPLETE),
            (address_of(registers::CDCTL0), 0x0000_8000),
            (address_of(registers::PLCA_IDVER), 0x0000_0A10),
            (address_of(registers::PLCA_CTRL1), 0x0000_08FF),
            ]);
        self.credits_used = 0;
        self.reported_credits = None;
        self.tx_frame.clear();
        self.tx_in_progress = false;
        self.rx_chunks.clear();
    }

    fn payload_size(&self) -> PayloadSize {
        Config0::from(self.read_register(registers::CONFIG0)).payload_size()
    }
    fn credits_available(&self) -> u8 {
        self.credit_limit.saturating_sub(self.credits_used)
    }

    fn read_register<T>(&self, register: Register<T>) -> u32 {
        self.read(register.memory_map(), register.address())
    }

    fn read(&self, memory_map: u8, address: u16) -> u32 {
        let key = (memory_map, address);
        if key == address_of(registers::BUFFER_STATUS) {
            let available = u32::from(self.credits_available());
            let chunks = self.rx_chunks.len().min(0xff) as u32;
            available << 8 | chunks
        }
        else if key == address_of(registers::INDIRECT_VALUE) {
            let field = self.read_register(registers::INDIRECT_ADDRESS);
            self.indirect.get(&field).copied().unwrap_or(0)
        }
        else {
            self.registers.get(&key).copied().unwrap_or(0)
        }
    }

    fn write(&mut self, memory_map: u8, address: u16, value: u32) {
        self.writes.push((memory_map, address, value));
        let key = (memory_map, address);
        if key == address_of(registers::RESET) {
            if value & 1 != 0 {
                debug!("simulated MAC-PHY reset");
                self.reset();
                if self.stall_reset
                    {self.registers.insert(address_of(registers::STATUS0), 0);}
            }
        }
        else if key == address_of(registers::STATUS0) {
            let status = self.read(memory_map, address);
            self.registers.insert(key, status & !value);
        }
        else {
            self.registers.insert(key, value);
        }
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), DeviceError> {
        if core::mem::take(&mut self.fail_next)
            {return Err(DeviceError::Disconnected)}
        if tx.len() != rx.len() || tx.len() < HEADER_SIZE
            {return Err(DeviceError::Framing(tx.len()))}
        rx.fill(0);
        if tx[0] & 0x80 == 0
            {self.control(tx, rx)}
        else
            {self.data(tx, rx)}
    }

    fn control(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), DeviceError> {
        let header = ControlHeader::decode_slice(tx).ok_or(DeviceError::Framing(tx.len()))?;
        let count = usize::from(header.length().value()) + 1;
        if tx.len() != HEADER_SIZE + 4 * count + TRAILER_SIZE
            {return Err(DeviceError::Framing(tx.len()))}
        let memory_map = header.memory_map().value();
        let address = header.address();
        self.exchanges.push(Exchange::Control {write: header.write(), memory_map, address, count});

        if !header.parity_ok() || core::mem::take(&mut self.reject_next_header) {
            let mut echo = header;
            echo.set_header_bad(true);
            rx[HEADER_SIZE ..][.. HEADER_SIZE].copy_from_slice(&echo.encode());
            return Ok(());
        }

        let target = |index: usize| {
            if header.address_increment_disable() {address}
            else {address.wrapping_add(index as u16)}
        };
        if header.write() {
            for (index, value) in tx[HEADER_SIZE ..].chunks_exact(4).take(count).enumerate() {
                let value = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                self.write(memory_map, target(index), value);
            }
            let size = tx.len();
            rx[HEADER_SIZE ..].copy_from_slice(&tx[.. size - HEADER_SIZE]);
        }
        else {
            rx[HEADER_SIZE ..][.. HEADER_SIZE].copy_from_slice(&tx[.. HEADER_SIZE]);
            for (index, slot) in rx[2 * HEADER_SIZE ..].chunks_exact_mut(4).take(count).enumerate() {
                let address = target(index);
                if (memory_map, address) == address_of(registers::BUFFER_STATUS)
                    {self.reported_credits = Some(self.credits_available())}
                slot.copy_from_slice(&self.read(memory_map, address).to_be_bytes());
            }
        }
        Ok(())
    }

    fn data(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), DeviceError> {
        let payload = self.payload_size().bytes();
        let chunk_size = HEADER_SIZE + payload;
        if tx.len() % chunk_size != 0
            {return Err(DeviceError::Framing(tx.len()))}

        // the buffer drained onto the line since the last exchange
        if !self.hold_credits
            {self.credits_used = 0}

        let mut data_chunks = 0;
        for (sent, received) in tx.chunks_exact(chunk_size).zip(rx.chunks_exact_mut(chunk_size)) {
            let (header, data) = sent.split_at(HEADER_SIZE);
            let header = DataHeader::decode_slice(header).ok_or(DeviceError::Framing(tx.len()))?;
            let header_bad = !header.parity_ok() || core::mem::take(&mut self.reject_next_header);
            if !header_bad && header.data_valid() {
                data_chunks += 1;
                self.accept(header, data);
            }
            let footer = self.footer(header_bad, &mut received[.. payload]);
            received[payload ..].copy_from_slice(&footer.encode());
        }

        if let Some(reported) = self.reported_credits {
            if data_chunks > usize::from(reported) {
                warn!("host sent {} data chunks with {} credits", data_chunks, reported);
                self.credit_violations += 1;
            }
        }
        self.reported_credits = Some(self.credits_available().min(31));
        self.exchanges.push(Exchange::Data {data_chunks, chunks: tx.len() / chunk_size});
        Ok(())
    }

    /// store a transmitted chunk into the transmit buffer
    fn accept(&mut self, header: DataHeader, data: &[u8]) {
        if self.credits_used >= self.credit_limit {
            self.raise(STATUS_TX_BUFFER_OVERFLOW);
            return;
        }
        self.credits_used += 1;

        let start = if header.start_valid() {usize::from(header.start_word_offset().value()) * 4} else {0};
        let end = if header.end_valid() {usize::from(header.end_byte_offset().value()) + 1} else {data.len()};
        if header.start_valid() {
            if self.tx_in_progress
                {self.raise(STATUS_TX_PROTOCOL_ERROR)}
            self.tx_frame.clear();
            self.tx_in_progress = true;
        }
        else if !self.tx_in_progress {
            self.raise(STATUS_TX_PROTOCOL_ERROR);
            return;
        }
        if end < start || end > data.len() {
            self.raise(STATUS_TX_PROTOCOL_ERROR);
            return;
        }
        self.tx_frame.extend_from_slice(&data[start .. end]);
        if header.end_valid() {
            self.transmitted.push(core::mem::take(&mut self.tx_frame));
            self.tx_in_progress = false;
        }
    }

    fn raise(&mut self, bits: u32) {
        let key = address_of(registers::STATUS0);
        let status = self.read(key.0, key.1);
        self.registers.insert(key, status | bits);
    }

    /// fill a received chunk payload and build its footer
    fn footer(&mut self, header_bad: bool, payload: &mut [u8]) -> DataFooter {
        let mut footer = DataFooter::default();
        if let Some(chunk) = self.rx_chunks.pop_front() {
            let size = chunk.payload.len().min(payload.len());
            payload[.. size].copy_from_slice(&chunk.payload[.. size]);
            footer.set_data_valid(true);
            if let Some(start) = chunk.start {
                footer.set_start_valid(true);
                footer.set_start_word_offset(u4::new(start & 0xf));
            }
            if let Some(end) = chunk.end {
                footer.set_end_valid(true);
                footer.set_end_byte_offset(u6::new(end & 0x3f));
            }
            footer.set_receive_timestamp_added(chunk.timestamp_added);
            footer.set_frame_drop(chunk.frame_drop);
        }
        let status = self.read_register(registers::STATUS0);
        let config = Config0::from(self.read_register(registers::CONFIG0));
        footer.set_extended_status(status & STATUS_ERRORS != 0);
        footer.set_header_bad(header_bad);
        footer.set_config_sync(config.sync());
        footer.set_rx_chunks_available(u5::new(self.rx_chunks.len().min(31) as u8));
        footer.set_tx_credits(u5::new(self.credits_available().min(31)));
        footer
    }
}

impl Transport for SimulatedMacPhy {
    type Error = DeviceError;

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), DeviceError> {
        let stall = core::mem::take(&mut self.lock().stall_next);
        if stall
            {core::future::pending::<()>().await}
        self.lock().exchange(tx, rx)
    }
}
