use core::time::Duration;
use std::{
    collections::VecDeque,
    format,
    string::ToString,
    vec,
    vec::Vec,
    };
use tokio::sync::oneshot;
use log::*;

use crate::{
    Transport,
    chunk::{PayloadSize, Reassembler, Segmenter, TimestampCapture},
    flow::FlowControl,
    header::{DataFooter, DataHeader, Word, HEADER_SIZE},
    registers::{BUFFER_STATUS, STATUS0},
    status::{classify, StatusKind},
    };
use super::{
    Config, FrameSink, ProtocolError, Result,
    control::control_frame_size,
    };


/// counters of the events seen by a session
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// data exchanges performed
    pub transfers: u64,
    pub tx_frames: u64,
    pub tx_bytes: u64,
    /// frames whose submitter gave up before transmission started
    pub tx_abandoned: u64,
    /// frames lost because the session failed
    pub tx_failed: u64,
    pub rx_frames: u64,
    pub rx_bytes: u64,
    /// incomplete, oversized or device-dropped frames
    pub rx_dropped: u64,
    /// receive buffer overflows reported by the MAC-PHY
    pub rx_overflows: u64,
    /// times the configuration had to be applied again
    pub config_resyncs: u64,
}

/// outbound frame waiting for or undergoing transmission
pub(super) struct Outbound {
    data: Vec<u8>,
    segmenter: Segmenter,
    done: Option<oneshot::Sender<Result<()>>>,
}
impl Outbound {
    fn complete(self, result: Result<()>) {
        if let Some(done) = self.done {
            // the submitter may have stopped waiting
            done.send(result).ok();
        }
    }
}


/**
    protocol session with one MAC-PHY

    it owns the transport and every piece of protocol state. Exactly one exchange is in flight at a time since all methods take `&mut self`.

    Any fatal error clears the flow control state and every frame in progress before being returned, the session must then be brought up again with [Self::bring_up].
*/
pub struct Session<T> {
    pub(super) transport: T,
    pub(super) config: Config,
    /// chunk payload size currently negotiated with the device
    pub(super) payload_size: PayloadSize,
    pub(super) flow: FlowControl,
    pub(super) reassembler: Reassembler,
    outbound: VecDeque<Outbound>,
    /// sequence bit of the next transmitted chunk
    sequence: bool,
    /// a footer reported the device configuration as not synchronized
    pub(super) unsynced: bool,
    pub(super) stats: Statistics,

    pub(super) control_tx: Vec<u8>,
    pub(super) control_rx: Vec<u8>,
    data_tx: Vec<u8>,
    data_rx: Vec<u8>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Config) -> Result<Self> {
        config.validate()?;
        let control = control_frame_size(crate::header::MAX_REGISTERS);
        let data = config.max_chunks_per_transfer * PayloadSize::Bytes64.chunk_size();
        Ok(Self {
            transport,
            // the device reset value, until the configuration is written
            payload_size: PayloadSize::default(),
            config,
            flow: FlowControl::new(),
            reassembler: Reassembler::new(),
            outbound: VecDeque::new(),
            sequence: false,
            unsynced: false,
            stats: Statistics::default(),
            control_tx: vec![0; control],
            control_rx: vec![0; control],
            data_tx: vec![0; data],
            data_rx: vec![0; data],
        })
    }

    pub fn config(&self) -> &Config {&self.config}
    /// chunk payload size currently negotiated with the device
    pub fn payload_size(&self) -> PayloadSize {self.payload_size}
    pub fn flow(&self) -> &FlowControl {&self.flow}
    pub fn statistics(&self) -> Statistics {self.stats}
    /// the device reported a configuration loss that has not been repaired yet
    pub fn unsynced(&self) -> bool {self.unsynced}
    /// frames submitted and not completely transmitted
    pub fn pending_frames(&self) -> usize {self.outbound.len()}
    pub fn transport(&mut self) -> &mut T {&mut self.transport}
    pub fn into_transport(self) -> T {self.transport}

    /// there are chunks to exchange without waiting for an interrupt
    pub fn has_data_work(&self) -> bool {
        let can_send = self.flow.tx_credits() != 0 || !self.flow.seeded();
        (can_send && !self.outbound.is_empty()) || self.flow.rx_chunks_available() != 0
    }

    /**
        queue a frame for transmission, `done` receives the result once its last chunk was exchanged

        the frame is checked here, nothing is exchanged before [Self::transfer]
    */
    pub fn submit(&mut self, frame: Vec<u8>, capture: TimestampCapture, done: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        match Segmenter::new(&frame) {
            Ok(segmenter) => {
                self.outbound.push_back(Outbound {
                    data: frame,
                    segmenter: segmenter.with_capture(capture),
                    done,
                });
                Ok(())
            },
            Err(error) => {
                let error = ProtocolError::from(error);
                if let Some(done) = done {
                    done.send(Err(error.clone())).ok();
                }
                Err(error)
            },
        }
    }

    /// seed flow control with an explicit read of the buffer status
    pub async fn seed_flow_control(&mut self) -> Result<()> {
        let status = self.read(BUFFER_STATUS).await?;
        self.flow.seed(status);
        debug!("flow control seeded: {} tx credits, {} rx chunks available",
            self.flow.tx_credits(), self.flow.rx_chunks_available());
        Ok(())
    }

    /**
        perform one data exchange

        as many pending frame chunks as credits allow are sent, padded with empty chunks to fetch the receive chunks the device announced.
        With `poll` set, a single empty chunk is exchanged even when there is nothing else to do, to fetch the device status after an interrupt.

        returns the number of chunks exchanged, 0 if there was nothing to exchange
    */
    pub async fn transfer(&mut self, poll: bool, sink: &mut impl FrameSink) -> Result<usize> {
        let result = self.transfer_chunks(poll, sink).await;
        self.check(result)
    }

    async fn transfer_chunks(&mut self, poll: bool, sink: &mut impl FrameSink) -> Result<usize> {
        if !self.flow.seeded()
            {self.seed_flow_control().await?;}

        let payload = self.payload_size;
        let chunk_size = payload.chunk_size();
        let limit = self.config.max_chunks_per_transfer;

        // data chunks, never more than credits
        let sendable = self.flow.sendable(limit);
        let mut chunks = 0;
        let mut completed = Vec::new();
        while chunks < sendable {
            let Some(front) = self.outbound.front_mut()
                else {break};
            if !front.segmenter.started() && front.done.as_ref().is_some_and(|done| done.is_closed()) {
                warn!("frame submission cancelled before transmission, abandoning it");
                self.stats.tx_abandoned += 1;
                self.outbound.pop_front();
                continue;
            }
            let Some((mut header, data)) = front.segmenter.next_chunk(&front.data, payload)
                else {
                    self.outbound.pop_front();
                    continue;
                };
            header.set_sequence(self.sequence);
            self.sequence = !self.sequence;

            let chunk = &mut self.data_tx[chunks * chunk_size ..][.. chunk_size];
            chunk[.. HEADER_SIZE].copy_from_slice(&header.encode());
            let (filled, padding) = chunk[HEADER_SIZE ..].split_at_mut(data.len());
            filled.copy_from_slice(data);
            padding.fill(0);
            chunks += 1;

            if front.segmenter.finished() {
                completed.extend(self.outbound.pop_front());
            }
        }

        // empty chunks to drain the receive side
        let receive = usize::from(self.flow.rx_chunks_available()).min(limit);
        let mut total = chunks.max(receive);
        if total == 0 && poll
            {total = 1}
        if total == 0
            {return Ok(0)}
        for index in chunks .. total {
            let mut header = DataHeader::empty();
            header.set_sequence(self.sequence);
            self.sequence = !self.sequence;
            let chunk = &mut self.data_tx[index * chunk_size ..][.. chunk_size];
            chunk[.. HEADER_SIZE].copy_from_slice(&header.encode());
            chunk[HEADER_SIZE ..].fill(0);
        }
        self.flow.consume(chunks);
        debug!("data exchange: {} data chunks, {} empty chunks", chunks, total - chunks);

        let size = total * chunk_size;
        let exchanged = exchange(
            &mut self.transport,
            self.config.timeout,
            &self.data_tx[.. size],
            &mut self.data_rx[.. size],
            ).await;
        self.stats.transfers += 1;
        if let Err(error) = exchanged {
            self.fail(completed, &error);
            return Err(error);
        }

        // footers may trigger register accesses, which need the session
        let rx = core::mem::take(&mut self.data_rx);
        let mut result = Ok(());
        for chunk in rx[.. size].chunks_exact(chunk_size) {
            let (data, footer) = chunk.split_at(payload.bytes());
            result = self.receive_chunk(footer, data, sink).await;
            if result.is_err()
                {break}
        }
        self.data_rx = rx;

        match result {
            Ok(()) => {
                for frame in completed {
                    self.stats.tx_frames += 1;
                    self.stats.tx_bytes += frame.data.len() as u64;
                    frame.complete(Ok(()));
                }
                Ok(total)
            },
            Err(error) => {
                self.fail(completed, &error);
                Err(error)
            },
        }
    }

    /// process one received chunk: flow control, status, then payload
    async fn receive_chunk(&mut self, footer: &[u8], data: &[u8], sink: &mut impl FrameSink) -> Result<()> {
        let mut footer = DataFooter::decode_slice(footer)
            .ok_or(ProtocolError::HeaderParityRejected)?;
        if !footer.parity_ok() {
            error!("received footer with bad parity: {:?}", footer);
            return Err(ProtocolError::HeaderParityRejected);
        }
        self.flow.update(&footer);

        let mut overflow = false;
        if footer.extended_status() {
            if let Some(StatusKind::BufferOverflow) = self.extended_status().await? {
                self.stats.rx_overflows += 1;
                if self.reassembler.discard()
                    {self.stats.rx_dropped += 1}
                overflow = true;
            }
        }
        if footer.header_bad() {
            error!("MAC-PHY rejected a transmitted header");
            return Err(ProtocolError::HeaderParityRejected);
        }
        if !footer.config_sync() {
            if !self.unsynced
                {warn!("MAC-PHY configuration is not synchronized")}
            self.unsynced = true;
        }
        // the payload of an overflowing chunk is skipped
        if overflow
            {return Ok(())}
        if footer.frame_drop() && footer.end_valid() {
            debug!("MAC-PHY dropped the frame ending in this chunk");
            if footer.start_valid() && footer.start_offset() <= footer.end_offset() {
                if self.reassembler.discard()
                    {self.stats.rx_dropped += 1}
                self.stats.rx_dropped += 1;
                return Ok(());
            }
            if self.reassembler.discard()
                {self.stats.rx_dropped += 1}
            footer.set_end_valid(false);
        }

        let stats = &mut self.stats;
        let outcome = self.reassembler.receive(footer, data, |frame, timestamp| {
            stats.rx_frames += 1;
            stats.rx_bytes += frame.len() as u64;
            sink.on_frame_received(frame, timestamp);
        });
        stats.rx_dropped += outcome.dropped as u64;
        Ok(())
    }

    /// read and clear the status register, fails on fatal conditions
    async fn extended_status(&mut self) -> Result<Option<StatusKind>> {
        let status = self.read(STATUS0).await?;
        // write 1 to clear
        self.write(STATUS0, status).await?;
        match classify(status) {
            Some(kind) if kind.is_fatal() => {
                error!("MAC-PHY reported {}", kind);
                Err(ProtocolError::DeviceExtendedStatus(kind))
            },
            Some(kind) => {
                warn!("MAC-PHY reported {}", kind);
                Ok(Some(kind))
            },
            None => {
                debug!("extended status without error: {:?}", status);
                Ok(None)
            },
        }
    }

    /// clear all protocol state on fatal errors
    pub(super) fn check<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(error) = &result {
            if error.is_fatal()
                {self.abort(error)}
        }
        result
    }

    /**
        clear the flow control state and every frame in progress

        pending submissions are completed with `error`. This is done automatically before any fatal error is returned.
    */
    pub fn abort(&mut self, error: &ProtocolError) {
        debug!("clearing session state after: {}", error);
        self.flow.reset();
        if self.reassembler.discard()
            {self.stats.rx_dropped += 1}
        let pending = core::mem::take(&mut self.outbound);
        self.fail(pending, error);
        self.unsynced = false;
    }

    fn fail(&mut self, frames: impl IntoIterator<Item=Outbound>, error: &ProtocolError) {
        for frame in frames {
            self.stats.tx_failed += 1;
            frame.complete(Err(error.clone()));
        }
    }
}


/// exchange through the transport, turning its errors and timeouts into [ProtocolError::TransportFailure]
pub(super) async fn exchange<T: Transport>(transport: &mut T, timeout: Duration, tx: &[u8], rx: &mut [u8]) -> Result<()> {
    match tokio::time::timeout(timeout, transport.exchange(tx, rx)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => {
            error!("transport failure: {:?}", error);
            Err(ProtocolError::TransportFailure(format!("{:?}", error)))
        },
        Err(_) => {
            error!("transport exchange timed out");
            Err(ProtocolError::TransportFailure("exchange timed out".to_string()))
        },
    }
}
