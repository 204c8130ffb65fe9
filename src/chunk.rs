/*!
    data chunks: frame segmentation on transmit and reassembly on receive

    a transmitted chunk is a [DataHeader] followed by the payload, a received chunk is the payload followed by a [DataFooter].
    Only one outbound and one inbound frame are in progress at a time, frames are never interleaved.
*/

use core::fmt;
use bilge::prelude::*;
use log::*;

use crate::header::{DataHeader, DataFooter, HEADER_SIZE};


/// largest frame accepted for transmission or reassembled on reception
pub const MAX_FRAME_SIZE: usize = 4096;
/// size of the receive timestamp prefixed to a frame when the MAC-PHY adds it
pub const TIMESTAMP_SIZE: usize = 8;


/// chunk payload size negotiated in [crate::registers::CONFIG0]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PayloadSize {
    Bytes8,
    Bytes16,
    Bytes32,
    #[default]
    Bytes64,
}
impl PayloadSize {
    pub const ALL: [PayloadSize; 4] = [PayloadSize::Bytes8, PayloadSize::Bytes16, PayloadSize::Bytes32, PayloadSize::Bytes64];

    /// payload bytes in one chunk
    pub const fn bytes(self) -> usize {
        match self {
            PayloadSize::Bytes8 => 8,
            PayloadSize::Bytes16 => 16,
            PayloadSize::Bytes32 => 32,
            PayloadSize::Bytes64 => 64,
        }
    }
    /// bytes of a whole chunk on the wire, in either direction
    pub const fn chunk_size(self) -> usize {
        HEADER_SIZE + self.bytes()
    }
    /// encoding in the configuration register
    pub const fn code(self) -> u8 {
        match self {
            PayloadSize::Bytes8 => 3,
            PayloadSize::Bytes16 => 4,
            PayloadSize::Bytes32 => 5,
            PayloadSize::Bytes64 => 6,
        }
    }
    /// decode the configuration register field, unknown encodings fall back to 64 bytes
    pub const fn from_code(code: u8) -> Self {
        match code {
            3 => PayloadSize::Bytes8,
            4 => PayloadSize::Bytes16,
            5 => PayloadSize::Bytes32,
            _ => PayloadSize::Bytes64,
        }
    }
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            8 => Some(PayloadSize::Bytes8),
            16 => Some(PayloadSize::Bytes16),
            32 => Some(PayloadSize::Bytes32),
            64 => Some(PayloadSize::Bytes64),
            _ => None,
        }
    }
}

/// reason for refusing an outbound frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    Empty,
    TooLarge(usize),
}
impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Empty => write!(f, "empty frame"),
            FrameError::TooLarge(size) => write!(f, "frame of {} bytes exceeds {} bytes", size, MAX_FRAME_SIZE),
        }
    }
}

/// transmit timestamp capture slot requested for an outbound frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum TimestampCapture {
    #[default]
    None = 0,
    A = 1,
    B = 2,
    C = 3,
}

/// timestamp of a received frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanoseconds: u32,
}
impl Timestamp {
    pub fn from_be_bytes(bytes: [u8; TIMESTAMP_SIZE]) -> Self {
        let [s0, s1, s2, s3, n0, n1, n2, n3] = bytes;
        Self {
            seconds: u32::from_be_bytes([s0, s1, s2, s3]),
            // the 2 upper bits of the nanoseconds word are reserved
            nanoseconds: u32::from_be_bytes([n0, n1, n2, n3]) & 0x3fff_ffff,
        }
    }
    pub fn to_be_bytes(self) -> [u8; TIMESTAMP_SIZE] {
        let mut bytes = [0; TIMESTAMP_SIZE];
        bytes[.. 4].copy_from_slice(&self.seconds.to_be_bytes());
        bytes[4 ..].copy_from_slice(&self.nanoseconds.to_be_bytes());
        bytes
    }
}


/// number of chunks needed to transmit a frame
pub const fn chunk_count(length: usize, payload: PayloadSize) -> usize {
    length.div_ceil(payload.bytes())
}

/**
    progress of the transmission of one outbound frame

    the frame bytes are not owned here, the same frame must be passed to every call to [Self::next_chunk].
    Transmission can stop between any two chunks and resume later when transmit credits come back.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segmenter {
    length: usize,
    offset: usize,
    capture: TimestampCapture,
}
impl Segmenter {
    pub fn new(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.is_empty()
            {return Err(FrameError::Empty)}
        if frame.len() > MAX_FRAME_SIZE
            {return Err(FrameError::TooLarge(frame.len()))}
        Ok(Self {length: frame.len(), offset: 0, capture: TimestampCapture::None})
    }
    /// request a transmit timestamp capture when the frame leaves the MAC-PHY
    pub fn with_capture(mut self, capture: TimestampCapture) -> Self {
        self.capture = capture;
        self
    }
    /// frame length
    pub fn len(&self) -> usize {self.length}
    /// at least one chunk has been emitted
    pub fn started(&self) -> bool {self.offset != 0}
    /// the last chunk has been emitted
    pub fn finished(&self) -> bool {self.offset >= self.length}
    /// chunks still to emit
    pub fn remaining_chunks(&self, payload: PayloadSize) -> usize {
        chunk_count(self.length - self.offset, payload)
    }

    /// header and payload of the next chunk, or `None` if the frame is complete
    pub fn next_chunk<'f>(&mut self, frame: &'f [u8], payload: PayloadSize) -> Option<(DataHeader, &'f [u8])> {
        if self.finished()
            {return None}
        let start = self.offset;
        let end = (start + payload.bytes()).min(self.length);
        let data = frame.get(start .. end)?;

        let mut header = DataHeader::empty();
        header.set_data_valid(true);
        if start == 0 {
            header.set_start_valid(true);
            header.set_time_stamp_capture(u2::new(self.capture as u8));
        }
        if end == self.length {
            header.set_end_valid(true);
            // payload sizes are at most 64, the offset fits in 6 bits
            header.set_end_byte_offset(u6::new((data.len() - 1) as u8));
        }
        self.offset = end;
        Some((header, data))
    }
}

/// iterator over the chunks of a whole frame
pub struct Segments<'f> {
    frame: &'f [u8],
    payload: PayloadSize,
    segmenter: Segmenter,
}
impl<'f> Iterator for Segments<'f> {
    type Item = (DataHeader, &'f [u8]);
    fn next(&mut self) -> Option<Self::Item> {
        self.segmenter.next_chunk(self.frame, self.payload)
    }
}

/// split a frame into the chunks transmitting it
pub fn segment(frame: &[u8], payload: PayloadSize) -> Result<Segments<'_>, FrameError> {
    Ok(Segments {
        frame,
        payload,
        segmenter: Segmenter::new(frame)?,
    })
}


/// effect of one received chunk on reassembly
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Reassembled {
    /// frames handed to the delivery callback
    pub delivered: usize,
    /// incomplete or oversized frames thrown away
    pub dropped: usize,
}

/**
    receive side frame reassembly

    the accumulator is a fixed capacity buffer allocated once, frames longer than [MAX_FRAME_SIZE] are dropped.
    Chunks continuing or ending a frame while none is in progress are ignored.
*/
pub struct Reassembler {
    buffer: heapless::Vec<u8, MAX_FRAME_SIZE>,
    in_progress: bool,
    overrun: bool,
    timestamp: Option<Timestamp>,
    /// receive timestamp bytes gathered so far
    stamp: [u8; TIMESTAMP_SIZE],
    /// receive timestamp bytes still to strip from the next payload bytes
    stamp_owed: usize,
}
impl Default for Reassembler {
    fn default() -> Self {Self::new()}
}
impl Reassembler {
    pub const fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            in_progress: false,
            overrun: false,
            timestamp: None,
            stamp: [0; TIMESTAMP_SIZE],
            stamp_owed: 0,
        }
    }
    /// a frame has started and not ended yet
    pub fn in_progress(&self) -> bool {self.in_progress}
    /// bytes accumulated for the frame in progress
    pub fn pending(&self) -> &[u8] {&self.buffer}

    /// throw away the frame in progress, returns true if there was one
    pub fn discard(&mut self) -> bool {
        let pending = self.in_progress;
        self.buffer.clear();
        self.in_progress = false;
        self.overrun = false;
        self.timestamp = None;
        self.stamp_owed = 0;
        pending
    }

    /**
        process the payload of one received chunk according to its footer

        complete frames are passed to `deliver` in arrival order. A chunk ending a frame and starting the next one delivers the pending frame before starting the new one.
    */
    pub fn receive(
        &mut self,
        footer: DataFooter,
        payload: &[u8],
        mut deliver: impl FnMut(&[u8], Option<Timestamp>),
        ) -> Reassembled
    {
        let mut outcome = Reassembled::default();
        if !footer.data_valid()
            {return outcome}

        let start = footer.start_offset().min(payload.len());
        let end = (footer.end_offset() + 1).min(payload.len());

        match (footer.start_valid(), footer.end_valid()) {
            // whole frame in this chunk
            (true, true) if footer.start_offset() <= footer.end_offset() => {
                if self.discard() {
                    warn!("frame in progress dropped, a new frame started before its end");
                    outcome.dropped += 1;
                }
                self.begin(footer, &payload[start .. end.max(start)]);
                self.finish(&mut outcome, &mut deliver);
            },
            // end of the pending frame then start of the next one
            (true, true) => {
                if self.in_progress {
                    self.extend(&payload[.. end]);
                    self.finish(&mut outcome, &mut deliver);
                }
                self.begin(footer, &payload[start ..]);
            },
            (true, false) => {
                if self.discard() {
                    warn!("frame in progress dropped, a new frame started before its end");
                    outcome.dropped += 1;
                }
                self.begin(footer, &payload[start ..]);
            },
            (false, true) => {
                if self.in_progress {
                    self.extend(&payload[.. end]);
                    self.finish(&mut outcome, &mut deliver);
                }
            },
            (false, false) => {
                if self.in_progress {
                    self.extend(payload);
                }
            },
        }
        outcome
    }

    fn begin(&mut self, footer: DataFooter, data: &[u8]) {
        self.discard();
        self.in_progress = true;
        if footer.receive_timestamp_added()
            {self.stamp_owed = TIMESTAMP_SIZE}
        self.extend(data);
    }

    fn extend(&mut self, mut data: &[u8]) {
        // the timestamp may span several chunks when the frame starts near the end of one
        if self.stamp_owed != 0 {
            let taken = self.stamp_owed.min(data.len());
            let offset = TIMESTAMP_SIZE - self.stamp_owed;
            self.stamp[offset ..][.. taken].copy_from_slice(&data[.. taken]);
            self.stamp_owed -= taken;
            data = &data[taken ..];
            if self.stamp_owed == 0
                {self.timestamp = Some(Timestamp::from_be_bytes(self.stamp))}
        }
        if self.overrun
            {return}
        if self.buffer.extend_from_slice(data).is_err() {
            warn!("received frame exceeds {} bytes, dropping it", MAX_FRAME_SIZE);
            self.overrun = true;
        }
    }

    fn finish(&mut self, outcome: &mut Reassembled, deliver: &mut impl FnMut(&[u8], Option<Timestamp>)) {
        if self.overrun {
            outcome.dropped += 1;
        }
        else if self.stamp_owed != 0 {
            warn!("received frame ended within its timestamp, dropping it");
            outcome.dropped += 1;
        }
        else {
            deliver(&self.buffer, self.timestamp);
            outcome.delivered += 1;
        }
        self.discard();
    }
}
