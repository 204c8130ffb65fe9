use std::{
    sync::Arc,
    vec::Vec,
    };
use packbytes::{FromBytes, ToBytes};
use tokio::{
    sync::{mpsc, oneshot, Notify},
    time::sleep,
    };
use log::*;

use crate::{
    Transport,
    chunk::{Segmenter, Timestamp, TimestampCapture},
    header::MAX_REGISTERS,
    registers::{Register, MMS_MAX},
    };
use super::{
    Config, FrameSink, ProtocolError, Result, Session, Statistics,
    control::AddressMode,
    };


/// work queued for the worker
enum Request {
    Read {
        memory_map: u8,
        address: u16,
        count: usize,
        mode: AddressMode,
        reply: oneshot::Sender<Result<Vec<u32>>>,
    },
    Write {
        memory_map: u8,
        address: u16,
        values: Vec<u32>,
        mode: AddressMode,
        reply: oneshot::Sender<Result<()>>,
    },
    Submit {
        frame: Vec<u8>,
        capture: TimestampCapture,
        reply: oneshot::Sender<Result<()>>,
    },
    TxTimestamp {
        slot: TimestampCapture,
        reply: oneshot::Sender<Result<Option<Timestamp>>>,
    },
    Statistics {
        reply: oneshot::Sender<Statistics>,
    },
}

/// split a session into a handle and the worker serving it
pub fn worker<T: Transport>(transport: T, config: Config) -> Result<(MacPhy, Worker<T>)> {
    let depth = config.queue_depth;
    let session = Session::new(transport, config)?;
    let (send, receive) = mpsc::channel(depth);
    let interrupt = Arc::new(Notify::new());
    Ok((
        MacPhy {requests: send, interrupt: interrupt.clone()},
        Worker {session, requests: receive, interrupt},
    ))
}


/**
    cloneable handle to a MAC-PHY served by a [Worker]

    every method enqueues work for the worker and waits for its completion, the worker **must** be running for them to return
*/
#[derive(Clone)]
pub struct MacPhy {
    requests: mpsc::Sender<Request>,
    interrupt: Arc<Notify>,
}
impl MacPhy {
    /// read `count` consecutive registers
    pub async fn read_registers(&self, memory_map: u8, address: u16, count: usize) -> Result<Vec<u32>> {
        self.read_registers_with(memory_map, address, count, AddressMode::Increment).await
    }
    /// read `count` registers with the given address increment mode
    pub async fn read_registers_with(&self, memory_map: u8, address: u16, count: usize, mode: AddressMode) -> Result<Vec<u32>> {
        check_command(memory_map, count)?;
        let (reply, result) = oneshot::channel();
        self.request(Request::Read {memory_map, address, count, mode, reply}).await?;
        result.await.map_err(|_| ProtocolError::Closed)?
    }
    /// write consecutive registers
    pub async fn write_registers(&self, memory_map: u8, address: u16, values: &[u32]) -> Result<()> {
        self.write_registers_with(memory_map, address, values, AddressMode::Increment).await
    }
    /// write registers with the given address increment mode
    pub async fn write_registers_with(&self, memory_map: u8, address: u16, values: &[u32], mode: AddressMode) -> Result<()> {
        check_command(memory_map, values.len())?;
        let (reply, result) = oneshot::channel();
        self.request(Request::Write {memory_map, address, values: values.to_vec(), mode, reply}).await?;
        result.await.map_err(|_| ProtocolError::Closed)?
    }
    /// read a typed register
    pub async fn read<R: FromBytes<Bytes=[u8; 4]>>(&self, register: Register<R>) -> Result<R> {
        let values = self.read_registers(register.memory_map(), register.address(), 1).await?;
        Ok(R::from_be_bytes(values[0].to_be_bytes()))
    }
    /// write a typed register
    pub async fn write<R: ToBytes<Bytes=[u8; 4]>>(&self, register: Register<R>, value: R) -> Result<()> {
        let value = u32::from_be_bytes(value.to_be_bytes());
        self.write_registers(register.memory_map(), register.address(), &[value]).await
    }

    /**
        transmit one ethernet frame

        returns once its last chunk has been exchanged. Dropping the returned future before transmission started abandons the frame, once started it is transmitted to its end.
    */
    pub async fn submit_frame(&self, frame: &[u8]) -> Result<()> {
        self.submit_frame_with(frame, TimestampCapture::None).await
    }
    /// transmit one ethernet frame, capturing its transmit time in the given slot
    pub async fn submit_frame_with(&self, frame: &[u8], capture: TimestampCapture) -> Result<()> {
        Segmenter::new(frame)?;
        let (reply, result) = oneshot::channel();
        self.request(Request::Submit {frame: frame.to_vec(), capture, reply}).await?;
        result.await.map_err(|_| ProtocolError::Closed)?
    }
    /// transmit timestamp captured in a slot
    pub async fn tx_timestamp(&self, slot: TimestampCapture) -> Result<Option<Timestamp>> {
        let (reply, result) = oneshot::channel();
        self.request(Request::TxTimestamp {slot, reply}).await?;
        result.await.map_err(|_| ProtocolError::Closed)?
    }
    /// counters of the session
    pub async fn statistics(&self) -> Result<Statistics> {
        let (reply, result) = oneshot::channel();
        self.request(Request::Statistics {reply}).await?;
        result.await.map_err(|_| ProtocolError::Closed)
    }

    /// notify the worker that the MAC-PHY interrupt line is asserted
    pub fn interrupt(&self) {
        self.interrupt.notify_one();
    }

    async fn request(&self, request: Request) -> Result<()> {
        self.requests.send(request).await
            .map_err(|_| ProtocolError::Closed)
    }
}

/// input validation done before anything is queued
fn check_command(memory_map: u8, count: usize) -> Result<()> {
    if count == 0 || count > MAX_REGISTERS
        {return Err(ProtocolError::InvalidRegisterCount(count))}
    if memory_map > MMS_MAX
        {return Err(ProtocolError::InvalidMemoryMap(memory_map))}
    Ok(())
}


/**
    single task owning the session and its transport

    it serializes register accesses and data exchanges: queued register requests are always served before the next data exchange, and a data exchange carries at most [Config::max_chunks_per_transfer] chunks, so register requests never wait behind more than one exchange.
*/
pub struct Worker<T> {
    session: Session<T>,
    requests: mpsc::Receiver<Request>,
    interrupt: Arc<Notify>,
}
impl<T: Transport> Worker<T> {
    /**
        coroutine serving the [MacPhy] handles, received frames are passed to `sink`

        it brings the link up first, then runs until a fatal error or until every handle is dropped and the pending frames are transmitted.
        On fatal errors, all session state is cleared and pending submissions fail with the same error.
    */
    pub async fn run(mut self, mut sink: impl FrameSink) -> Result<()> {
        self.session.bring_up().await?;
        // acknowledge the interrupt raised by the reset
        let mut poll = true;
        let mut closed = false;
        let poll_interval = self.session.config().poll_interval;

        loop {
            while let Ok(request) = self.requests.try_recv() {
                self.serve(request).await?;
            }
            if self.session.unsynced() {
                match self.session.resynchronize().await {
                    Err(ProtocolError::ConfigUnsynced) => warn!("MAC-PHY still reports its configuration as unsynchronized"),
                    result => result?,
                }
            }
            if poll || self.session.has_data_work() {
                self.session.transfer(poll, &mut sink).await?;
                poll = false;
                continue;
            }
            if closed {
                info!("all handles dropped, stopping");
                return Ok(());
            }

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.serve(request).await?,
                    None => closed = true,
                },
                _ = self.interrupt.notified() => poll = true,
                _ = sleep(poll_interval.unwrap_or_default()), if poll_interval.is_some() => poll = true,
            }
        }
    }

    /// execute a request, fatal errors are both replied and returned
    async fn serve(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Read {memory_map, address, count, mode, reply} => {
                let result = self.session.read_registers(memory_map, address, count, mode).await;
                reply_and_check(reply, result)
            },
            Request::Write {memory_map, address, values, mode, reply} => {
                let result = self.session.write_registers(memory_map, address, &values, mode).await;
                reply_and_check(reply, result)
            },
            Request::Submit {frame, capture, reply} => {
                // refused frames are already replied to
                self.session.submit(frame, capture, Some(reply)).ok();
                Ok(())
            },
            Request::TxTimestamp {slot, reply} => {
                let result = self.session.tx_timestamp(slot).await;
                reply_and_check(reply, result)
            },
            Request::Statistics {reply} => {
                reply.send(self.session.statistics()).ok();
                Ok(())
            },
        }
    }
}

fn reply_and_check<R>(reply: oneshot::Sender<Result<R>>, result: Result<R>) -> Result<()> {
    let fatal = match &result {
        Err(error) if error.is_fatal() => Some(error.clone()),
        _ => None,
    };
    reply.send(result).ok();
    match fatal {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
