use oa_tc6::{
    chunk::{PayloadSize, Timestamp, TimestampCapture},
    device::{Exchange, RawChunk, SimulatedMacPhy},
    host::*,
    status::StatusKind,
    };
use rand::Rng;


fn init() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// session over a fresh simulated device, with the link up
async fn link(device: &SimulatedMacPhy, config: Config) -> Session<SimulatedMacPhy> {
    init();
    let mut session = Session::new(device.clone(), config).expect("invalid configuration");
    session.bring_up().await.expect("bring-up failed");
    session
}

/// exchange until all submitted frames are transmitted
async fn flush(session: &mut Session<SimulatedMacPhy>, frames: &mut Vec<Frame>) {
    for _ in 0 .. 1000 {
        if session.pending_frames() == 0
            {return}
        session.transfer(true, frames).await.unwrap();
    }
    panic!("frames still pending after 1000 exchanges");
}

fn random_frame(rng: &mut impl Rng, max: usize) -> Vec<u8> {
    let length = rng.random_range(1 ..= max);
    (0 .. length).map(|_| rng.random()).collect()
}


#[tokio::test]
async fn register_round_trip() {
    init();
    let device = SimulatedMacPhy::new();
    let mut session = Session::new(device.clone(), Config::default()).unwrap();

    session.write_registers(0, 0x0004, &[0x8006], AddressMode::Increment).await.unwrap();
    assert_eq!(session.read_registers(0, 0x0004, 1, AddressMode::Increment).await.unwrap(), [0x8006]);
    assert_eq!(device.register(0, 0x0004), 0x8006);

    // consecutive registers
    session.write_registers(1, 0x10, &[1, 2, 3], AddressMode::Increment).await.unwrap();
    assert_eq!(session.read_registers(1, 0x10, 3, AddressMode::Increment).await.unwrap(), [1, 2, 3]);
    // same register repeatedly
    session.write_registers(1, 0x20, &[4, 5, 6], AddressMode::Fixed).await.unwrap();
    assert_eq!(session.read_registers(1, 0x20, 2, AddressMode::Increment).await.unwrap(), [6, 0]);
    assert_eq!(session.read_registers(1, 0x20, 2, AddressMode::Fixed).await.unwrap(), [6, 6]);
}

#[tokio::test]
async fn payload_size_follows_config_writes() {
    init();
    let device = SimulatedMacPhy::new();
    let mut session = Session::new(device.clone(), Config::default()).unwrap();
    assert_eq!(session.payload_size(), PayloadSize::Bytes64);
    session.write_registers(0, 0x0004, &[0x0003], AddressMode::Increment).await.unwrap();
    assert_eq!(session.payload_size(), PayloadSize::Bytes8);
    session.write_registers(0, 0x0004, &[0x0005], AddressMode::Increment).await.unwrap();
    assert_eq!(session.payload_size(), PayloadSize::Bytes32);
}

#[tokio::test]
async fn rejected_header_fails_the_command() {
    init();
    let device = SimulatedMacPhy::new();
    let mut session = Session::new(device.clone(), Config::default()).unwrap();

    device.reject_next_header();
    assert_eq!(
        session.read_registers(0, 0, 1, AddressMode::Increment).await,
        Err(ProtocolError::HeaderParityRejected));
    device.reject_next_header();
    assert_eq!(
        session.write_registers(1, 0x10, &[1], AddressMode::Increment).await,
        Err(ProtocolError::HeaderParityRejected));
    assert_eq!(device.register(1, 0x10), 0);

    // the next commands go through again
    assert_eq!(session.read_registers(0, 0, 1, AddressMode::Increment).await.unwrap(), [0x11]);
}

#[tokio::test]
async fn invalid_requests_are_refused_before_exchanging() {
    init();
    let device = SimulatedMacPhy::new();
    let mut session = Session::new(device.clone(), Config::default()).unwrap();

    assert_eq!(
        session.read_registers(0, 0, 0, AddressMode::Increment).await,
        Err(ProtocolError::InvalidRegisterCount(0)));
    assert_eq!(
        session.read_registers(0, 0, 129, AddressMode::Increment).await,
        Err(ProtocolError::InvalidRegisterCount(129)));
    assert_eq!(
        session.write_registers(0, 0, &[0; 129], AddressMode::Increment).await,
        Err(ProtocolError::InvalidRegisterCount(129)));
    assert_eq!(
        session.read_registers(16, 0, 1, AddressMode::Increment).await,
        Err(ProtocolError::InvalidMemoryMap(16)));
    assert_eq!(
        session.submit(Vec::new(), TimestampCapture::None, None),
        Err(ProtocolError::EmptyFrame));
    assert_eq!(
        session.submit(vec![0; 4097], TimestampCapture::None, None),
        Err(ProtocolError::FrameTooLarge(4097)));

    assert!(device.exchanges().is_empty());
    assert_eq!(session.pending_frames(), 0);
}

#[tokio::test]
async fn bring_up_sequence() {
    let device = SimulatedMacPhy::new();
    device.set_indirect(0x04, 0x03);
    device.set_indirect(0x08, 0x1E);
    let config = Config::default().with_node(NodeConfig::follower(3, 5).unwrap());
    let session = link(&device, config).await;

    let writes = device.writes();
    let position = |memory_map: u8, address: u16| writes.iter()
        .position(|&(m, a, _)| m == memory_map && a == address)
        .unwrap_or_else(|| panic!("no write to {}:{:#x}", memory_map, address));
    let value = |memory_map: u8, address: u16| writes[position(memory_map, address)].2;

    // software reset first
    assert_eq!(writes[0], (0, 0x03, 1));
    // collision detection disabled before anything else is configured
    assert_eq!(value(4, 0x87) & 0x8000, 0);
    // calibration from offsets 3 and -2
    assert_eq!(value(4, 0x84), 12 << 10 | 17 << 4 | 3);
    assert_eq!(value(4, 0x8A), 38 << 10);
    assert!(position(4, 0x87) < position(4, 0xD0));
    // node identity, then PLCA enable
    assert_eq!(value(4, 0xCA02), 5 << 8 | 3);
    assert_eq!(value(4, 0xCA01), 0x8000);
    assert!(position(4, 0x50) < position(4, 0xCA02));
    assert!(position(4, 0xCA02) < position(4, 0xCA01));
    // MAC enabled
    assert_eq!(value(1, 0x00), 0x0C);
    assert!(position(4, 0xCA01) < position(1, 0x00));

    // SYNC is the last configuration write, only followed by the reset status clear
    let config = writes.iter().rposition(|&(m, a, _)| m == 0 && a == 0x04).unwrap();
    assert_ne!(writes[config].2 & 0x8000, 0);
    assert_eq!(writes[config + 1 ..], [(0, 0x08, 0x40)]);
    assert_eq!(device.register(0, 0x08) & 0x40, 0);

    assert!(session.flow().seeded());
    assert_eq!(session.flow().tx_credits(), 24);
}

#[tokio::test]
async fn coordinator_identity() {
    let device = SimulatedMacPhy::new();
    let config = Config::default().with_node(NodeConfig::new(NodeRole::Coordinator, 7, 4).unwrap());
    link(&device, config).await;
    assert_eq!(device.register(4, 0xCA02), 4 << 8);
    assert!(NodeConfig::follower(0, 4).is_err());
}

#[tokio::test]
async fn transmit_frames() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let mut received: Vec<Frame> = Vec::new();

    let short: Vec<u8> = (0 .. 20).collect();
    let long: Vec<u8> = (0 .. 130).map(|i| i as u8).collect();
    session.submit(short.clone(), TimestampCapture::None, None).unwrap();
    session.submit(long.clone(), TimestampCapture::None, None).unwrap();
    let before = device.exchanges().len();
    assert_eq!(session.transfer(false, &mut received).await.unwrap(), 4);

    assert_eq!(device.transmitted(), [short, long]);
    assert_eq!(device.exchanges()[before ..], [Exchange::Data {data_chunks: 4, chunks: 4}]);
    assert_eq!(session.pending_frames(), 0);
    assert!(received.is_empty());
    let stats = session.statistics();
    assert_eq!(stats.tx_frames, 2);
    assert_eq!(stats.tx_bytes, 150);
}

#[tokio::test]
async fn transmit_completion_is_reported() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let (done, result) = tokio::sync::oneshot::channel();
    session.submit(vec![0xAB; 100], TimestampCapture::None, Some(done)).unwrap();
    session.transfer(false, &mut Vec::<Frame>::new()).await.unwrap();
    assert_eq!(result.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn credits_are_never_exceeded() {
    let device = SimulatedMacPhy::new();
    let config = Config::default().with_payload_size(PayloadSize::Bytes32);
    let mut session = link(&device, config).await;
    device.set_credit_limit(3);
    // the new limit is only known to the host once reported
    session.transfer(true, &mut Vec::<Frame>::new()).await.unwrap();

    let mut rng = rand::rng();
    let frames: Vec<Vec<u8>> = (0 .. 8).map(|_| random_frame(&mut rng, 600)).collect();
    for frame in &frames {
        session.submit(frame.clone(), TimestampCapture::None, None).unwrap();
    }
    flush(&mut session, &mut Vec::<Frame>::new()).await;

    assert_eq!(device.transmitted(), frames);
    assert_eq!(device.credit_violations(), 0);
    for exchange in device.exchanges() {
        if let Exchange::Data {data_chunks, ..} = exchange
            {assert!(data_chunks <= 3)}
    }
}

#[tokio::test]
async fn transmission_waits_for_credits() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    device.set_credit_limit(2);
    device.hold_credits(true);
    session.transfer(true, &mut Vec::<Frame>::new()).await.unwrap();

    session.submit(vec![1; 300], TimestampCapture::None, None).unwrap();
    assert_eq!(session.transfer(false, &mut Vec::<Frame>::new()).await.unwrap(), 2);
    // buffer full and not draining, nothing can be sent
    assert_eq!(session.flow().tx_credits(), 0);
    assert!(!session.has_data_work());
    assert_eq!(session.transfer(false, &mut Vec::<Frame>::new()).await.unwrap(), 0);

    device.hold_credits(false);
    flush(&mut session, &mut Vec::<Frame>::new()).await;
    assert_eq!(device.transmitted(), [vec![1; 300]]);
    assert_eq!(device.credit_violations(), 0);
}

#[tokio::test]
async fn receive_frames_in_order() {
    let mut rng = rand::rng();
    for size in PayloadSize::ALL {
        let device = SimulatedMacPhy::new();
        let mut session = link(&device, Config::default().with_payload_size(size)).await;
        assert_eq!(session.payload_size(), size);

        let frames: Vec<Vec<u8>> = (0 .. 10).map(|_| random_frame(&mut rng, 1518)).collect();
        for frame in &frames {
            device.inject_frame(frame);
        }
        let mut received: Vec<Frame> = Vec::new();
        for _ in 0 .. 10_000 {
            if received.len() == frames.len()
                {break}
            session.transfer(true, &mut received).await.unwrap();
        }
        let received: Vec<Vec<u8>> = received.into_iter().map(|frame| frame.data).collect();
        assert_eq!(received, frames, "with {} byte chunks", size.bytes());
        assert_eq!(session.statistics().rx_frames, 10);
        assert_eq!(device.pending_rx_chunks(), 0);
    }
}

#[tokio::test]
async fn receive_timestamped_frame() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default().with_frame_timestamps(true)).await;
    let timestamp = Timestamp {seconds: 12, nanoseconds: 345_678};
    device.inject_timestamped_frame(&[7; 90], timestamp);

    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    session.transfer(false, &mut received).await.unwrap();
    assert_eq!(received, [Frame {data: vec![7; 90], timestamp: Some(timestamp)}]);
    // timer increment programmed
    assert_eq!(device.register(1, 0x77), 0x28);
}

#[tokio::test]
async fn chunk_ending_and_starting_frames() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), ..Default::default()});
    let mut middle = vec![1; 10];
    middle.resize(16, 0);
    middle.resize(64, 2);
    device.inject_chunk(RawChunk {payload: middle, start: Some(4), end: Some(9), ..Default::default()});
    device.inject_chunk(RawChunk {payload: vec![2; 64], end: Some(19), ..Default::default()});

    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    session.transfer(false, &mut received).await.unwrap();
    let received: Vec<Vec<u8>> = received.into_iter().map(|frame| frame.data).collect();
    assert_eq!(received, [vec![1; 74], vec![2; 68]]);
}

#[tokio::test]
async fn timestamp_split_over_chunks() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default().with_frame_timestamps(true)).await;
    let timestamp = Timestamp {seconds: 1, nanoseconds: 2};
    let stamp = timestamp.to_be_bytes();

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), ..Default::default()});
    // the next frame starts in the last word, with only half of its timestamp
    let mut dual = vec![1; 60];
    dual.extend_from_slice(&stamp[.. 4]);
    device.inject_chunk(RawChunk {payload: dual, start: Some(15), end: Some(59), timestamp_added: true, ..Default::default()});
    let mut last = stamp[4 ..].to_vec();
    last.extend_from_slice(&[0x77; 20]);
    last.resize(64, 0);
    device.inject_chunk(RawChunk {payload: last, end: Some(23), ..Default::default()});

    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    session.transfer(false, &mut received).await.unwrap();
    assert_eq!(received, [
        Frame {data: vec![1; 124], timestamp: None},
        Frame {data: vec![0x77; 20], timestamp: Some(timestamp)},
        ]);
}

#[tokio::test]
async fn dropped_frames_are_not_delivered() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), end: Some(20), frame_drop: true, ..Default::default()});
    device.inject_frame(&[3; 40]);
    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    session.transfer(false, &mut received).await.unwrap();
    assert_eq!(received, [Frame {data: vec![3; 40], timestamp: None}]);
    assert_eq!(session.statistics().rx_dropped, 1);
}

#[tokio::test]
async fn dropped_frame_discards_the_frame_in_progress() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), ..Default::default()});
    device.inject_chunk(RawChunk {payload: vec![2; 64], start: Some(0), end: Some(9), frame_drop: true, ..Default::default()});
    device.inject_chunk(RawChunk {payload: vec![1; 64], end: Some(9), ..Default::default()});
    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    session.transfer(false, &mut received).await.unwrap();
    assert!(received.is_empty());
    assert_eq!(session.statistics().rx_dropped, 2);
}

#[tokio::test]
async fn receive_overflow_discards_the_frame() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let mut received: Vec<Frame> = Vec::new();

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), ..Default::default()});
    session.transfer(true, &mut received).await.unwrap();

    // the rest of the frame was lost in the device
    device.raise_status(1 << 3);
    device.inject_chunk(RawChunk {payload: vec![1; 64], end: Some(63), ..Default::default()});
    session.transfer(true, &mut received).await.unwrap();
    assert!(received.is_empty());
    assert_eq!(device.register(0, 0x08) & (1 << 3), 0);

    let stats = session.statistics();
    assert_eq!(stats.rx_overflows, 1);
    assert_eq!(stats.rx_dropped, 1);

    // the session carries on
    device.inject_frame(&[5; 64]);
    session.transfer(true, &mut received).await.unwrap();
    assert_eq!(received, [Frame {data: vec![5; 64], timestamp: None}]);
}

#[tokio::test]
async fn fatal_device_status() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    session.submit(vec![1; 500], TimestampCapture::None, None).unwrap();

    device.raise_status(1 << 0);
    assert_eq!(
        session.transfer(true, &mut Vec::<Frame>::new()).await,
        Err(ProtocolError::DeviceExtendedStatus(StatusKind::TransmitProtocolError)));
    assert!(!session.flow().seeded());
    assert_eq!(session.pending_frames(), 0);
}

#[tokio::test]
async fn fatal_error_discards_the_frame_in_progress() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let mut received: Vec<Frame> = Vec::new();

    device.inject_chunk(RawChunk {payload: vec![1; 64], start: Some(0), ..Default::default()});
    session.transfer(true, &mut received).await.unwrap();

    device.raise_status(1 << 4);
    assert_eq!(
        session.transfer(true, &mut received).await,
        Err(ProtocolError::DeviceExtendedStatus(StatusKind::LossOfFrame)));
    assert_eq!(session.statistics().rx_dropped, 1);

    // the end of the lost frame completes nothing
    device.inject_chunk(RawChunk {payload: vec![1; 64], end: Some(9), ..Default::default()});
    session.transfer(true, &mut received).await.unwrap();
    assert!(received.is_empty());
    assert_eq!(device.pending_rx_chunks(), 0);
}

#[tokio::test]
async fn rejected_data_header() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    device.reject_next_header();
    assert_eq!(
        session.transfer(true, &mut Vec::<Frame>::new()).await,
        Err(ProtocolError::HeaderParityRejected));
    assert!(!session.flow().seeded());
}

#[tokio::test]
async fn rejected_header_during_overflow() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let (done, result) = tokio::sync::oneshot::channel();
    session.submit(vec![1; 40], TimestampCapture::None, Some(done)).unwrap();

    device.raise_status(1 << 3);
    device.reject_next_header();
    assert_eq!(
        session.transfer(false, &mut Vec::<Frame>::new()).await,
        Err(ProtocolError::HeaderParityRejected));
    assert_eq!(result.await.unwrap(), Err(ProtocolError::HeaderParityRejected));
    assert!(device.transmitted().is_empty());
    assert_eq!(session.statistics().rx_overflows, 1);
    assert!(!session.flow().seeded());
}

#[tokio::test]
async fn stalled_exchange_times_out() {
    let device = SimulatedMacPhy::new();
    let config = Config::default().with_timeout(std::time::Duration::from_millis(20));
    let mut session = link(&device, config).await;
    let (done, result) = tokio::sync::oneshot::channel();
    session.submit(vec![1; 100], TimestampCapture::None, Some(done)).unwrap();

    device.stall_next_exchange();
    assert!(matches!(
        session.transfer(false, &mut Vec::<Frame>::new()).await,
        Err(ProtocolError::TransportFailure(_))));
    assert!(matches!(result.await.unwrap(), Err(ProtocolError::TransportFailure(_))));
    assert!(!session.flow().seeded());
    assert_eq!(session.pending_frames(), 0);

    // the bus answers again
    session.transfer(true, &mut Vec::<Frame>::new()).await.unwrap();
    assert!(session.flow().seeded());
    assert!(device.transmitted().is_empty());
}

#[tokio::test]
async fn payload_size_before_configuration() {
    init();
    let device = SimulatedMacPhy::new();
    let config = Config::default().with_payload_size(PayloadSize::Bytes16);
    let mut session = Session::new(device.clone(), config).unwrap();
    // the device is still at its reset chunk size
    assert_eq!(session.payload_size(), PayloadSize::Bytes64);

    let frame: Vec<u8> = (0 .. 50).collect();
    session.submit(frame.clone(), TimestampCapture::None, None).unwrap();
    session.transfer(false, &mut Vec::<Frame>::new()).await.unwrap();
    assert_eq!(device.transmitted(), [frame]);
    assert_eq!(device.exchanges().last(), Some(&Exchange::Data {data_chunks: 1, chunks: 1}));

    session.bring_up().await.unwrap();
    assert_eq!(session.payload_size(), PayloadSize::Bytes16);
}

#[tokio::test]
async fn transport_failure_clears_the_session() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    let (done, result) = tokio::sync::oneshot::channel();
    session.submit(vec![1; 300], TimestampCapture::None, Some(done)).unwrap();

    device.fail_next_exchange();
    assert!(matches!(
        session.transfer(false, &mut Vec::<Frame>::new()).await,
        Err(ProtocolError::TransportFailure(_))));
    assert!(matches!(result.await.unwrap(), Err(ProtocolError::TransportFailure(_))));
    assert!(!session.flow().seeded());
    assert_eq!(session.pending_frames(), 0);
    assert_eq!(session.statistics().tx_failed, 1);

    // flow control is seeded again before the next data exchange
    let before = device.exchanges().len();
    session.transfer(true, &mut Vec::<Frame>::new()).await.unwrap();
    assert_eq!(device.exchanges()[before ..], [
        Exchange::Control {write: false, memory_map: 0, address: 0x0B, count: 1},
        Exchange::Data {data_chunks: 0, chunks: 1},
        ]);
    assert!(device.transmitted().is_empty());
}

#[tokio::test]
async fn lost_configuration_is_applied_again() {
    let device = SimulatedMacPhy::new();
    let mut session = link(&device, Config::default()).await;
    device.lose_config_sync();
    device.inject_frame(&[9; 30]);

    let mut received: Vec<Frame> = Vec::new();
    session.transfer(true, &mut received).await.unwrap();
    // the payload of the unsynchronized exchange is still processed
    assert_eq!(received.len(), 1);
    assert!(session.unsynced());

    session.resynchronize().await.unwrap();
    assert!(!session.unsynced());
    assert_ne!(device.register(0, 0x04) & 0x8000, 0);
    assert_eq!(session.statistics().config_resyncs, 1);
}

#[tokio::test]
async fn reset_timeout() {
    init();
    let device = SimulatedMacPhy::new();
    device.stall_reset(true);
    let config = Config {reset_timeout: std::time::Duration::from_millis(20), ..Config::default()};
    let mut session = Session::new(device.clone(), config).unwrap();
    assert_eq!(session.bring_up().await, Err(ProtocolError::ResetTimeout));
    assert!(!session.flow().seeded());
}

#[tokio::test]
async fn bring_up_without_reset() {
    let device = SimulatedMacPhy::new();
    device.inject_frame(&[4; 10]);
    let mut session = link(&device, Config::default().with_reset(false)).await;
    assert!(device.writes().iter().all(|&(m, a, _)| (m, a) != (0, 0x03)));
    // frames received before bring-up are kept
    assert_eq!(session.flow().rx_chunks_available(), 1);
    let mut received: Vec<Frame> = Vec::new();
    session.transfer(false, &mut received).await.unwrap();
    assert_eq!(received, [Frame {data: vec![4; 10], timestamp: None}]);
}
