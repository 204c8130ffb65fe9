use core::time::Duration;
use log::*;
use tokio::time::{sleep, Instant};

use crate::{
    Transport,
    chunk::PayloadSize,
    registers::{
        self, Register, Reset, Status0, PlcaControl0, PlcaControl1, MMS_VENDOR,
        CDCTL0, CONFIG0, INDIRECT_ADDRESS, INDIRECT_VALUE, INDIRECT_WIDTH,
        MAC_NCFGR, MAC_NCR, MAC_TI, PLCA_CTRL0, PLCA_CTRL1, RESET, STATUS0, STDCAP,
        },
    };
use super::{
    ProtocolError, Result,
    session::Session,
    };


/// MAC network configuration: accept unicast and multicast hash matches
const NCFGR_HASH_FILTERS: u32 = 0xC0;
/// MAC network control: enable transmit and receive
const NCR_TX_RX: u32 = 0x0C;
/// MAC timer increment for receive timestamps, in nanoseconds per clock
const TIMER_INCREMENT: u32 = 0x28;
/// RESETC polling period
const RESET_POLL: Duration = Duration::from_millis(1);

/// indirect fields holding the calibration offsets
const OFFSET1_FIELD: u8 = 0x04;
const OFFSET2_FIELD: u8 = 0x08;
const OFFSET_MASK: u8 = 0x1F;


/// two's complement value of a 5 bit offset field
fn signed_offset(value: u8) -> i32 {
    let value = i32::from(value & OFFSET_MASK);
    if value & 0x10 != 0 {value - 0x20} else {value}
}

/// analog calibration parameters derived from the two offset fields
pub fn calibration(offset1: i32, offset2: i32) -> (u32, u32) {
    let param1 = (((9 + offset1) & 0x3F) << 10) | (((14 + offset1) & 0x3F) << 4) | 0x03;
    let param2 = ((40 + offset2) & 0x3F) << 10;
    (param1 as u32, param2 as u32)
}

/// vendor registers written in order during calibration
fn calibration_writes(param1: u32, param2: u32) -> [(u16, u32); 20] {
    [
        (0xD0, 0x3F31),
        (0xE0, 0xC000),
        (0x84, param1),
        (0x8A, param2),
        (0xE9, 0x9E50),
        (0xF5, 0x1CF8),
        (0xF4, 0xC020),
        (0xF8, 0xB900),
        (0xF9, 0x4E53),
        (0x81, 0x0080),
        (0x91, 0x9660),
        (0x77, 0x0028),
        (0x43, 0x00FF),
        (0x44, 0xFFFF),
        (0x45, 0x0000),
        (0x53, 0x00FF),
        (0x54, 0xFFFF),
        (0x55, 0x0000),
        (0x40, 0x0002),
        (0x50, 0x0002),
    ]
}


impl<T: Transport> Session<T> {
    /**
        bring the link up: software reset if configured, PLCA configuration, flow control seeding

        the session is ready for data transfers afterwards
    */
    pub async fn bring_up(&mut self) -> Result<()> {
        let result = self.bring_up_steps().await;
        self.check(result)
    }

    async fn bring_up_steps(&mut self) -> Result<()> {
        self.flow.reset();
        self.reassembler.discard();
        if self.config.reset
            {self.software_reset().await?;}

        let capabilities = self.read(STDCAP).await?;
        if !capabilities.direct_phy_access()
            {warn!("MAC-PHY does not map its PHY registers, clause 22 and 45 accesses will fail")}

        self.configure().await?;
        self.seed_flow_control().await?;
        info!("link up, {} byte chunks", self.payload_size.bytes());
        Ok(())
    }

    /// reset the MAC-PHY and wait for it to report reset completion
    pub async fn software_reset(&mut self) -> Result<()> {
        let mut reset = Reset::default();
        reset.set_software_reset(true);
        self.write(RESET, reset).await?;
        self.flow.reset();
        self.reassembler.discard();
        self.payload_size = PayloadSize::default();

        let start = Instant::now();
        loop {
            if self.read(STATUS0).await?.reset_complete() {
                info!("software reset complete");
                return Ok(());
            }
            if start.elapsed() >= self.config.reset_timeout {
                error!("MAC-PHY did not complete its reset in {:?}", self.config.reset_timeout);
                return self.check(Err(ProtocolError::ResetTimeout));
            }
            sleep(RESET_POLL).await;
        }
    }

    /**
        apply the node configuration: collision detection off, calibration, PLCA identity and enable, MAC enable, then SYNC

        SYNC is the last configuration write, the footers report the configuration as synchronized only after it.
    */
    pub async fn configure(&mut self) -> Result<()> {
        let node = self.config.node;
        let timestamps = self.config.frame_timestamps;
        let payload_size = self.config.payload_size;

        self.modify(CDCTL0, |mut control| {control.set_enable(false); control}).await?;
        self.calibrate().await?;

        let mut identity = PlcaControl1::default();
        identity.set_node_id(node.node_id());
        identity.set_node_count(node.node_count());
        self.write(PLCA_CTRL1, identity).await?;
        let mut plca = PlcaControl0::default();
        plca.set_enable(true);
        self.write(PLCA_CTRL0, plca).await?;

        self.write(MAC_NCFGR, NCFGR_HASH_FILTERS).await?;
        self.write(MAC_NCR, NCR_TX_RX).await?;
        if timestamps
            {self.write(MAC_TI, TIMER_INCREMENT).await?;}

        self.modify(CONFIG0, |mut config| {
            config.set_payload_size(payload_size);
            config.set_frame_timestamp_enable(timestamps);
            config.set_frame_timestamp_select(timestamps);
            config.set_sync(true);
            config
        }).await?;

        let mut status = Status0::default();
        status.set_reset_complete(true);
        self.write(STATUS0, status).await?;
        self.unsynced = false;

        if self.payload_size != payload_size
            {return Err(ProtocolError::InvalidConfig("MAC-PHY refused the chunk payload size"))}
        info!("PLCA node {} of {} configured ({:?})", node.node_id(), node.node_count(), node.role());
        Ok(())
    }

    /// apply the configuration again after the device reported it lost
    pub async fn resynchronize(&mut self) -> Result<()> {
        warn!("applying MAC-PHY configuration again");
        self.stats.config_resyncs += 1;
        self.configure().await?;
        if !self.read(CONFIG0).await?.sync()
            {return Err(ProtocolError::ConfigUnsynced)}
        Ok(())
    }

    /// read a field through the indirect access port
    async fn indirect_read(&mut self, field: u8) -> Result<u8> {
        self.write(INDIRECT_ADDRESS, u32::from(field)).await?;
        self.write(INDIRECT_WIDTH, 0x02).await?;
        let value = self.read(INDIRECT_VALUE).await?;
        Ok((value & u32::from(OFFSET_MASK)) as u8)
    }

    async fn calibrate(&mut self) -> Result<()> {
        let offset1 = signed_offset(self.indirect_read(OFFSET1_FIELD).await?);
        let offset2 = signed_offset(self.indirect_read(OFFSET2_FIELD).await?);
        let (param1, param2) = calibration(offset1, offset2);
        debug!("calibration offsets {} {}, parameters {:#06x} {:#06x}", offset1, offset2, param1, param2);
        for (address, value) in calibration_writes(param1, param2) {
            self.write(Register::<u32>::new(MMS_VENDOR, address), value).await?;
        }
        Ok(())
    }

    /// current PLCA status register
    pub async fn plca_status(&mut self) -> Result<u32> {
        self.read(registers::PLCA_STATUS).await
    }
}
