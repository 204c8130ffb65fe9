//! Configuration of a protocol session

use core::time::Duration;

use crate::chunk::PayloadSize;
use super::{ProtocolError, Result};


/// highest PLCA node id
pub const MAX_NODE_ID: u8 = 254;
/// highest PLCA node count
pub const MAX_NODE_COUNT: u8 = 254;
/// chunks per data exchange the MAC-PHY buffers can hold
pub const DEFAULT_MAX_CHUNKS: usize = 48;


/// role of this node in the PLCA cycle
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// emits the beacon starting every cycle, always node 0
    #[default]
    Coordinator,
    /// waits for its transmit opportunity in the cycle
    Follower,
}

/// PLCA identity of this node on the shared medium
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    role: NodeRole,
    node_id: u8,
    node_count: u8,
}
impl Default for NodeConfig {
    fn default() -> Self {
        Self {role: NodeRole::Coordinator, node_id: 0, node_count: 8}
    }
}
impl NodeConfig {
    /**
        check and build a node identity

        a coordinator always uses node id 0 whatever `node_id` says, a follower cannot use id 0
    */
    pub fn new(role: NodeRole, node_id: u8, node_count: u8) -> Result<Self> {
        if node_count == 0 || node_count > MAX_NODE_COUNT
            {return Err(ProtocolError::InvalidConfig("node count must be in 1..=254"))}
        let node_id = match role {
            NodeRole::Coordinator => 0,
            NodeRole::Follower => {
                if node_id == 0
                    {return Err(ProtocolError::InvalidConfig("node id 0 is reserved to the coordinator"))}
                if node_id > MAX_NODE_ID
                    {return Err(ProtocolError::InvalidConfig("node id must be in 0..=254"))}
                node_id
            },
        };
        Ok(Self {role, node_id, node_count})
    }
    pub fn coordinator(node_count: u8) -> Result<Self> {
        Self::new(NodeRole::Coordinator, 0, node_count)
    }
    pub fn follower(node_id: u8, node_count: u8) -> Result<Self> {
        Self::new(NodeRole::Follower, node_id, node_count)
    }
    pub fn role(&self) -> NodeRole {self.role}
    pub fn node_id(&self) -> u8 {self.node_id}
    pub fn node_count(&self) -> u8 {self.node_count}
}

/// settings of a protocol session
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// PLCA identity
    pub node: NodeConfig,
    /// chunk payload size written in CONFIG0 during bring-up
    pub payload_size: PayloadSize,
    /// limit for one transport exchange
    pub timeout: Duration,
    /// chunks in one data exchange, pending register requests are served between exchanges
    pub max_chunks_per_transfer: usize,
    /// poll the MAC-PHY periodically when no interrupt line is wired
    pub poll_interval: Option<Duration>,
    /// perform a software reset during bring-up
    pub reset: bool,
    /// limit for the reset to complete
    pub reset_timeout: Duration,
    /// prefix received frames with their receive timestamp
    pub frame_timestamps: bool,
    /// capacity of the worker request queue
    pub queue_depth: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            payload_size: PayloadSize::Bytes64,
            timeout: Duration::from_millis(100),
            max_chunks_per_transfer: DEFAULT_MAX_CHUNKS,
            poll_interval: None,
            reset: true,
            reset_timeout: Duration::from_secs(1),
            frame_timestamps: false,
            queue_depth: 16,
        }
    }
}
impl Config {
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }
    pub fn with_payload_size(mut self, payload_size: PayloadSize) -> Self {
        self.payload_size = payload_size;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_max_chunks_per_transfer(mut self, chunks: usize) -> Self {
        self.max_chunks_per_transfer = chunks;
        self
    }
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }
    pub fn with_frame_timestamps(mut self, enable: bool) -> Self {
        self.frame_timestamps = enable;
        self
    }

    /// check values the builder methods cannot prevent
    pub fn validate(&self) -> Result<()> {
        if self.max_chunks_per_transfer == 0
            {return Err(ProtocolError::InvalidConfig("at least one chunk per transfer is needed"))}
        if self.queue_depth == 0
            {return Err(ProtocolError::InvalidConfig("request queue cannot be empty"))}
        Ok(())
    }
}
