//! Protocol Messages
//!
//! Binary wire formats for every logical message type. All layouts are
//! little-endian with 4-byte length prefixes on variable fields (see
//! [`crate::core::codec`]).
//!
//! | Message                | Layout                                                      |
//! |------------------------|-------------------------------------------------------------|
//! | EntityState            | 61-byte header + name length + UTF-8 name                   |
//! | EntityStateList        | count + repeated (length + EntityState)                     |
//! | DestroyEntity          | networkId:i32                                               |
//! | BehaviourMessage       | networkId:i32 + index:i32 + payload length + payload        |
//! | BehaviourInitialized   | networkId:i32 + index:i32                                   |
//! | PingPong (request)     | clientTime:f32                                              |
//! | PingPong (reply)       | echoedTime:f32 + tickHz:f32                                 |
//! | Initialization         | empty                                                       |
//! | StartGame              | opaque game bytes                                           |

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::codec::{
    CodecError, WireDecode, WireEncode, WireReader, WireWriter, LEN_PREFIX, QUAT_LEN, VEC3_LEN,
};
use crate::core::transform::Transform;

/// Authoritative entity identity, assigned by the server.
pub type NetworkId = i32;

/// Stable template identifier. Positive for roots, `-(1+i)` for the i-th child.
pub type ResourceId = i32;

/// Payload ceiling for unreliable sends (bytes).
pub const UNRELIABLE_MTU: usize = 1200;

/// Payload ceiling for reliable sends (bytes).
pub const RELIABLE_MTU: usize = 1_000_000;

// =============================================================================
// CHANNELS
// =============================================================================

/// Closed set of logical message types. The discriminant is the client
/// channel number; the server channel adds [`MessageType::COUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Latency probe and tick-rate discovery
    PingPong = 0,
    /// Lobby signal telling clients to enter the game
    StartGame = 1,
    /// Handshake request (client) and echo (server)
    Initialization = 2,
    /// Single-entity spawn or update
    EntityState = 3,
    /// Batched entity updates
    EntityStateList = 4,
    /// Destroy by network id
    DestroyEntity = 5,
    /// Opaque payload addressed to one behaviour of one entity
    EntityBehaviourMessage = 6,
    /// Behaviour initialization acknowledgement / broadcast
    EntityBehaviourInitialized = 7,
}

impl MessageType {
    /// Number of logical message types; also the server channel offset.
    pub const COUNT: u8 = 8;

    /// Every type in channel order.
    pub const ALL: [MessageType; 8] = [
        MessageType::PingPong,
        MessageType::StartGame,
        MessageType::Initialization,
        MessageType::EntityState,
        MessageType::EntityStateList,
        MessageType::DestroyEntity,
        MessageType::EntityBehaviourMessage,
        MessageType::EntityBehaviourInitialized,
    ];

    /// Channel number on the client table.
    #[inline]
    pub fn client_channel(self) -> u8 {
        self as u8
    }

    /// Channel number on the server table.
    #[inline]
    pub fn server_channel(self) -> u8 {
        self as u8 + Self::COUNT
    }

    /// Inverse of the discriminant.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// Transport delivery semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Best effort, no retry, no ordering
    UnreliableUnordered,
    /// In-order, eventual delivery while the connection lives
    ReliableOrdered,
}

impl DeliveryMode {
    /// Largest payload the transport accepts in this mode.
    pub fn max_payload(self) -> usize {
        match self {
            DeliveryMode::UnreliableUnordered => UNRELIABLE_MTU,
            DeliveryMode::ReliableOrdered => RELIABLE_MTU,
        }
    }
}

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Size of the fixed part of an [`EntityState`].
pub const ENTITY_STATE_HEADER_LEN: usize = 4 + 1 + 4 * 4 + VEC3_LEN + QUAT_LEN + VEC3_LEN;

/// Snapshot of one entity, used both as a spawn and as an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Server time the snapshot was taken
    pub time: f32,
    /// Whether `parent_instance_id` is meaningful
    pub has_parent: bool,
    /// Template the entity was spawned from
    pub resource_id: ResourceId,
    /// Network id of this entity
    pub instance_id: NetworkId,
    /// Network id of the hierarchy root
    pub root_instance_id: NetworkId,
    /// Network id of the parent (0 when `has_parent` is false)
    pub parent_instance_id: NetworkId,
    /// Parent-local transform
    pub transform: Transform,
    /// Display name
    pub name: String,
}

impl EntityState {
    /// Parent network id, if any.
    pub fn parent(&self) -> Option<NetworkId> {
        self.has_parent.then_some(self.parent_instance_id)
    }

    /// Length of this state inside a list frame.
    pub fn framed_len(&self) -> usize {
        LEN_PREFIX + self.encoded_len()
    }
}

impl WireEncode for EntityState {
    fn encode(&self, w: &mut WireWriter) {
        w.write_f32(self.time);
        w.write_bool(self.has_parent);
        w.write_i32(self.resource_id);
        w.write_i32(self.instance_id);
        w.write_i32(self.root_instance_id);
        w.write_i32(self.parent_instance_id);
        w.write_vec3(self.transform.position);
        w.write_quat(self.transform.rotation);
        w.write_vec3(self.transform.scale);
        w.write_str(&self.name);
    }

    fn encoded_len(&self) -> usize {
        ENTITY_STATE_HEADER_LEN + LEN_PREFIX + self.name.len()
    }
}

impl WireDecode for EntityState {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let time = r.read_f32()?;
        let has_parent = r.read_bool()?;
        let resource_id = r.read_i32()?;
        let instance_id = r.read_i32()?;
        let root_instance_id = r.read_i32()?;
        let parent_instance_id = r.read_i32()?;
        let position = r.read_vec3()?;
        let rotation = r.read_quat()?;
        let scale = r.read_vec3()?;
        let name = r.read_string()?;

        Ok(Self {
            time,
            has_parent,
            resource_id,
            instance_id,
            root_instance_id,
            parent_instance_id,
            transform: Transform::new(position, rotation, scale),
            name,
        })
    }
}

/// Size of the count prefix of an [`EntityStateList`].
pub const ENTITY_STATE_LIST_HEADER_LEN: usize = 4;

/// A batch of entity states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStateList {
    /// States in send order (parents before children)
    pub states: Vec<EntityState>,
}

impl EntityStateList {
    /// Wrap a batch of states.
    pub fn new(states: Vec<EntityState>) -> Self {
        Self { states }
    }
}

impl WireEncode for EntityStateList {
    fn encode(&self, w: &mut WireWriter) {
        w.write_len(self.states.len());
        for state in &self.states {
            w.write_len(state.encoded_len());
            state.encode(w);
        }
    }

    fn encoded_len(&self) -> usize {
        ENTITY_STATE_LIST_HEADER_LEN + self.states.iter().map(EntityState::framed_len).sum::<usize>()
    }
}

impl WireDecode for EntityStateList {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let count = r.read_len()?;
        // Each framed state is at least a prefix plus a header; cap the
        // preallocation by what the buffer could possibly hold.
        let max_possible = r.remaining() / (LEN_PREFIX + ENTITY_STATE_HEADER_LEN);
        let mut states = Vec::with_capacity(count.min(max_possible));
        for _ in 0..count {
            states.push(r.read_framed::<EntityState>()?);
        }
        Ok(Self { states })
    }
}

// =============================================================================
// LIFECYCLE + BEHAVIOURS
// =============================================================================

/// Destroy-by-network-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyEntity {
    /// Entity to destroy
    pub network_id: NetworkId,
}

impl WireEncode for DestroyEntity {
    fn encode(&self, w: &mut WireWriter) {
        w.write_i32(self.network_id);
    }

    fn encoded_len(&self) -> usize {
        4
    }
}

impl WireDecode for DestroyEntity {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            network_id: r.read_i32()?,
        })
    }
}

/// Opaque payload for one behaviour of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviourMessage {
    /// Owning entity
    pub network_id: NetworkId,
    /// Ordinal of the behaviour within the entity
    pub behaviour_index: i32,
    /// Behaviour-defined bytes
    pub payload: Vec<u8>,
}

impl WireEncode for BehaviourMessage {
    fn encode(&self, w: &mut WireWriter) {
        w.write_i32(self.network_id);
        w.write_i32(self.behaviour_index);
        w.write_bytes(&self.payload);
    }

    fn encoded_len(&self) -> usize {
        8 + LEN_PREFIX + self.payload.len()
    }
}

impl WireDecode for BehaviourMessage {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let network_id = r.read_i32()?;
        let behaviour_index = r.read_i32()?;
        let payload = r.read_bytes()?.to_vec();
        Ok(Self {
            network_id,
            behaviour_index,
            payload,
        })
    }
}

/// Behaviour initialization acknowledgement (client) or broadcast (server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BehaviourInitialized {
    /// Owning entity
    pub network_id: NetworkId,
    /// Ordinal of the behaviour within the entity
    pub behaviour_index: i32,
}

impl WireEncode for BehaviourInitialized {
    fn encode(&self, w: &mut WireWriter) {
        w.write_i32(self.network_id);
        w.write_i32(self.behaviour_index);
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

impl WireDecode for BehaviourInitialized {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let network_id = r.read_i32()?;
        let behaviour_index = r.read_i32()?;
        Ok(Self {
            network_id,
            behaviour_index,
        })
    }
}

// =============================================================================
// PING PONG
// =============================================================================

/// Client-to-server latency probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Client local time when sent
    pub client_time: f32,
}

impl WireEncode for PingRequest {
    fn encode(&self, w: &mut WireWriter) {
        w.write_f32(self.client_time);
    }

    fn encoded_len(&self) -> usize {
        4
    }
}

impl WireDecode for PingRequest {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_time: r.read_f32()?,
        })
    }
}

/// Server-to-client probe reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    /// The request's `client_time`, unchanged
    pub echoed_time: f32,
    /// Server replication rate
    pub tick_hz: f32,
}

impl WireEncode for PingReply {
    fn encode(&self, w: &mut WireWriter) {
        w.write_f32(self.echoed_time);
        w.write_f32(self.tick_hz);
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

impl WireDecode for PingReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let echoed_time = r.read_f32()?;
        let tick_hz = r.read_f32()?;
        Ok(Self {
            echoed_time,
            tick_hz,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
