//! Message Router
//!
//! Every peer evaluates the client table; the peer hosting the server role
//! also evaluates the server table. Both share one transport and are told
//! apart by channel number: server channels are the message type plus
//! [`MessageType::COUNT`].
//!
//! Handlers are typed event streams. [`MessageRouter::subscribe`] hands out
//! an [`Inbox`] fed by an unbounded `tokio::sync::mpsc` channel; a channel
//! with no subscriber drops its traffic silently.

use std::collections::BTreeSet;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

use super::protocol::{BehaviourMessage, DeliveryMode, MessageType};
use super::transport::{PeerId, Transport};
use crate::core::codec::WireEncode;
use crate::game::behaviour::{MessageTarget, OutgoingMessage};

/// Which table a message is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Evaluated by every peer
    Client,
    /// Evaluated by the peer hosting the server
    Server,
}

/// A routed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Table the message was routed through
    pub role: Role,
    /// Logical message type
    pub kind: MessageType,
    /// Originating peer
    pub sender: PeerId,
    /// Payload trimmed to the reported length
    pub payload: Vec<u8>,
}

/// Router failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The transport refused a unicast.
    #[error("transport refused {kind:?} ({len} bytes) to {peer} on channel {channel}")]
    TransportSendFailure {
        /// Destination
        peer: PeerId,
        /// Channel number used
        channel: u8,
        /// Logical type
        kind: MessageType,
        /// Payload length
        len: usize,
    },
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Inbox {
    rx: UnboundedReceiver<Inbound>,
}

impl Inbox {
    /// Next queued message, if any.
    pub fn try_next(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }

    /// Every queued message, in arrival order.
    pub fn drain(&mut self) -> Vec<Inbound> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

type Table = [Vec<UnboundedSender<Inbound>>; MessageType::COUNT as usize];

/// Channel demultiplexer and send multiplexer over one transport.
pub struct MessageRouter<T: Transport> {
    transport: T,
    client_table: Table,
    server_table: Table,
    debug_messages: bool,
}

impl<T: Transport> MessageRouter<T> {
    /// Wrap a transport. `debug_messages` traces every message at `debug!`.
    pub fn new(transport: T, debug_messages: bool) -> Self {
        Self {
            transport,
            client_table: Default::default(),
            server_table: Default::default(),
            debug_messages,
        }
    }

    /// Register one stream for `kinds` on the `role` table.
    pub fn subscribe(&mut self, role: Role, kinds: &[MessageType]) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let table = match role {
            Role::Client => &mut self.client_table,
            Role::Server => &mut self.server_table,
        };
        for kind in kinds {
            table[*kind as usize].push(tx.clone());
        }
        Inbox { rx }
    }

    /// Route one received datagram. Returns the number of streams it reached.
    pub fn on_data(&mut self, sender: PeerId, bytes: &[u8], channel: u8, len: usize) -> usize {
        let (role, index) = if channel < MessageType::COUNT {
            (Role::Client, channel)
        } else {
            (Role::Server, channel - MessageType::COUNT)
        };
        let Some(kind) = MessageType::from_index(index) else {
            warn!(%sender, channel, "Dropping datagram on unknown channel");
            return 0;
        };

        let payload = &bytes[..len.min(bytes.len())];
        if self.debug_messages {
            tracing::debug!(%sender, ?role, ?kind, len = payload.len(), "recv");
        }

        let table = match role {
            Role::Client => &mut self.client_table,
            Role::Server => &mut self.server_table,
        };
        let handlers = &mut table[kind as usize];
        if handlers.is_empty() {
            trace!(%sender, ?role, ?kind, "No handler registered");
            return 0;
        }

        // Subscribers whose inbox was dropped are pruned here.
        handlers.retain(|tx| {
            tx.send(Inbound {
                role,
                kind,
                sender,
                payload: payload.to_vec(),
            })
            .is_ok()
        });
        handlers.len()
    }

    /// Drain the transport into the subscribed streams.
    pub fn pump(&mut self) -> usize {
        let mut count = 0;
        while let Some(dgram) = self.transport.poll_receive() {
            self.on_data(dgram.sender, &dgram.bytes, dgram.channel, dgram.len);
            count += 1;
        }
        count
    }

    /// Send on the client table of `peer`.
    pub fn send_to(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        kind: MessageType,
        mode: DeliveryMode,
    ) -> Result<(), RouterError> {
        self.send_on(peer, bytes, kind, kind.client_channel(), mode)
    }

    /// Send on the client table of every session peer, the local one included.
    ///
    /// A failure for one peer does not stop delivery to the rest; the last
    /// failure is returned.
    pub fn send_to_all(
        &mut self,
        bytes: &[u8],
        kind: MessageType,
        mode: DeliveryMode,
    ) -> Result<(), RouterError> {
        let mut result = Ok(());
        for peer in self.transport.session_peer_ids() {
            if let Err(e) = self.send_to(peer, bytes, kind, mode) {
                result = Err(e);
            }
        }
        result
    }

    /// Send on the server table of the server peer.
    pub fn send_to_server(
        &mut self,
        bytes: &[u8],
        kind: MessageType,
        mode: DeliveryMode,
    ) -> Result<(), RouterError> {
        let server = self.transport.server_peer_id();
        self.send_on(server, bytes, kind, kind.server_channel(), mode)
    }

    fn send_on(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        kind: MessageType,
        channel: u8,
        mode: DeliveryMode,
    ) -> Result<(), RouterError> {
        if self.debug_messages {
            tracing::debug!(%peer, ?kind, channel, ?mode, len = bytes.len(), "send");
        }
        if self.transport.send_unicast(peer, bytes, channel, mode) {
            return Ok(());
        }
        let err = RouterError::TransportSendFailure {
            peer,
            channel,
            kind,
            len: bytes.len(),
        };
        warn!(error = %err, "Send failed");
        Err(err)
    }

    /// Deliver a behaviour outbox entry on the EntityBehaviourMessage channel.
    pub fn send_behaviour(&mut self, message: &OutgoingMessage) -> Result<(), RouterError> {
        let bytes = BehaviourMessage {
            network_id: message.network_id,
            behaviour_index: message.behaviour_index,
            payload: message.payload.clone(),
        }
        .to_bytes();
        let kind = MessageType::EntityBehaviourMessage;
        match message.target {
            MessageTarget::Server => self.send_to_server(&bytes, kind, message.mode),
            MessageTarget::Peer(peer) => self.send_to(peer, &bytes, kind, message.mode),
            MessageTarget::All => self.send_to_all(&bytes, kind, message.mode),
        }
    }

    /// This process's identity.
    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// The peer hosting the server role.
    pub fn server_peer_id(&self) -> PeerId {
        self.transport.server_peer_id()
    }

    /// True if this process hosts the server role.
    pub fn is_server(&self) -> bool {
        self.local_peer_id() == self.server_peer_id()
    }

    /// Everyone in the session.
    pub fn session_peer_ids(&self) -> BTreeSet<PeerId> {
        self.transport.session_peer_ids()
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::{LinkConditions, MemoryNetwork};

    fn routers() -> (
        MessageRouter<crate::network::memory::MemoryTransport>,
        MessageRouter<crate::network::memory::MemoryTransport>,
    ) {
        let net = MemoryNetwork::new(PeerId(1), LinkConditions::default());
        let host = MessageRouter::new(net.join(PeerId(1)), false);
        let client = MessageRouter::new(net.join(PeerId(2)), false);
        (host, client)
    }

    #[test]
    fn test_client_and_server_tables_are_separate() {
        let (mut host, mut client) = routers();
        let mut server_inbox = host.subscribe(Role::Server, &[MessageType::Initialization]);
        let mut client_inbox = host.subscribe(Role::Client, &[MessageType::Initialization]);

        client
            .send_to_server(&[], MessageType::Initialization, DeliveryMode::ReliableOrdered)
            .unwrap();
        host.pump();

        let msg = server_inbox.try_next().unwrap();
        assert_eq!(msg.role, Role::Server);
        assert_eq!(msg.sender, PeerId(2));
        assert!(client_inbox.try_next().is_none());
    }

    #[test]
    fn test_send_to_all_includes_local_peer() {
        let (mut host, mut client) = routers();
        let mut host_inbox = host.subscribe(Role::Client, &[MessageType::DestroyEntity]);
        let mut client_inbox = client.subscribe(Role::Client, &[MessageType::DestroyEntity]);

        host.send_to_all(&[1, 0, 0, 0], MessageType::DestroyEntity, DeliveryMode::ReliableOrdered)
            .unwrap();
        host.pump();
        client.pump();

        assert_eq!(host_inbox.drain().len(), 1);
        assert_eq!(client_inbox.try_next().unwrap().payload, vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_on_data_trims_to_reported_length() {
        let (mut host, _client) = routers();
        let mut inbox = host.subscribe(Role::Server, &[MessageType::PingPong]);

        let delivered = host.on_data(PeerId(2), &[1, 2, 3, 4, 0, 0, 0], MessageType::COUNT, 4);
        assert_eq!(delivered, 1);
        assert_eq!(inbox.try_next().unwrap().payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unsubscribed_channel_is_noop() {
        let (mut host, _client) = routers();
        assert_eq!(host.on_data(PeerId(2), &[0; 4], 3, 4), 0);
        assert_eq!(host.on_data(PeerId(2), &[0; 4], 200, 4), 0);
    }

    #[test]
    fn test_multiple_handlers_per_channel() {
        let (mut host, _client) = routers();
        let mut a = host.subscribe(Role::Client, &[MessageType::StartGame]);
        let mut b = host.subscribe(Role::Client, &[MessageType::StartGame, MessageType::PingPong]);

        assert_eq!(host.on_data(PeerId(2), b"go", 1, 2), 2);
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);

        drop(a);
        assert_eq!(host.on_data(PeerId(2), b"go", 1, 2), 1);
    }

    #[test]
    fn test_send_failure_reported() {
        let (mut host, _client) = routers();
        let err = host
            .send_to(PeerId(77), b"x", MessageType::StartGame, DeliveryMode::ReliableOrdered)
            .unwrap_err();
        assert!(matches!(err, RouterError::TransportSendFailure { channel: 1, .. }));
        assert!(host.is_server());
    }
}
