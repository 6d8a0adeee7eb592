//! Peer Composition
//!
//! One process, one transport, one router. Every peer runs a client; the
//! peer the transport names as server also runs the server over the same
//! router.

use std::sync::Arc;

use tracing::info;

use super::client::GameClient;
use super::config::NetConfig;
use super::router::MessageRouter;
use super::server::GameServer;
use super::transport::{PeerId, Transport};
use crate::core::hash::short_hex;
use crate::game::behaviour::BehaviourRegistry;
use crate::game::events::{ClientEvent, ServerEvent};
use crate::replication::template::TemplateCatalog;

/// Everything one poll produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerEvents {
    /// Server events (always empty on non-hosting peers)
    pub server: Vec<ServerEvent>,
    /// Client events
    pub client: Vec<ClientEvent>,
}

impl PeerEvents {
    /// True if nothing happened.
    pub fn is_empty(&self) -> bool {
        self.server.is_empty() && self.client.is_empty()
    }
}

/// A session participant.
pub struct Peer<T: Transport> {
    router: MessageRouter<T>,
    server: Option<GameServer>,
    client: GameClient,
}

impl<T: Transport> Peer<T> {
    /// Build the roles for this peer. The server role is created only when
    /// the transport reports this peer as the server.
    pub fn new(
        transport: T,
        config: &NetConfig,
        catalog: Arc<TemplateCatalog>,
        behaviours: Arc<BehaviourRegistry>,
    ) -> Self {
        let mut router = MessageRouter::new(transport, config.debug_messages);
        let server = router.is_server().then(|| {
            GameServer::new(
                config.server.clone(),
                catalog.clone(),
                behaviours.clone(),
                &mut router,
            )
        });
        let client = GameClient::new(config.client.clone(), catalog.clone(), behaviours, &mut router);
        info!(
            peer = %router.local_peer_id(),
            hosting = server.is_some(),
            catalog = %short_hex(&catalog.fingerprint()),
            "Peer created"
        );
        Self {
            router,
            server,
            client,
        }
    }

    /// Drain the transport, then run the server (if hosted) and the client.
    pub fn poll(&mut self, now: f32) -> PeerEvents {
        self.router.pump();
        let server = match self.server.as_mut() {
            Some(server) => server.poll(now, &mut self.router),
            None => Vec::new(),
        };
        // Loopback traffic the server just sent to its own client.
        self.router.pump();
        let client = self.client.poll(now, &mut self.router);
        PeerEvents { server, client }
    }

    /// This peer's id.
    pub fn id(&self) -> PeerId {
        self.router.local_peer_id()
    }

    /// True if this peer hosts the server.
    pub fn is_host(&self) -> bool {
        self.server.is_some()
    }

    /// The client role.
    pub fn client(&self) -> &GameClient {
        &self.client
    }

    /// Mutable client role.
    pub fn client_mut(&mut self) -> &mut GameClient {
        &mut self.client
    }

    /// The server role, if hosted here.
    pub fn server(&self) -> Option<&GameServer> {
        self.server.as_ref()
    }

    /// The server role and the router it sends through, if hosted here.
    pub fn server_mut(&mut self) -> Option<(&mut GameServer, &mut MessageRouter<T>)> {
        let server = self.server.as_mut()?;
        Some((server, &mut self.router))
    }

    /// The router.
    pub fn router(&self) -> &MessageRouter<T> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::{LinkConditions, MemoryNetwork};
    use crate::replication::template::EntityTemplate;

    #[test]
    fn test_only_server_peer_hosts() {
        let net = MemoryNetwork::new(PeerId(1), LinkConditions::default());
        let catalog = Arc::new(TemplateCatalog::build(vec![EntityTemplate::new("Crate").with_id(5)]).unwrap());
        let behaviours = Arc::new(BehaviourRegistry::new());
        let config = NetConfig::default();

        let host = Peer::new(net.join(PeerId(1)), &config, catalog.clone(), behaviours.clone());
        let guest = Peer::new(net.join(PeerId(2)), &config, catalog, behaviours);
        assert!(host.is_host());
        assert!(!guest.is_host());
        assert_eq!(guest.id(), PeerId(2));
    }

    #[test]
    fn test_solo_host_initializes_itself() {
        let net = MemoryNetwork::new(PeerId(1), LinkConditions::default());
        let catalog = Arc::new(TemplateCatalog::new());
        let mut host = Peer::new(
            net.join(PeerId(1)),
            &NetConfig::default(),
            catalog,
            Arc::new(BehaviourRegistry::new()),
        );

        // First poll sends Initialization; the second delivers it and the echo.
        host.poll(0.0);
        let events = host.poll(0.1);
        assert!(events.server.contains(&ServerEvent::Running));
        assert!(events.client.contains(&ClientEvent::Initialized));
    }
}
