//! Connection handling and message routing.
//!
//! The [`Router`] is the hub process of a deployment: devices publish on
//! one side, clients subscribe on the other, and every message crosses the
//! router exactly once. Device-originated traffic fans out to every client
//! subject to each client's BLOB policy; client requests travel to the one
//! connection that owns the addressed device. Device-side connections may
//! additionally snoop each other's traffic.

mod connection;
mod flow;
mod registry;
mod snoop;

pub use self::flow::FlowController;
pub use self::registry::{BlobPolicyMap, ConnId, Role};
pub use self::snoop::SnoopTable;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{BlobPolicy, Error, PropertyKind, Result, RouterConfig, Timestamp};
use crate::property::{BlobData, ElementUpdate};
use crate::protocol::Message;

use self::connection::Event;
use self::registry::{ConnectionEntry, Registry};

/// The message hub connecting clients to devices
pub struct Router {
    config: RouterConfig,
    next_id: Arc<AtomicU64>,
    events_tx: mpsc::Sender<Event>,
    events_rx: Option<mpsc::Receiver<Event>>,
}

impl Router {
    /// Creates a router; no traffic flows until [`Router::run`] or
    /// [`Router::serve`] is awaited
    pub fn new(config: RouterConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        Router {
            config,
            next_id: Arc::new(AtomicU64::new(1)),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Attaches a client-side stream, typically an accepted TCP socket
    pub async fn attach_client<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.attach(stream, Role::Client).await
    }

    /// Attaches a device-side stream, typically the far end of a driver's
    /// pipe or socket
    pub async fn attach_device<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.attach(stream, Role::Device).await
    }

    async fn attach<S>(&self, stream: S, role: Role) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.channel_capacity);
        // Queue the registration ahead of anything the reader produces
        self.events_tx
            .send(Event::Attached {
                id,
                role,
                outbound: outbound_tx,
            })
            .await
            .map_err(|_| Error::network("router event loop has stopped"))?;
        connection::spawn(
            id,
            stream,
            self.config.max_fragment_size,
            outbound_rx,
            self.events_tx.clone(),
        );
        Ok(())
    }

    /// Runs the routing event loop over already-attached connections
    pub async fn run(&mut self) -> Result<()> {
        let mut events_rx = self
            .events_rx
            .take()
            .ok_or_else(|| Error::invalid_state("router is already running"))?;
        let mut core = RouterCore::new(self.config.clone());
        while let Some(event) = events_rx.recv().await {
            core.handle(event);
        }
        Ok(())
    }

    /// Binds the configured TCP address, accepts clients, and routes until
    /// aborted
    pub async fn serve(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            Error::network(format!("failed to bind {}: {}", self.config.bind_addr, e))
        })?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::network(format!("failed to read local address: {}", e)))?;
        info!(addr = %local, "accepting client connections");

        let events_tx = self.events_tx.clone();
        let next_id = self.next_id.clone();
        let max_fragment_size = self.config.max_fragment_size;
        let capacity = self.config.channel_capacity;
        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client connected");
                        let id = ConnId(next_id.fetch_add(1, Ordering::Relaxed));
                        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
                        if events_tx
                            .send(Event::Attached {
                                id,
                                role: Role::Client,
                                outbound: outbound_tx,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                        connection::spawn(
                            id,
                            stream,
                            max_fragment_size,
                            outbound_rx,
                            events_tx.clone(),
                        );
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        });

        let outcome = self.run().await;
        accept.abort();
        outcome
    }
}

/// Routing state owned by the event loop
struct RouterCore {
    config: RouterConfig,
    registry: Registry,
    snoop: SnoopTable,
}

impl RouterCore {
    fn new(config: RouterConfig) -> Self {
        RouterCore {
            config,
            registry: Registry::new(),
            snoop: SnoopTable::new(),
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Attached { id, role, outbound } => {
                self.registry.insert(
                    id,
                    ConnectionEntry {
                        role,
                        outbound,
                        blob_policy: BlobPolicyMap::default(),
                        flow: FlowController::new(self.config.max_inflight_blobs),
                    },
                );
            }
            Event::Inbound { id, message } => self.route(id, message),
            Event::Closed { id } => self.detach(id),
        }
    }

    fn route(&mut self, from: ConnId, message: Message) {
        let role = match self.registry.get(from) {
            Some(entry) => entry.role,
            None => return,
        };
        match role {
            Role::Device => self.route_from_device(from, &message),
            Role::Client => self.route_from_client(from, &message),
        }
    }

    fn route_from_device(&mut self, from: ConnId, message: &Message) {
        match message {
            Message::Def { property, .. } => {
                self.registry.claim_device(&property.device, from);
                self.broadcast(from, &property.device, Some(&property.name), message);
            }
            Message::Set(update) => {
                self.registry.claim_device(&update.device, from);
                self.broadcast(from, &update.device, Some(&update.name), message);
            }
            Message::DelProperty {
                device: Some(device),
                name,
                ..
            } => {
                self.registry.claim_device(device, from);
                self.broadcast(from, device, name.as_deref(), message);
            }
            Message::DelProperty { device: None, .. } => {
                warn!(conn = from.0, "discarding delProperty without a device");
            }
            Message::Note {
                device: Some(device),
                ..
            } => {
                self.broadcast(from, device, None, message);
            }
            Message::Note { device: None, .. } => {
                for id in self.registry.with_role(Role::Client) {
                    self.send_to(id, message.clone());
                }
            }
            // A device connection asking about another device is snooping
            Message::GetProperties {
                device: Some(device),
                name,
                ..
            } => {
                self.snoop.watch(from, device, name.as_deref());
                if let Some(owner) = self.registry.owner_of(device) {
                    if owner != from {
                        self.send_to(owner, message.clone());
                    }
                }
            }
            Message::GetProperties { device: None, .. } => {
                warn!(conn = from.0, "discarding unscoped discovery from a device");
            }
            Message::New(request) => self.route_request(from, &request.device, message),
            Message::EnableBlob {
                device,
                name,
                policy,
            } => {
                if let Some(entry) = self.registry.get_mut(from) {
                    entry.blob_policy.set(device, name.as_deref(), *policy);
                }
            }
            Message::PingRequest { uid } => {
                let reply = Message::PingReply { uid: uid.clone() };
                self.send_to(from, reply);
            }
            Message::PingReply { uid } => {
                if let Some(entry) = self.registry.get_mut(from) {
                    entry.flow.acknowledge(uid);
                }
            }
        }
    }

    fn route_from_client(&mut self, from: ConnId, message: &Message) {
        match message {
            Message::GetProperties { device, .. } => {
                match device.as_deref().and_then(|d| self.registry.owner_of(d)) {
                    Some(owner) => self.send_to(owner, message.clone()),
                    // Unscoped, or the device has not announced itself yet:
                    // every device connection gets to answer
                    None => {
                        for id in self.registry.with_role(Role::Device) {
                            self.send_to(id, message.clone());
                        }
                    }
                }
            }
            Message::New(request) => self.route_request(from, &request.device, message),
            Message::EnableBlob {
                device,
                name,
                policy,
            } => {
                if let Some(entry) = self.registry.get_mut(from) {
                    entry.blob_policy.set(device, name.as_deref(), *policy);
                }
            }
            Message::PingRequest { uid } => {
                let reply = Message::PingReply { uid: uid.clone() };
                self.send_to(from, reply);
            }
            Message::PingReply { uid } => {
                if let Some(entry) = self.registry.get_mut(from) {
                    entry.flow.acknowledge(uid);
                }
            }
            other => {
                warn!(
                    conn = from.0,
                    ?other,
                    "discarding device-family message from a client"
                );
            }
        }
    }

    /// Forwards a mutation request to the connection owning the device
    fn route_request(&mut self, from: ConnId, device: &str, message: &Message) {
        match self.registry.owner_of(device) {
            Some(owner) if owner != from => self.send_to(owner, message.clone()),
            Some(_) => warn!(
                conn = from.0,
                device, "discarding request addressed to its own sender"
            ),
            None => warn!(conn = from.0, device, "discarding request for unknown device"),
        }
    }

    /// Fans a device-originated message out to every client plus any
    /// snooping device connections
    fn broadcast(&mut self, from: ConnId, device: &str, name: Option<&str>, message: &Message) {
        let mut recipients = self.registry.with_role(Role::Client);
        for watcher in self.snoop.watchers(device, name) {
            if !recipients.contains(&watcher) {
                recipients.push(watcher);
            }
        }

        let is_blob_update =
            matches!(message, Message::Set(update) if update.kind == PropertyKind::Blob);
        for to in recipients {
            if to == from {
                continue;
            }
            if is_blob_update {
                self.forward_blob(to, device, name.unwrap_or_default(), message);
            } else {
                // Under an Only directive a connection wants nothing from
                // this device but its BLOB updates
                let suppressed = self
                    .registry
                    .get(to)
                    .is_some_and(|entry| entry.blob_policy.only_for(device));
                if !suppressed {
                    self.send_to(to, message.clone());
                }
            }
        }
    }

    /// Applies the per-connection BLOB policy; attached fast-path payloads
    /// are additionally subject to the flow window and chased with a ping
    /// probe
    fn forward_blob(&mut self, to: ConnId, device: &str, name: &str, message: &Message) {
        let entry = match self.registry.get_mut(to) {
            Some(entry) => entry,
            None => return,
        };
        if entry.blob_policy.resolve(device, name) == BlobPolicy::Never {
            return;
        }
        // Inline payloads are ordinary traffic; only attached handles are
        // window-limited
        if !carries_attached_payload(message) {
            self.send_to(to, message.clone());
            return;
        }
        if !entry.flow.ready() {
            warn!(
                conn = to.0,
                device, "peer saturated; shedding attached BLOB update"
            );
            return;
        }
        let probe = entry.flow.probe();
        self.send_to(to, message.clone());
        self.send_to(to, probe);
    }

    fn send_to(&mut self, to: ConnId, message: Message) {
        if let Some(entry) = self.registry.get(to) {
            // Never let one slow connection stall the loop
            if entry.outbound.try_send(message).is_err() {
                warn!(conn = to.0, "outbound queue unavailable; dropping message");
            }
        }
    }

    /// Tears down a connection; devices it owned are withdrawn from every
    /// client as if each had sent a device-scoped delProperty
    fn detach(&mut self, id: ConnId) {
        self.snoop.forget(id);
        let orphaned = self.registry.remove(id);
        for device in orphaned {
            info!(conn = id.0, device = device.as_str(), "device withdrawn");
            let notice = Message::DelProperty {
                device: Some(device.clone()),
                name: None,
                timestamp: Some(Timestamp::now()),
                message: Some(format!("{} disconnected", device)),
            };
            self.broadcast(id, &device, None, &notice);
        }
    }
}

fn carries_attached_payload(message: &Message) -> bool {
    match message {
        Message::Set(update) => update.changes.iter().any(|change| {
            matches!(
                change,
                ElementUpdate::Blob { blob, .. }
                    if matches!(blob.data, BlobData::Attached(_))
            )
        }),
        _ => false,
    }
}
