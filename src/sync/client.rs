use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::{BlobPolicy, Error, PropertyKind, PropertyState, Result, SwitchState};
use crate::property::{apply_switch_changes, Blob, ElementUpdate, Elements, Property};
use crate::protocol::message::{Message, NewVector};
use crate::protocol::state::{PropertySync, SetDisposition, SyncPhase};

/// A cached property plus its synchronization phase
#[derive(Debug, Clone)]
pub struct CachedProperty {
    pub property: Property,
    sync: PropertySync,
}

impl CachedProperty {
    /// Current synchronization phase
    pub fn phase(&self) -> SyncPhase {
        self.sync.phase()
    }
}

/// Events surfaced to the application after handling an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A property was defined or redefined
    Defined { device: String, name: String },
    /// A cached property merged an update
    Updated { device: String, name: String },
    /// A cached property was withdrawn
    Deleted { device: String, name: String },
    /// Free-form commentary from a device
    Notice {
        device: Option<String>,
        text: String,
    },
    /// A message the caller must transmit back to its peer
    Outbound(Message),
}

/// Client-side synchronization engine: a read-only cache of device-owned
/// properties, kept convergent by the message flow.
///
/// The cache holds provisional copies; only a device-originated update is
/// authoritative. Mutations are requested with the `new_*` builders, which
/// optimistically mark the property Busy until the confirming set* arrives.
#[derive(Debug, Default)]
pub struct ClientCache {
    devices: HashMap<String, HashMap<String, CachedProperty>>,
}

impl ClientCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one inbound message, returning the resulting events in order
    pub fn handle(&mut self, message: &Message) -> Vec<ClientEvent> {
        match message {
            Message::Def { property, .. } => self.handle_define(property),
            Message::Set(update) => self.handle_set(update),
            Message::DelProperty { device, name, .. } => {
                self.handle_delete(device.as_deref(), name.as_deref())
            }
            Message::Note { device, text, .. } => vec![ClientEvent::Notice {
                device: device.clone(),
                text: text.clone(),
            }],
            // Reply only once preceding BLOB work is complete; handling is
            // synchronous, so everything received before the ping has been
            // fully processed by now
            Message::PingRequest { uid } => vec![ClientEvent::Outbound(Message::PingReply {
                uid: uid.clone(),
            })],
            Message::PingReply { .. } => Vec::new(),
            other => {
                debug!(?other, "client ignoring device-bound message");
                Vec::new()
            }
        }
    }

    fn handle_define(&mut self, property: &Property) -> Vec<ClientEvent> {
        if let Err(e) = property.validate_define() {
            warn!(
                device = property.device.as_str(),
                property = property.name.as_str(),
                error = %e,
                "rejecting invalid definition"
            );
            return Vec::new();
        }

        let entry = self
            .devices
            .entry(property.device.clone())
            .or_default()
            .entry(property.name.clone())
            .or_insert_with(|| CachedProperty {
                property: property.clone(),
                sync: PropertySync::new(),
            });
        entry.property = property.clone();
        entry.sync.on_define();

        vec![ClientEvent::Defined {
            device: property.device.clone(),
            name: property.name.clone(),
        }]
    }

    fn handle_set(&mut self, update: &crate::protocol::message::UpdateVector) -> Vec<ClientEvent> {
        let entry = match self
            .devices
            .get_mut(&update.device)
            .and_then(|props| props.get_mut(&update.name))
        {
            Some(entry) => entry,
            None => {
                // A property never defined cannot be materialized from an
                // update alone
                warn!(
                    device = update.device.as_str(),
                    property = update.name.as_str(),
                    "ignoring update for undefined property"
                );
                return Vec::new();
            }
        };

        if entry.sync.on_set() == SetDisposition::Ignore {
            return Vec::new();
        }

        if let Err(e) = entry.property.apply_update(
            &update.changes,
            update.state,
            update.timeout,
            update.timestamp,
        ) {
            // No NACK exists; the cache simply keeps its prior state
            warn!(
                device = update.device.as_str(),
                property = update.name.as_str(),
                error = %e,
                "update could not be applied"
            );
            return Vec::new();
        }

        vec![ClientEvent::Updated {
            device: update.device.clone(),
            name: update.name.clone(),
        }]
    }

    fn handle_delete(&mut self, device: Option<&str>, name: Option<&str>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        match (device, name) {
            (Some(device), Some(name)) => {
                if let Some(props) = self.devices.get_mut(device) {
                    if let Some(mut entry) = props.remove(name) {
                        entry.sync.on_delete();
                        events.push(ClientEvent::Deleted {
                            device: device.to_string(),
                            name: name.to_string(),
                        });
                    }
                }
            }
            (Some(device), None) => {
                if let Some(props) = self.devices.remove(device) {
                    for name in props.into_keys() {
                        events.push(ClientEvent::Deleted {
                            device: device.to_string(),
                            name,
                        });
                    }
                }
            }
            // Neither identifier: the whole cache for this connection
            (None, _) => {
                for (device, props) in std::mem::take(&mut self.devices) {
                    for name in props.into_keys() {
                        events.push(ClientEvent::Deleted {
                            device: device.clone(),
                            name,
                        });
                    }
                }
            }
        }
        events
    }

    /// Builds a discovery request; absent filters mean "everything"
    pub fn get_properties(device: Option<&str>, name: Option<&str>) -> Message {
        Message::GetProperties {
            version: Some(crate::core::PROTOCOL_VERSION.to_string()),
            device: device.map(String::from),
            name: name.map(String::from),
        }
    }

    /// Builds a BLOB policy directive for the router
    pub fn enable_blob(device: &str, name: Option<&str>, policy: BlobPolicy) -> Message {
        Message::EnableBlob {
            device: device.to_string(),
            name: name.map(String::from),
            policy,
        }
    }

    /// Builds a Number mutation request. Every element of the vector is
    /// included: values not listed are filled from the cache. The cached
    /// property is optimistically marked Busy.
    pub fn new_number(
        &mut self,
        device: &str,
        name: &str,
        values: &[(&str, f64)],
        now: Instant,
    ) -> Result<Message> {
        let entry = self.entry_mut(device, name)?;
        let members = match &entry.property.elements {
            Elements::Number(members) => members,
            _ => return Err(wrong_kind(name, PropertyKind::Number)),
        };

        for (element, _) in values {
            if !members.iter().any(|m| &m.name == element) {
                return Err(Error::unknown_element(format!(
                    "no element '{}' on property '{}'",
                    element, name
                )));
            }
        }
        let changes = members
            .iter()
            .map(|m| ElementUpdate::Number {
                name: m.name.clone(),
                value: values
                    .iter()
                    .find(|(element, _)| element == &m.name)
                    .map(|(_, v)| *v)
                    .unwrap_or(m.value),
            })
            .collect();

        Self::mark_pending(entry, now, name)?;
        Ok(Message::New(NewVector {
            kind: PropertyKind::Number,
            device: device.to_string(),
            name: name.to_string(),
            timestamp: None,
            changes,
        }))
    }

    /// Builds a Text mutation request; like numbers, the full vector is sent
    pub fn new_text(
        &mut self,
        device: &str,
        name: &str,
        values: &[(&str, &str)],
        now: Instant,
    ) -> Result<Message> {
        let entry = self.entry_mut(device, name)?;
        let members = match &entry.property.elements {
            Elements::Text(members) => members,
            _ => return Err(wrong_kind(name, PropertyKind::Text)),
        };

        for (element, _) in values {
            if !members.iter().any(|m| &m.name == element) {
                return Err(Error::unknown_element(format!(
                    "no element '{}' on property '{}'",
                    element, name
                )));
            }
        }
        let changes = members
            .iter()
            .map(|m| ElementUpdate::Text {
                name: m.name.clone(),
                value: values
                    .iter()
                    .find(|(element, _)| element == &m.name)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| m.value.clone()),
            })
            .collect();

        Self::mark_pending(entry, now, name)?;
        Ok(Message::New(NewVector {
            kind: PropertyKind::Text,
            device: device.to_string(),
            name: name.to_string(),
            timestamp: None,
            changes,
        }))
    }

    /// Builds a Switch mutation request carrying only the changed elements.
    /// The declared rule is enforced locally before anything is sent; a
    /// request that would strand a OneOfMany vector all-Off is refused.
    pub fn new_switch(
        &mut self,
        device: &str,
        name: &str,
        states: &[(&str, SwitchState)],
        now: Instant,
    ) -> Result<Message> {
        let entry = self.entry_mut(device, name)?;
        let (members, rule) = match (&entry.property.elements, entry.property.rule) {
            (Elements::Switch(members), Some(rule)) => (members, rule),
            _ => return Err(wrong_kind(name, PropertyKind::Switch)),
        };

        let changes: Vec<ElementUpdate> = states
            .iter()
            .map(|(element, state)| ElementUpdate::Switch {
                name: element.to_string(),
                state: *state,
            })
            .collect();

        // The same coupling the device will apply, run against a scratch
        // copy to validate the request
        let mut scratch = members.clone();
        apply_switch_changes(rule, &mut scratch, &changes, name)?;

        Self::mark_pending(entry, now, name)?;
        Ok(Message::New(NewVector {
            kind: PropertyKind::Switch,
            device: device.to_string(),
            name: name.to_string(),
            timestamp: None,
            changes,
        }))
    }

    /// Builds a BLOB mutation request (client-to-device upload)
    pub fn new_blob(
        &mut self,
        device: &str,
        name: &str,
        blobs: Vec<(&str, Blob)>,
        now: Instant,
    ) -> Result<Message> {
        let entry = self.entry_mut(device, name)?;
        let members = match &entry.property.elements {
            Elements::Blob(members) => members,
            _ => return Err(wrong_kind(name, PropertyKind::Blob)),
        };
        for (element, _) in &blobs {
            if !members.iter().any(|m| &m.name == element) {
                return Err(Error::unknown_element(format!(
                    "no element '{}' on property '{}'",
                    element, name
                )));
            }
        }
        let changes = blobs
            .into_iter()
            .map(|(element, blob)| ElementUpdate::Blob {
                name: element.to_string(),
                blob,
            })
            .collect();

        Self::mark_pending(entry, now, name)?;
        Ok(Message::New(NewVector {
            kind: PropertyKind::Blob,
            device: device.to_string(),
            name: name.to_string(),
            timestamp: None,
            changes,
        }))
    }

    fn mark_pending(entry: &mut CachedProperty, now: Instant, name: &str) -> Result<()> {
        if !entry.sync.on_new_sent(now) {
            return Err(Error::invalid_state(format!(
                "property '{}' has no live definition",
                name
            )));
        }
        entry.property.state = PropertyState::Busy;
        Ok(())
    }

    fn entry_mut(&mut self, device: &str, name: &str) -> Result<&mut CachedProperty> {
        self.devices
            .get_mut(device)
            .ok_or_else(|| Error::unknown_device(device.to_string()))?
            .get_mut(name)
            .ok_or_else(|| Error::unknown_property(format!("{}.{}", device, name)))
    }

    /// Looks up a cached property
    pub fn property(&self, device: &str, name: &str) -> Option<&Property> {
        self.devices
            .get(device)
            .and_then(|props| props.get(name))
            .map(|entry| &entry.property)
    }

    /// Looks up a property's synchronization phase
    pub fn phase(&self, device: &str, name: &str) -> Option<SyncPhase> {
        self.devices
            .get(device)
            .and_then(|props| props.get(name))
            .map(|entry| entry.sync.phase())
    }

    /// Known device names
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Cached properties of one device
    pub fn properties(&self, device: &str) -> impl Iterator<Item = &Property> {
        self.devices
            .get(device)
            .into_iter()
            .flat_map(|props| props.values())
            .map(|entry| &entry.property)
    }

    /// Advisory check: has a pending change outlived the property's declared
    /// timeout? The engine never acts on this by itself.
    pub fn stalled(&self, device: &str, name: &str, now: Instant) -> bool {
        self.devices
            .get(device)
            .and_then(|props| props.get(name))
            .map(|entry| entry.sync.is_stalled(entry.property.timeout, now))
            .unwrap_or(false)
    }
}

fn wrong_kind(name: &str, wanted: PropertyKind) -> Error {
    Error::invalid_state(format!("property '{}' is not a {} vector", name, wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Permission, SwitchRule};
    use crate::property::{NumberElement, SwitchElement};
    use crate::protocol::message::UpdateVector;

    fn def_exposure() -> Message {
        Message::Def {
            property: Property {
                device: "CCD Simulator".into(),
                name: "CCD_EXPOSURE".into(),
                label: "Expose".into(),
                group: "Main Control".into(),
                state: PropertyState::Idle,
                perm: Some(Permission::ReadWrite),
                timeout: Some(10.0),
                rule: None,
                timestamp: None,
                elements: Elements::Number(vec![NumberElement {
                    name: "CCD_EXPOSURE_VALUE".into(),
                    label: "Duration (s)".into(),
                    format: "%5.2f".parse().unwrap(),
                    min: 0.0,
                    max: 36000.0,
                    step: 0.0,
                    value: 1.0,
                }]),
            },
            message: None,
        }
    }

    fn def_mount_type() -> Message {
        Message::Def {
            property: Property {
                device: "Telescope Simulator".into(),
                name: "MOUNT_TYPE".into(),
                label: "Mount type".into(),
                group: "Options".into(),
                state: PropertyState::Idle,
                perm: Some(Permission::ReadWrite),
                timeout: Some(60.0),
                rule: Some(SwitchRule::OneOfMany),
                timestamp: None,
                elements: Elements::Switch(vec![
                    SwitchElement {
                        name: "MOUNT_GEM".into(),
                        label: "GEM".into(),
                        state: SwitchState::On,
                    },
                    SwitchElement {
                        name: "MOUNT_SINGLE_ARM".into(),
                        label: "Single arm".into(),
                        state: SwitchState::Off,
                    },
                ]),
            },
            message: None,
        }
    }

    fn set_exposure(value: f64, state: PropertyState) -> Message {
        Message::Set(UpdateVector {
            kind: PropertyKind::Number,
            device: "CCD Simulator".into(),
            name: "CCD_EXPOSURE".into(),
            state: Some(state),
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![ElementUpdate::Number {
                name: "CCD_EXPOSURE_VALUE".into(),
                value,
            }],
        })
    }

    #[test]
    fn test_define_populates_cache() {
        let mut cache = ClientCache::new();
        let events = cache.handle(&def_exposure());
        assert_eq!(
            events,
            vec![ClientEvent::Defined {
                device: "CCD Simulator".into(),
                name: "CCD_EXPOSURE".into(),
            }]
        );
        assert_eq!(
            cache.phase("CCD Simulator", "CCD_EXPOSURE"),
            Some(SyncPhase::Defined)
        );
    }

    #[test]
    fn test_redefine_identical_is_idempotent() {
        let mut cache = ClientCache::new();
        cache.handle(&def_exposure());
        let before = cache.property("CCD Simulator", "CCD_EXPOSURE").cloned();
        cache.handle(&def_exposure());
        assert_eq!(
            cache.property("CCD Simulator", "CCD_EXPOSURE").cloned(),
            before
        );
        assert_eq!(
            cache.phase("CCD Simulator", "CCD_EXPOSURE"),
            Some(SyncPhase::Defined)
        );
    }

    #[test]
    fn test_orphan_update_ignored() {
        let mut cache = ClientCache::new();
        cache.handle(&def_exposure());
        let orphan = Message::Set(UpdateVector {
            kind: PropertyKind::Number,
            device: "CCD Simulator".into(),
            name: "NEVER_DEFINED".into(),
            state: None,
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![],
        });
        assert!(cache.handle(&orphan).is_empty());
        // Other registry state is untouched
        assert!(cache.property("CCD Simulator", "CCD_EXPOSURE").is_some());
    }

    #[test]
    fn test_optimistic_busy_then_confirmation() {
        let mut cache = ClientCache::new();
        cache.handle(&def_exposure());

        let request = cache
            .new_number(
                "CCD Simulator",
                "CCD_EXPOSURE",
                &[("CCD_EXPOSURE_VALUE", 5.0)],
                Instant::now(),
            )
            .unwrap();

        // Immediate local effect: Busy, pending
        let prop = cache.property("CCD Simulator", "CCD_EXPOSURE").unwrap();
        assert_eq!(prop.state, PropertyState::Busy);
        assert!(matches!(
            cache.phase("CCD Simulator", "CCD_EXPOSURE"),
            Some(SyncPhase::PendingChange { .. })
        ));

        // The request carries every element of the vector
        if let Message::New(request) = &request {
            assert_eq!(request.changes.len(), 1);
            assert_eq!(
                request.changes[0],
                ElementUpdate::Number {
                    name: "CCD_EXPOSURE_VALUE".into(),
                    value: 5.0,
                }
            );
        } else {
            panic!("expected a new* message");
        }

        // Device confirms
        let events = cache.handle(&set_exposure(0.0, PropertyState::Ok));
        assert_eq!(events.len(), 1);
        let prop = cache.property("CCD Simulator", "CCD_EXPOSURE").unwrap();
        assert_eq!(prop.number("CCD_EXPOSURE_VALUE"), Some(0.0));
        assert_eq!(prop.state, PropertyState::Ok);
        assert_eq!(
            cache.phase("CCD Simulator", "CCD_EXPOSURE"),
            Some(SyncPhase::Defined)
        );
    }

    #[test]
    fn test_new_number_fills_unlisted_elements() {
        let mut cache = ClientCache::new();
        let mut def = def_exposure();
        if let Message::Def { property, .. } = &mut def {
            if let Elements::Number(members) = &mut property.elements {
                let mut extra = members[0].clone();
                extra.name = "CCD_GAIN".into();
                extra.value = 50.0;
                members.push(extra);
            }
        }
        cache.handle(&def);

        let request = cache
            .new_number(
                "CCD Simulator",
                "CCD_EXPOSURE",
                &[("CCD_EXPOSURE_VALUE", 2.0)],
                Instant::now(),
            )
            .unwrap();
        if let Message::New(request) = request {
            assert_eq!(request.changes.len(), 2);
            assert!(request.changes.contains(&ElementUpdate::Number {
                name: "CCD_GAIN".into(),
                value: 50.0,
            }));
        } else {
            panic!("expected a new* message");
        }
    }

    #[test]
    fn test_switch_coupling_from_device_update() {
        let mut cache = ClientCache::new();
        cache.handle(&def_mount_type());

        let update = Message::Set(UpdateVector {
            kind: PropertyKind::Switch,
            device: "Telescope Simulator".into(),
            name: "MOUNT_TYPE".into(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![ElementUpdate::Switch {
                name: "MOUNT_SINGLE_ARM".into(),
                state: SwitchState::On,
            }],
        });
        cache.handle(&update);

        let prop = cache.property("Telescope Simulator", "MOUNT_TYPE").unwrap();
        assert_eq!(prop.switch("MOUNT_GEM"), Some(SwitchState::Off));
        assert_eq!(prop.switch("MOUNT_SINGLE_ARM"), Some(SwitchState::On));
        assert_eq!(prop.state, PropertyState::Ok);
    }

    #[test]
    fn test_new_switch_refuses_all_off_one_of_many() {
        let mut cache = ClientCache::new();
        cache.handle(&def_mount_type());

        let err = cache.new_switch(
            "Telescope Simulator",
            "MOUNT_TYPE",
            &[("MOUNT_GEM", SwitchState::Off)],
            Instant::now(),
        );
        assert!(matches!(err, Err(Error::RuleViolation(_))));
        // Prior state unchanged, no optimistic Busy
        let prop = cache.property("Telescope Simulator", "MOUNT_TYPE").unwrap();
        assert_eq!(prop.switch("MOUNT_GEM"), Some(SwitchState::On));
        assert_eq!(prop.state, PropertyState::Idle);
    }

    #[test]
    fn test_delete_scopes() {
        let mut cache = ClientCache::new();
        cache.handle(&def_exposure());
        cache.handle(&def_mount_type());

        // Property scope
        let events = cache.handle(&Message::DelProperty {
            device: Some("CCD Simulator".into()),
            name: Some("CCD_EXPOSURE".into()),
            timestamp: None,
            message: None,
        });
        assert_eq!(events.len(), 1);
        assert!(cache.property("CCD Simulator", "CCD_EXPOSURE").is_none());
        assert!(cache.property("Telescope Simulator", "MOUNT_TYPE").is_some());

        // Registry scope
        let events = cache.handle(&Message::DelProperty {
            device: None,
            name: None,
            timestamp: None,
            message: None,
        });
        assert_eq!(events.len(), 1);
        assert!(cache.property("Telescope Simulator", "MOUNT_TYPE").is_none());
    }

    #[test]
    fn test_ping_request_answered() {
        let mut cache = ClientCache::new();
        let events = cache.handle(&Message::PingRequest { uid: "p1".into() });
        assert_eq!(
            events,
            vec![ClientEvent::Outbound(Message::PingReply { uid: "p1".into() })]
        );
    }

    #[test]
    fn test_stalled_query() {
        let mut cache = ClientCache::new();
        cache.handle(&def_exposure());
        let start = Instant::now();
        cache
            .new_number(
                "CCD Simulator",
                "CCD_EXPOSURE",
                &[("CCD_EXPOSURE_VALUE", 5.0)],
                start,
            )
            .unwrap();

        // Declared timeout is 10s
        assert!(!cache.stalled("CCD Simulator", "CCD_EXPOSURE", start));
        assert!(cache.stalled(
            "CCD Simulator",
            "CCD_EXPOSURE",
            start + std::time::Duration::from_secs(11)
        ));
    }
}
