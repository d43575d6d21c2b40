use std::collections::HashMap;

use tracing::warn;

use crate::core::{Error, PropertyKind, PropertyState, Result, Timestamp};
use crate::property::{apply_switch_changes, ElementUpdate, Elements, Property};
use crate::protocol::message::{Message, NewVector, UpdateVector};

/// Actions produced by the store in response to an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction {
    /// A message the caller must transmit
    Send(Message),
    /// A validated mutation request awaiting the driver's decision
    Request(NewVector),
}

/// Device-side synchronization engine: the authoritative store of one or
/// more devices' properties.
///
/// The store never applies a client request by itself. Valid new* requests
/// are surfaced as [`DeviceAction::Request`]; the driver runs the operation
/// and reports the outcome with [`DeviceStore::update`].
#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: HashMap<String, HashMap<String, Property>>,
}

impl DeviceStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a property and returns the definition to announce.
    /// Redefining replaces the prior definition.
    pub fn define(&mut self, mut property: Property, message: Option<String>) -> Result<Message> {
        property.validate_define()?;
        if property.timestamp.is_none() {
            property.timestamp = Some(Timestamp::now());
        }
        self.devices
            .entry(property.device.clone())
            .or_default()
            .insert(property.name.clone(), property.clone());
        Ok(Message::Def { property, message })
    }

    /// Applies a local change and returns the update to publish. Only the
    /// listed elements are sent; clients merge them by name.
    pub fn update(
        &mut self,
        device: &str,
        name: &str,
        changes: Vec<ElementUpdate>,
        state: Option<PropertyState>,
        message: Option<String>,
    ) -> Result<Message> {
        let property = self.entry_mut(device, name)?;
        let timestamp = Timestamp::now();
        property.apply_update(&changes, state, None, Some(timestamp))?;
        Ok(Message::Set(UpdateVector {
            kind: property.elements.kind(),
            device: device.to_string(),
            name: name.to_string(),
            state,
            timeout: None,
            timestamp: Some(timestamp),
            message,
            changes,
        }))
    }

    /// Withdraws one property, or every property of a device, and returns
    /// the notice to publish
    pub fn delete(
        &mut self,
        device: &str,
        name: Option<&str>,
        message: Option<String>,
    ) -> Result<Message> {
        let props = self
            .devices
            .get_mut(device)
            .ok_or_else(|| Error::unknown_device(device.to_string()))?;
        match name {
            Some(name) => {
                props
                    .remove(name)
                    .ok_or_else(|| Error::unknown_property(format!("{}.{}", device, name)))?;
                if props.is_empty() {
                    self.devices.remove(device);
                }
            }
            None => {
                self.devices.remove(device);
            }
        }
        Ok(Message::DelProperty {
            device: Some(device.to_string()),
            name: name.map(String::from),
            timestamp: Some(Timestamp::now()),
            message,
        })
    }

    /// Handles one inbound message, returning the resulting actions in order
    pub fn handle(&mut self, message: &Message) -> Vec<DeviceAction> {
        match message {
            Message::GetProperties { device, name, .. } => {
                self.handle_discovery(device.as_deref(), name.as_deref())
            }
            Message::New(request) => self.handle_request(request),
            Message::PingRequest { uid } => {
                vec![DeviceAction::Send(Message::PingReply { uid: uid.clone() })]
            }
            Message::PingReply { .. } => Vec::new(),
            other => {
                warn!(?other, "device ignoring client-bound message");
                Vec::new()
            }
        }
    }

    fn handle_discovery(&self, device: Option<&str>, name: Option<&str>) -> Vec<DeviceAction> {
        let mut actions = Vec::new();
        for (owner, props) in &self.devices {
            if device.is_some_and(|d| d != owner) {
                continue;
            }
            for property in props.values() {
                if name.is_some_and(|n| n != property.name) {
                    continue;
                }
                actions.push(DeviceAction::Send(Message::Def {
                    property: property.clone(),
                    message: None,
                }));
            }
        }
        actions
    }

    fn handle_request(&self, request: &NewVector) -> Vec<DeviceAction> {
        // There is no NACK in the protocol; malformed requests are dropped
        if let Err(e) = self.validate_request(request) {
            warn!(
                device = request.device.as_str(),
                property = request.name.as_str(),
                error = %e,
                "rejecting mutation request"
            );
            return Vec::new();
        }
        vec![DeviceAction::Request(request.clone())]
    }

    fn validate_request(&self, request: &NewVector) -> Result<()> {
        let property = self
            .devices
            .get(&request.device)
            .ok_or_else(|| Error::unknown_device(request.device.clone()))?
            .get(&request.name)
            .ok_or_else(|| {
                Error::unknown_property(format!("{}.{}", request.device, request.name))
            })?;

        if property.elements.kind() != request.kind {
            return Err(Error::invalid_state(format!(
                "property '{}' is not a {} vector",
                request.name, request.kind
            )));
        }
        let names = property.elements.names();
        for change in &request.changes {
            if !names.iter().any(|n| *n == change.name()) {
                return Err(Error::unknown_element(format!(
                    "no element '{}' on property '{}'",
                    change.name(),
                    request.name
                )));
            }
        }
        match request.kind {
            // Number and Text requests name every element of the vector
            PropertyKind::Number | PropertyKind::Text => {
                if request.changes.len() != names.len() {
                    return Err(Error::invalid_state(format!(
                        "request for '{}' names {} of {} elements",
                        request.name,
                        request.changes.len(),
                        names.len()
                    )));
                }
            }
            PropertyKind::Switch => {
                let rule = property
                    .rule
                    .ok_or_else(|| Error::invalid_spec("switch vector without a rule"))?;
                if let Elements::Switch(members) = &property.elements {
                    let mut scratch = members.clone();
                    apply_switch_changes(rule, &mut scratch, &request.changes, &request.name)?;
                }
            }
            PropertyKind::Blob => {}
            // Lights are read-only; no new* family exists for them
            PropertyKind::Light => {
                return Err(Error::invalid_state("light vectors cannot be mutated"));
            }
        }
        Ok(())
    }

    /// Applies a validated request verbatim and returns the confirming
    /// update. Convenience for drivers whose operation is the value change
    /// itself.
    pub fn accept(
        &mut self,
        request: &NewVector,
        state: PropertyState,
        message: Option<String>,
    ) -> Result<Message> {
        self.update(
            &request.device,
            &request.name,
            request.changes.clone(),
            Some(state),
            message,
        )
    }

    /// Looks up a stored property
    pub fn property(&self, device: &str, name: &str) -> Option<&Property> {
        self.devices.get(device).and_then(|props| props.get(name))
    }

    /// Registered device names
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    fn entry_mut(&mut self, device: &str, name: &str) -> Result<&mut Property> {
        self.devices
            .get_mut(device)
            .ok_or_else(|| Error::unknown_device(device.to_string()))?
            .get_mut(name)
            .ok_or_else(|| Error::unknown_property(format!("{}.{}", device, name)))
    }
}
