//! Protocol message types and their wire-XML mapping.
//!
//! One variant per top-level wire family. Conversion to and from
//! [`XmlElement`] lives here; byte-level framing is the codec's job.

use std::collections::VecDeque;

use tracing::warn;

use crate::core::{BlobPolicy, Error, PropertyKind, PropertyState, Result, SwitchRule, Timestamp};
use crate::property::{
    parse_number, Blob, BlobData, BlobElement, BlobHandle, ElementUpdate, Elements, LightElement,
    NumberElement, Property, SwitchElement, TextElement,
};

use super::xml::XmlElement;

/// Payload of a set* message: vector-level attributes plus element changes
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateVector {
    /// Kind encoded in the tag name (setNumberVector, setTextVector, ...)
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    /// New whole-property state, when the device sends one
    pub state: Option<PropertyState>,
    /// Updated worst-case resolution time
    pub timeout: Option<f64>,
    pub timestamp: Option<Timestamp>,
    /// Commentary to show the user alongside the update
    pub message: Option<String>,
    /// Only changed elements need be present
    pub changes: Vec<ElementUpdate>,
}

/// Payload of a new* message: a client's mutation request
#[derive(Debug, Clone, PartialEq)]
pub struct NewVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub timestamp: Option<Timestamp>,
    /// For Number and Text vectors this must list every element
    pub changes: Vec<ElementUpdate>,
}

/// Protocol message types; any participant must be ready to receive any of
/// these at any time
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client (or snooping device) asks for definitions
    GetProperties {
        /// Protocol version the sender speaks
        version: Option<String>,
        /// Absent device means all devices
        device: Option<String>,
        /// Absent name means all properties
        name: Option<String>,
    },

    /// Device defines (or redefines) a property
    Def {
        property: Property,
        /// Commentary accompanying the definition
        message: Option<String>,
    },

    /// Device updates element values and/or property state
    Set(UpdateVector),

    /// Client requests a change
    New(NewVector),

    /// Device withdraws a property, a device, or everything it owns
    DelProperty {
        device: Option<String>,
        name: Option<String>,
        timestamp: Option<Timestamp>,
        message: Option<String>,
    },

    /// Free-form commentary from a device
    Note {
        device: Option<String>,
        timestamp: Option<Timestamp>,
        text: String,
    },

    /// Client opts in to (or out of) BLOB delivery
    EnableBlob {
        device: String,
        /// Scopes the policy to one property; absent means the whole device
        name: Option<String>,
        policy: BlobPolicy,
    },

    /// Fast-path backpressure probe
    PingRequest { uid: String },

    /// Acknowledges a ping once outstanding BLOB work is done
    PingReply { uid: String },
}

impl Message {
    /// Renders the message as a wire element. Attached BLOB payload handles
    /// are pushed to `out_attachments` for the transport to deliver
    /// out-of-band.
    pub fn to_xml(&self, out_attachments: &mut Vec<BlobHandle>) -> XmlElement {
        match self {
            Message::GetProperties {
                version,
                device,
                name,
            } => XmlElement::new("getProperties")
                .with_opt_attr("version", version.as_ref())
                .with_opt_attr("device", device.as_ref())
                .with_opt_attr("name", name.as_ref()),

            Message::Def { property, message } => def_to_xml(property, message.as_ref()),

            Message::Set(update) => {
                let tag = format!("set{}Vector", kind_tag(update.kind));
                let mut el = XmlElement::new(tag)
                    .with_attr("device", &update.device)
                    .with_attr("name", &update.name)
                    .with_opt_attr("state", update.state.as_ref())
                    .with_opt_attr("timeout", update.timeout)
                    .with_opt_attr("timestamp", update.timestamp.as_ref())
                    .with_opt_attr("message", update.message.as_ref());
                for change in &update.changes {
                    el = el.with_child(change_to_xml(change, out_attachments));
                }
                el
            }

            Message::New(request) => {
                let tag = format!("new{}Vector", kind_tag(request.kind));
                let mut el = XmlElement::new(tag)
                    .with_attr("device", &request.device)
                    .with_attr("name", &request.name)
                    .with_opt_attr("timestamp", request.timestamp.as_ref());
                for change in &request.changes {
                    el = el.with_child(change_to_xml(change, out_attachments));
                }
                el
            }

            Message::DelProperty {
                device,
                name,
                timestamp,
                message,
            } => XmlElement::new("delProperty")
                .with_opt_attr("device", device.as_ref())
                .with_opt_attr("name", name.as_ref())
                .with_opt_attr("timestamp", timestamp.as_ref())
                .with_opt_attr("message", message.as_ref()),

            Message::Note {
                device,
                timestamp,
                text,
            } => XmlElement::new("message")
                .with_opt_attr("device", device.as_ref())
                .with_opt_attr("timestamp", timestamp.as_ref())
                .with_attr("message", text),

            Message::EnableBlob {
                device,
                name,
                policy,
            } => XmlElement::new("enableBLOB")
                .with_attr("device", device)
                .with_opt_attr("name", name.as_ref())
                .with_text(policy.to_string()),

            Message::PingRequest { uid } => XmlElement::new("pingRequest").with_attr("uid", uid),
            Message::PingReply { uid } => XmlElement::new("pingReply").with_attr("uid", uid),
        }
    }

    /// Builds a message from a parsed wire element.
    ///
    /// Returns `Ok(None)` for well-formed elements the protocol does not
    /// recognize (skipped for forward compatibility); unrecognized
    /// *attributes* on known elements are ignored for the same reason.
    /// `attachments` supplies out-of-band payloads for `attached` BLOBs, in
    /// arrival order.
    pub fn from_xml(
        el: &XmlElement,
        attachments: &mut VecDeque<BlobHandle>,
    ) -> Result<Option<Message>> {
        let message = match el.name.as_str() {
            "getProperties" => Message::GetProperties {
                version: el.attr("version").map(String::from),
                device: el.attr("device").map(String::from),
                name: el.attr("name").map(String::from),
            },

            "defNumberVector" => def_from_xml(el, PropertyKind::Number)?,
            "defTextVector" => def_from_xml(el, PropertyKind::Text)?,
            "defSwitchVector" => def_from_xml(el, PropertyKind::Switch)?,
            "defLightVector" => def_from_xml(el, PropertyKind::Light)?,
            "defBLOBVector" => def_from_xml(el, PropertyKind::Blob)?,

            "setNumberVector" => set_from_xml(el, PropertyKind::Number, attachments)?,
            "setTextVector" => set_from_xml(el, PropertyKind::Text, attachments)?,
            "setSwitchVector" => set_from_xml(el, PropertyKind::Switch, attachments)?,
            "setLightVector" => set_from_xml(el, PropertyKind::Light, attachments)?,
            "setBLOBVector" => set_from_xml(el, PropertyKind::Blob, attachments)?,

            "newNumberVector" => new_from_xml(el, PropertyKind::Number, attachments)?,
            "newTextVector" => new_from_xml(el, PropertyKind::Text, attachments)?,
            "newSwitchVector" => new_from_xml(el, PropertyKind::Switch, attachments)?,
            "newBLOBVector" => new_from_xml(el, PropertyKind::Blob, attachments)?,

            "delProperty" => Message::DelProperty {
                device: el.attr("device").map(String::from),
                name: el.attr("name").map(String::from),
                timestamp: parse_opt_timestamp(el)?,
                message: el.attr("message").map(String::from),
            },

            "message" => Message::Note {
                device: el.attr("device").map(String::from),
                timestamp: parse_opt_timestamp(el)?,
                text: el.attr("message").unwrap_or_default().to_string(),
            },

            "enableBLOB" => Message::EnableBlob {
                device: el.require_attr("device")?.to_string(),
                name: el.attr("name").map(String::from),
                policy: el.text.parse()?,
            },

            "pingRequest" => Message::PingRequest {
                uid: el.require_attr("uid")?.to_string(),
            },
            "pingReply" => Message::PingReply {
                uid: el.require_attr("uid")?.to_string(),
            },

            other => {
                warn!(element = other, "skipping unrecognized wire element");
                return Ok(None);
            }
        };
        Ok(Some(message))
    }
}

fn kind_tag(kind: PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Number => "Number",
        PropertyKind::Text => "Text",
        PropertyKind::Switch => "Switch",
        PropertyKind::Light => "Light",
        PropertyKind::Blob => "BLOB",
    }
}

fn def_to_xml(property: &Property, message: Option<&String>) -> XmlElement {
    let tag = format!("def{}Vector", kind_tag(property.kind()));
    let mut el = XmlElement::new(tag)
        .with_attr("device", &property.device)
        .with_attr("name", &property.name)
        .with_attr("label", &property.label)
        .with_attr("group", &property.group)
        .with_attr("state", property.state)
        .with_opt_attr("perm", property.perm)
        .with_opt_attr("timeout", property.timeout)
        .with_opt_attr("rule", property.rule)
        .with_opt_attr("timestamp", property.timestamp.as_ref())
        .with_opt_attr("message", message);

    match &property.elements {
        Elements::Number(members) => {
            for m in members {
                el = el.with_child(
                    XmlElement::new("defNumber")
                        .with_attr("name", &m.name)
                        .with_attr("label", &m.label)
                        .with_attr("format", &m.format)
                        .with_attr("min", m.min)
                        .with_attr("max", m.max)
                        .with_attr("step", m.step)
                        .with_text(render_number(&m.format, m.value)),
                );
            }
        }
        Elements::Text(members) => {
            for m in members {
                el = el.with_child(
                    XmlElement::new("defText")
                        .with_attr("name", &m.name)
                        .with_attr("label", &m.label)
                        .with_text(&m.value),
                );
            }
        }
        Elements::Switch(members) => {
            for m in members {
                el = el.with_child(
                    XmlElement::new("defSwitch")
                        .with_attr("name", &m.name)
                        .with_attr("label", &m.label)
                        .with_text(m.state.to_string()),
                );
            }
        }
        Elements::Light(members) => {
            for m in members {
                el = el.with_child(
                    XmlElement::new("defLight")
                        .with_attr("name", &m.name)
                        .with_attr("label", &m.label)
                        .with_text(m.state.to_string()),
                );
            }
        }
        Elements::Blob(members) => {
            for m in members {
                el = el.with_child(
                    XmlElement::new("defBLOB")
                        .with_attr("name", &m.name)
                        .with_attr("label", &m.label),
                );
            }
        }
    }
    el
}

/// Sexagesimal formats render on the wire in sexagesimal; everything else
/// uses the shortest lossless rendering
fn render_number(format: &crate::property::NumberFormat, value: f64) -> String {
    if format.is_sexagesimal() {
        format.format(value)
    } else {
        format!("{}", value)
    }
}

fn def_from_xml(el: &XmlElement, kind: PropertyKind) -> Result<Message> {
    let device = el.require_attr("device")?.to_string();
    let name = el.require_attr("name")?.to_string();
    // A missing label defaults to the name
    let label = el.attr("label").unwrap_or(&name).to_string();

    let child_tag = format!("def{}", kind_tag(kind));
    let elements = match kind {
        PropertyKind::Number => {
            let mut members = Vec::new();
            for child in children(el, &child_tag) {
                let name = child.require_attr("name")?.to_string();
                members.push(NumberElement {
                    label: child.attr("label").unwrap_or(&name).to_string(),
                    format: child.require_attr("format")?.parse()?,
                    min: parse_number(child.require_attr("min")?)?,
                    max: parse_number(child.require_attr("max")?)?,
                    step: parse_number(child.require_attr("step")?)?,
                    value: parse_number(&child.text)?,
                    name,
                });
            }
            Elements::Number(members)
        }
        PropertyKind::Text => {
            let mut members = Vec::new();
            for child in children(el, &child_tag) {
                let name = child.require_attr("name")?.to_string();
                members.push(TextElement {
                    label: child.attr("label").unwrap_or(&name).to_string(),
                    value: child.text.clone(),
                    name,
                });
            }
            Elements::Text(members)
        }
        PropertyKind::Switch => {
            let mut members = Vec::new();
            for child in children(el, &child_tag) {
                let name = child.require_attr("name")?.to_string();
                members.push(SwitchElement {
                    label: child.attr("label").unwrap_or(&name).to_string(),
                    state: child.text.parse()?,
                    name,
                });
            }
            Elements::Switch(members)
        }
        PropertyKind::Light => {
            let mut members = Vec::new();
            for child in children(el, &child_tag) {
                let name = child.require_attr("name")?.to_string();
                members.push(LightElement {
                    label: child.attr("label").unwrap_or(&name).to_string(),
                    state: child.text.parse()?,
                    name,
                });
            }
            Elements::Light(members)
        }
        PropertyKind::Blob => {
            let mut members = Vec::new();
            for child in children(el, &child_tag) {
                let name = child.require_attr("name")?.to_string();
                members.push(BlobElement {
                    label: child.attr("label").unwrap_or(&name).to_string(),
                    blob: None,
                    name,
                });
            }
            Elements::Blob(members)
        }
    };

    let rule = match el.attr("rule") {
        Some(rule) => Some(rule.parse::<SwitchRule>()?),
        None => None,
    };
    let perm = match el.attr("perm") {
        Some(perm) => Some(perm.parse()?),
        None => None,
    };

    Ok(Message::Def {
        property: Property {
            device,
            name,
            label,
            group: el.attr("group").unwrap_or_default().to_string(),
            state: el.require_attr("state")?.parse()?,
            perm,
            timeout: parse_opt_timeout(el)?,
            rule,
            timestamp: parse_opt_timestamp(el)?,
            elements,
        },
        message: el.attr("message").map(String::from),
    })
}

fn set_from_xml(
    el: &XmlElement,
    kind: PropertyKind,
    attachments: &mut VecDeque<BlobHandle>,
) -> Result<Message> {
    let state = match el.attr("state") {
        Some(state) => Some(state.parse()?),
        None => None,
    };
    Ok(Message::Set(UpdateVector {
        kind,
        device: el.require_attr("device")?.to_string(),
        name: el.require_attr("name")?.to_string(),
        state,
        timeout: parse_opt_timeout(el)?,
        timestamp: parse_opt_timestamp(el)?,
        message: el.attr("message").map(String::from),
        changes: changes_from_xml(el, kind, attachments)?,
    }))
}

fn new_from_xml(
    el: &XmlElement,
    kind: PropertyKind,
    attachments: &mut VecDeque<BlobHandle>,
) -> Result<Message> {
    Ok(Message::New(NewVector {
        kind,
        device: el.require_attr("device")?.to_string(),
        name: el.require_attr("name")?.to_string(),
        timestamp: parse_opt_timestamp(el)?,
        changes: changes_from_xml(el, kind, attachments)?,
    }))
}

fn changes_from_xml(
    el: &XmlElement,
    kind: PropertyKind,
    attachments: &mut VecDeque<BlobHandle>,
) -> Result<Vec<ElementUpdate>> {
    let child_tag = format!("one{}", kind_tag(kind));
    let mut changes = Vec::new();
    for child in children(el, &child_tag) {
        let name = child.require_attr("name")?.to_string();
        changes.push(match kind {
            PropertyKind::Number => ElementUpdate::Number {
                name,
                value: parse_number(&child.text)?,
            },
            PropertyKind::Text => ElementUpdate::Text {
                name,
                value: child.text.clone(),
            },
            PropertyKind::Switch => ElementUpdate::Switch {
                name,
                state: child.text.parse()?,
            },
            PropertyKind::Light => ElementUpdate::Light {
                name,
                state: child.text.parse()?,
            },
            PropertyKind::Blob => ElementUpdate::Blob {
                name,
                blob: blob_from_xml(child, attachments)?,
            },
        });
    }
    Ok(changes)
}

fn blob_from_xml(el: &XmlElement, attachments: &mut VecDeque<BlobHandle>) -> Result<Blob> {
    let size: usize = el
        .require_attr("size")?
        .parse()
        .map_err(|_| Error::parse("bad BLOB size"))?;
    let format = el.require_attr("format")?.to_string();

    let attached = matches!(el.attr("attached"), Some("true"));
    let data = if attached {
        // Contract: the out-of-band payload is available no later than the
        // end of the enclosing message
        let handle = attachments.pop_front().ok_or_else(|| {
            Error::blob("attached BLOB payload not available by end of message")
        })?;
        BlobData::Attached(handle)
    } else {
        // Inline base64 bodies may be broken across lines
        let body: String = el.text.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(enclen) = el.attr("enclen") {
            match enclen.parse::<usize>() {
                Ok(enclen) if enclen != body.len() => warn!(
                    declared = enclen,
                    actual = body.len(),
                    "BLOB enclen does not match encoded body"
                ),
                Err(_) => warn!("unparseable BLOB enclen ignored"),
                _ => {}
            }
        }
        let payload = base64::decode(&body)
            .map_err(|e| Error::blob(format!("bad base64 BLOB body: {}", e)))?;
        BlobData::Inline(payload.into())
    };

    Ok(Blob { format, size, data })
}

fn change_to_xml(change: &ElementUpdate, out_attachments: &mut Vec<BlobHandle>) -> XmlElement {
    match change {
        ElementUpdate::Number { name, value } => XmlElement::new("oneNumber")
            .with_attr("name", name)
            .with_text(format!("{}", value)),
        ElementUpdate::Text { name, value } => XmlElement::new("oneText")
            .with_attr("name", name)
            .with_text(value),
        ElementUpdate::Switch { name, state } => XmlElement::new("oneSwitch")
            .with_attr("name", name)
            .with_text(state.to_string()),
        ElementUpdate::Light { name, state } => XmlElement::new("oneLight")
            .with_attr("name", name)
            .with_text(state.to_string()),
        ElementUpdate::Blob { name, blob } => {
            let el = XmlElement::new("oneBLOB")
                .with_attr("name", name)
                .with_attr("size", blob.size)
                .with_attr("format", &blob.format);
            match &blob.data {
                BlobData::Inline(data) => {
                    let body = base64::encode(data);
                    el.with_attr("enclen", body.len()).with_text(body)
                }
                BlobData::Attached(handle) => {
                    out_attachments.push(handle.clone());
                    el.with_attr("attached", "true")
                }
            }
        }
    }
}

fn children<'a>(el: &'a XmlElement, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
    // Children with unexpected tags are skipped, not rejected
    el.children.iter().filter(move |c| c.name == tag)
}

fn parse_opt_timestamp(el: &XmlElement) -> Result<Option<Timestamp>> {
    match el.attr("timestamp") {
        Some(ts) => Ok(Some(ts.parse()?)),
        None => Ok(None),
    }
}

fn parse_opt_timeout(el: &XmlElement) -> Result<Option<f64>> {
    match el.attr("timeout") {
        Some(timeout) => timeout
            .parse()
            .map(Some)
            .map_err(|_| Error::parse("bad timeout attribute")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Permission, SwitchState};
    use bytes::Bytes;

    fn round_trip(message: Message) -> Message {
        let mut out = Vec::new();
        let el = message.to_xml(&mut out);
        let rendered = el.to_string();
        let reparsed = super::super::xml::parse_element(&rendered).unwrap();
        let mut attachments: VecDeque<BlobHandle> = out.into_iter().collect();
        Message::from_xml(&reparsed, &mut attachments)
            .unwrap()
            .expect("recognized element")
    }

    #[test]
    fn test_get_properties_round_trip() {
        let msg = Message::GetProperties {
            version: Some("1.7".into()),
            device: Some("CCD Simulator".into()),
            name: None,
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_def_switch_round_trip() {
        let msg = Message::Def {
            property: Property {
                device: "Telescope Simulator".into(),
                name: "MOUNT_TYPE".into(),
                label: "Mount type".into(),
                group: "Options".into(),
                state: PropertyState::Idle,
                perm: Some(Permission::ReadWrite),
                timeout: Some(60.0),
                rule: Some(SwitchRule::OneOfMany),
                timestamp: Some("2024-03-01T12:00:00".parse().unwrap()),
                elements: Elements::Switch(vec![
                    SwitchElement {
                        name: "MOUNT_GEM".into(),
                        label: "German equatorial".into(),
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
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_def_number_sexagesimal_round_trip() {
        let msg = Message::Def {
            property: Property {
                device: "Telescope Simulator".into(),
                name: "EQUATORIAL_EOD_COORD".into(),
                label: "Eq. coordinates".into(),
                group: "Main Control".into(),
                state: PropertyState::Idle,
                perm: Some(Permission::ReadWrite),
                timeout: Some(120.0),
                rule: None,
                timestamp: None,
                elements: Elements::Number(vec![NumberElement {
                    name: "RA".into(),
                    label: "RA (hh:mm:ss)".into(),
                    format: "%10.6m".parse().unwrap(),
                    min: 0.0,
                    max: 24.0,
                    step: 0.0,
                    value: 12.5125,
                }]),
            },
            message: None,
        };
        // 12.5125 is exactly representable at :mm:ss resolution
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_set_number_round_trip() {
        let msg = Message::Set(UpdateVector {
            kind: PropertyKind::Number,
            device: "CCD Simulator".into(),
            name: "CCD_EXPOSURE".into(),
            state: Some(PropertyState::Busy),
            timeout: Some(10.0),
            timestamp: None,
            message: Some("exposing".into()),
            changes: vec![ElementUpdate::Number {
                name: "CCD_EXPOSURE_VALUE".into(),
                value: 4.5,
            }],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_new_switch_round_trip() {
        let msg = Message::New(NewVector {
            kind: PropertyKind::Switch,
            device: "Telescope Simulator".into(),
            name: "MOUNT_TYPE".into(),
            timestamp: None,
            changes: vec![ElementUpdate::Switch {
                name: "MOUNT_SINGLE_ARM".into(),
                state: SwitchState::On,
            }],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_blob_round_trip_compressed() {
        let blob = Blob::deflated(".fits", b"SIMPLE  =                    T").unwrap();
        assert_eq!(blob.format, ".fits.z");
        let msg = Message::Set(UpdateVector {
            kind: PropertyKind::Blob,
            device: "CCD Simulator".into(),
            name: "CCD1".into(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![ElementUpdate::Blob {
                name: "CCD1".into(),
                blob: blob.clone(),
            }],
        });
        let back = round_trip(msg.clone());
        assert_eq!(back, msg);
        if let Message::Set(update) = back {
            if let ElementUpdate::Blob { blob: b, .. } = &update.changes[0] {
                assert_eq!(
                    b.decompressed().unwrap().as_ref(),
                    b"SIMPLE  =                    T"
                );
            } else {
                panic!("wrong change kind");
            }
        }
    }

    #[test]
    fn test_attached_blob_round_trip() {
        let handle = BlobHandle::new(Bytes::from_static(b"out of band"));
        let msg = Message::Set(UpdateVector {
            kind: PropertyKind::Blob,
            device: "CCD Simulator".into(),
            name: "CCD1".into(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![ElementUpdate::Blob {
                name: "CCD1".into(),
                blob: Blob::attached(".fits", 11, handle),
            }],
        });
        let back = round_trip(msg.clone());
        if let Message::Set(update) = back {
            if let ElementUpdate::Blob { blob, .. } = &update.changes[0] {
                assert_eq!(blob.payload().as_ref(), b"out of band");
                assert!(matches!(blob.data, BlobData::Attached(_)));
            } else {
                panic!("wrong change kind");
            }
        } else {
            panic!("wrong message kind");
        }
    }

    #[test]
    fn test_attached_blob_without_payload_fails() {
        let rendered = "<setBLOBVector device='C' name='B' state='Ok'>\
                        <oneBLOB name='B' size='4' format='.bin' attached='true'/>\
                        </setBLOBVector>";
        let el = super::super::xml::parse_element(rendered).unwrap();
        let mut empty = VecDeque::new();
        assert!(matches!(
            Message::from_xml(&el, &mut empty),
            Err(Error::Blob(_))
        ));
    }

    #[test]
    fn test_unrecognized_element_skipped() {
        let el = super::super::xml::parse_element("<futureThing device='X'/>").unwrap();
        assert_eq!(Message::from_xml(&el, &mut VecDeque::new()).unwrap(), None);
    }

    #[test]
    fn test_unrecognized_attribute_ignored() {
        let el = super::super::xml::parse_element(
            "<getProperties version='1.7' shiny='yes'/>",
        )
        .unwrap();
        let msg = Message::from_xml(&el, &mut VecDeque::new()).unwrap().unwrap();
        assert!(matches!(msg, Message::GetProperties { .. }));
    }

    #[test]
    fn test_enable_blob_round_trip() {
        let msg = Message::EnableBlob {
            device: "CCD Simulator".into(),
            name: Some("CCD1".into()),
            policy: BlobPolicy::Only,
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_ping_round_trip() {
        let msg = Message::PingRequest { uid: "ab12".into() };
        assert_eq!(round_trip(msg.clone()), msg);
        let msg = Message::PingReply { uid: "ab12".into() };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_del_property_scopes() {
        // Property scope
        let msg = Message::DelProperty {
            device: Some("CCD Simulator".into()),
            name: Some("CCD1".into()),
            timestamp: None,
            message: None,
        };
        assert_eq!(round_trip(msg.clone()), msg);

        // Whole-registry scope: both identifiers absent
        let msg = Message::DelProperty {
            device: None,
            name: None,
            timestamp: None,
            message: Some("driver shutting down".into()),
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }
}
