use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::core::Error;
use crate::property::BlobHandle;

use super::message::Message;
use super::xml;

/// Codec between the byte stream and protocol messages.
///
/// Frames one top-level XML fragment at a time; well-formed fragments the
/// protocol does not recognize are skipped so newer peers can extend the
/// grammar. Out-of-band BLOB payloads are bridged through the attachment
/// queues: the transport supplies inbound handles before (or while) feeding
/// the enclosing message's bytes, and drains outbound handles after
/// encoding.
pub struct XmlCodec {
    max_fragment_size: usize,
    inbound_attachments: VecDeque<BlobHandle>,
    outbound_attachments: Vec<BlobHandle>,
}

impl Default for XmlCodec {
    fn default() -> Self {
        XmlCodec {
            max_fragment_size: crate::core::MAX_FRAGMENT_SIZE,
            inbound_attachments: VecDeque::new(),
            outbound_attachments: Vec::new(),
        }
    }
}

impl XmlCodec {
    /// Creates a codec with the default fragment size cap
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec with an explicit fragment size cap
    pub fn with_max_fragment_size(max_fragment_size: usize) -> Self {
        XmlCodec {
            max_fragment_size,
            ..Self::default()
        }
    }

    /// Queues an out-of-band payload for the next attached BLOB decoded.
    /// Handles are consumed in arrival order.
    pub fn supply_attachment(&mut self, handle: BlobHandle) {
        self.inbound_attachments.push_back(handle);
    }

    /// Drains payload handles queued by encoding attached BLOBs; the
    /// transport must deliver these out-of-band no later than the message
    /// bytes complete
    pub fn take_outbound_attachments(&mut self) -> Vec<BlobHandle> {
        std::mem::take(&mut self.outbound_attachments)
    }
}

impl Decoder for XmlCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match xml::scan_fragment(&src[..])? {
                None => {
                    if src.len() > self.max_fragment_size {
                        return Err(Error::parse(format!(
                            "wire fragment exceeds {} bytes",
                            self.max_fragment_size
                        )));
                    }
                    // Need more data
                    return Ok(None);
                }
                Some(len) => {
                    let fragment = src.split_to(len);
                    let text = std::str::from_utf8(&fragment)
                        .map_err(|_| Error::parse("wire fragment is not valid UTF-8"))?;
                    trace!(bytes = len, "framed wire fragment");
                    let element = xml::parse_element(text)?;
                    match Message::from_xml(&element, &mut self.inbound_attachments)? {
                        Some(message) => return Ok(Some(message)),
                        // Unrecognized element skipped; try the next fragment
                        None => continue,
                    }
                }
            }
        }
    }
}

impl Encoder<Message> for XmlCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let element = item.to_xml(&mut self.outbound_attachments);
        let rendered = element.to_string();
        dst.extend_from_slice(rendered.as_bytes());
        // Fragment separator; keeps the stream readable in captures
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlobPolicy, PropertyKind, PropertyState};
    use crate::property::{Blob, ElementUpdate};
    use crate::protocol::message::UpdateVector;
    use bytes::{BufMut, Bytes, BytesMut};

    fn get_properties() -> Message {
        Message::GetProperties {
            version: Some("1.7".into()),
            device: None,
            name: None,
        }
    }

    #[test]
    fn test_codec_round_trip() {
        let mut codec = XmlCodec::new();
        let mut bytes = BytesMut::new();

        let message = Message::EnableBlob {
            device: "CCD Simulator".into(),
            name: Some("CCD1".into()),
            policy: BlobPolicy::Also,
        };

        codec.encode(message.clone(), &mut bytes).unwrap();
        let decoded = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }

    #[test]
    fn test_codec_partial_input() {
        let mut codec = XmlCodec::new();
        let mut bytes = BytesMut::new();

        bytes.put_slice(b"<getProperties vers");
        assert!(codec.decode(&mut bytes).unwrap().is_none());

        bytes.put_slice(b"ion='1.7'/>");
        let decoded = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(decoded, get_properties());
    }

    #[test]
    fn test_codec_multiple_fragments_in_one_buffer() {
        let mut codec = XmlCodec::new();
        let mut bytes = BytesMut::new();
        codec.encode(get_properties(), &mut bytes).unwrap();
        codec
            .encode(
                Message::PingRequest { uid: "1".into() },
                &mut bytes,
            )
            .unwrap();

        assert_eq!(codec.decode(&mut bytes).unwrap().unwrap(), get_properties());
        assert_eq!(
            codec.decode(&mut bytes).unwrap().unwrap(),
            Message::PingRequest { uid: "1".into() }
        );
        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }

    #[test]
    fn test_codec_skips_unrecognized_elements() {
        let mut codec = XmlCodec::new();
        let mut bytes = BytesMut::from(
            &b"<futureThing answer='42'/><pingReply uid='7'/>"[..],
        );
        assert_eq!(
            codec.decode(&mut bytes).unwrap().unwrap(),
            Message::PingReply { uid: "7".into() }
        );
    }

    #[test]
    fn test_codec_rejects_oversized_fragment() {
        let mut codec = XmlCodec::with_max_fragment_size(32);
        let mut bytes = BytesMut::new();
        bytes.put_slice(b"<setTextVector device='0123456789' name='0123456789'");
        assert!(matches!(
            codec.decode(&mut bytes),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_codec_malformed_xml_is_parse_error() {
        let mut codec = XmlCodec::new();
        let mut bytes = BytesMut::from(&b"stray text <a/>"[..]);
        assert!(matches!(codec.decode(&mut bytes), Err(Error::Parse(_))));
    }

    #[test]
    fn test_codec_attached_blob_flow() {
        let mut sender = XmlCodec::new();
        let mut bytes = BytesMut::new();

        let handle = crate::property::BlobHandle::new(Bytes::from_static(b"payload"));
        let message = Message::Set(UpdateVector {
            kind: PropertyKind::Blob,
            device: "CCD Simulator".into(),
            name: "CCD1".into(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: None,
            message: None,
            changes: vec![ElementUpdate::Blob {
                name: "CCD1".into(),
                blob: Blob::attached(".fits", 7, handle),
            }],
        });

        sender.encode(message, &mut bytes).unwrap();
        let outbound = sender.take_outbound_attachments();
        assert_eq!(outbound.len(), 1);

        // The receiving transport hands the payload over before the message
        // finishes decoding
        let mut receiver = XmlCodec::new();
        for handle in outbound {
            receiver.supply_attachment(handle);
        }
        let decoded = receiver.decode(&mut bytes).unwrap().unwrap();
        if let Message::Set(update) = decoded {
            if let ElementUpdate::Blob { blob, .. } = &update.changes[0] {
                assert_eq!(blob.payload().as_ref(), b"payload");
            } else {
                panic!("wrong change kind");
            }
        } else {
            panic!("wrong message kind");
        }
    }
}
