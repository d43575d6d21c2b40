use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::property::{Blob, BlobData, ElementUpdate};
use crate::protocol::{Message, XmlCodec};

use super::registry::{ConnId, Role};

/// Internal router events; connection tasks raise the last two
#[derive(Debug)]
pub(crate) enum Event {
    Attached {
        id: ConnId,
        role: Role,
        outbound: mpsc::Sender<Message>,
    },
    Inbound {
        id: ConnId,
        message: Message,
    },
    Closed {
        id: ConnId,
    },
}

/// Splits a stream and spawns its reader and writer tasks.
///
/// The reader forwards every decoded message to the router's event loop and
/// reports closure when the peer disconnects or sends malformed XML; a
/// stream violation tears the connection down rather than resynchronizing.
/// The writer drains the outbound queue until every sender is dropped.
pub(crate) fn spawn<S>(
    id: ConnId,
    stream: S,
    max_fragment_size: usize,
    mut outbound_rx: mpsc::Receiver<Message>,
    events: mpsc::Sender<Event>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    tokio::spawn(async move {
        let mut frames = FramedRead::new(
            read_half,
            XmlCodec::with_max_fragment_size(max_fragment_size),
        );
        while let Some(decoded) = frames.next().await {
            match decoded {
                Ok(message) => {
                    if events.send(Event::Inbound { id, message }).await.is_err() {
                        // Router gone; nothing left to deliver to
                        return;
                    }
                }
                Err(e) => {
                    warn!(conn = id.0, error = %e, "dropping connection on stream violation");
                    break;
                }
            }
        }
        let _ = events.send(Event::Closed { id }).await;
    });

    tokio::spawn(async move {
        let mut frames = FramedWrite::new(
            write_half,
            XmlCodec::with_max_fragment_size(max_fragment_size),
        );
        while let Some(message) = outbound_rx.recv().await {
            // Attached payloads are an in-process fast path; anything that
            // crosses a socket travels inline
            let message = inline_attachments(message);
            if let Err(e) = frames.send(message).await {
                warn!(conn = id.0, error = %e, "writer stopping");
                break;
            }
        }
        debug!(conn = id.0, "writer finished");
    });
}

/// Rewrites attached BLOB payloads as inline data
fn inline_attachments(message: Message) -> Message {
    fn rewrite(changes: &mut [ElementUpdate]) {
        for change in changes {
            if let ElementUpdate::Blob { blob, .. } = change {
                if let BlobData::Attached(handle) = &blob.data {
                    *blob = Blob {
                        format: blob.format.clone(),
                        size: blob.size,
                        data: BlobData::Inline(handle.bytes().clone()),
                    };
                }
            }
        }
    }

    match message {
        Message::Set(mut update) => {
            rewrite(&mut update.changes);
            Message::Set(update)
        }
        Message::New(mut request) => {
            rewrite(&mut request.changes);
            Message::New(request)
        }
        other => other,
    }
}
