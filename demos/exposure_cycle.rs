use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

use indi_proto::core::{Permission, PropertyState, RouterConfig};
use indi_proto::network::Router;
use indi_proto::property::{Elements, NumberElement, Property};
use indi_proto::protocol::XmlCodec;
use indi_proto::sync::{ClientCache, ClientEvent, DeviceAction, DeviceStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Everything runs in-process: a router, a camera simulator on its device
    // side, and a client cache on the other
    let router = Router::new(RouterConfig::default());
    let (dev_near, dev_far) = tokio::io::duplex(1 << 16);
    let (cli_near, cli_far) = tokio::io::duplex(1 << 16);
    router.attach_device(dev_near).await.unwrap();
    router.attach_client(cli_near).await.unwrap();
    let mut router = router;
    tokio::spawn(async move { router.run().await });

    // Device side: announce one exposure property and run requests
    tokio::spawn(async move {
        let (r, w) = tokio::io::split(dev_far);
        let mut rx = FramedRead::new(r, XmlCodec::new());
        let mut tx = FramedWrite::new(w, XmlCodec::new());

        let mut store = DeviceStore::new();
        let def = store
            .define(
                Property {
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
                None,
            )
            .unwrap();
        tx.send(def).await.unwrap();

        while let Some(Ok(message)) = rx.next().await {
            for action in store.handle(&message) {
                match action {
                    DeviceAction::Send(reply) => tx.send(reply).await.unwrap(),
                    DeviceAction::Request(request) => {
                        // Acknowledge Busy, "expose", then report completion
                        let busy = store
                            .accept(&request, PropertyState::Busy, None)
                            .unwrap();
                        tx.send(busy).await.unwrap();

                        tokio::time::sleep(Duration::from_millis(300)).await;
                        let done = store
                            .update(
                                &request.device,
                                &request.name,
                                vec![],
                                Some(PropertyState::Ok),
                                Some("exposure complete".into()),
                            )
                            .unwrap();
                        tx.send(done).await.unwrap();
                    }
                }
            }
        }
    });

    // Client side: discover, request a 2 second exposure, watch it settle
    let (r, w) = tokio::io::split(cli_far);
    let mut rx = FramedRead::new(r, XmlCodec::new());
    let mut tx = FramedWrite::new(w, XmlCodec::new());
    let mut cache = ClientCache::new();

    tx.send(ClientCache::get_properties(None, None))
        .await
        .unwrap();

    let mut requested = false;
    while let Some(Ok(message)) = rx.next().await {
        for event in cache.handle(&message) {
            match event {
                ClientEvent::Defined { device, name } => {
                    println!("defined {}.{}", device, name);
                    if !requested {
                        requested = true;
                        let request = cache
                            .new_number(
                                &device,
                                &name,
                                &[("CCD_EXPOSURE_VALUE", 2.0)],
                                Instant::now(),
                            )
                            .unwrap();
                        println!("requested 2s exposure (cache now Busy)");
                        tx.send(request).await.unwrap();
                    }
                }
                ClientEvent::Updated { device, name } => {
                    let prop = cache.property(&device, &name).unwrap();
                    println!(
                        "{}.{} = {:?} ({:?})",
                        device,
                        name,
                        prop.number("CCD_EXPOSURE_VALUE"),
                        prop.state
                    );
                    if prop.state == PropertyState::Ok {
                        println!("exposure cycle complete");
                        return;
                    }
                }
                ClientEvent::Notice { device, text } => {
                    println!("[{}] {}", device.as_deref().unwrap_or("-"), text);
                }
                ClientEvent::Deleted { device, name } => {
                    println!("withdrawn {}.{}", device, name);
                }
                ClientEvent::Outbound(reply) => tx.send(reply).await.unwrap(),
            }
        }
    }
}
