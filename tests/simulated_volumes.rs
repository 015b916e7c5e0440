use ebk::adapters::SimulatedProvider;
use ebk::core::{VolumeEvent, VolumeProvider};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn attach_produces_an_event() {
    let (provider, controller) = SimulatedProvider::new();
    let (tx, mut rx) = mpsc::channel(32);

    provider.start(tx);
    controller.attach("stick-1", 64);

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed");

    match event {
        VolumeEvent::VolumeAttached(volume) => {
            assert_eq!(volume.id, "stick-1");
            assert_eq!(volume.capacity, 64 * 1024 * 1024 * 1024);
            assert!(volume.label.contains("stick-1"));
        }
        _ => panic!("expected VolumeAttached event"),
    }
}

#[tokio::test]
async fn detach_produces_an_event() {
    let (provider, controller) = SimulatedProvider::new();
    let (tx, mut rx) = mpsc::channel(32);

    provider.start(tx);
    controller.detach("stick-2");

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed");

    match event {
        VolumeEvent::VolumeDetached(id) => assert_eq!(id, "stick-2"),
        _ => panic!("expected VolumeDetached event"),
    }
}

#[tokio::test]
async fn events_arrive_in_order() {
    let (provider, controller) = SimulatedProvider::new();
    let (tx, mut rx) = mpsc::channel(32);

    provider.start(tx);

    controller.attach("dev-1", 32);
    controller.attach("dev-2", 64);
    controller.detach("dev-1");

    let mut events = Vec::new();
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        events.push(event);
    }

    assert!(matches!(events[0], VolumeEvent::VolumeAttached(_)));
    assert!(matches!(events[1], VolumeEvent::VolumeAttached(_)));
    assert!(matches!(events[2], VolumeEvent::VolumeDetached(_)));
}

#[tokio::test]
async fn listing_reflects_attached_volumes() {
    let (provider, controller) = SimulatedProvider::new();

    assert!(provider.list_volumes().unwrap().is_empty());

    controller.attach("a", 8);
    controller.attach("b", 16);
    assert_eq!(provider.list_volumes().unwrap().len(), 2);

    controller.detach("a");
    let remaining = provider.list_volumes().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "b");
}

#[tokio::test]
async fn stop_does_not_panic() {
    let (provider, _controller) = SimulatedProvider::new();
    let (tx, _rx) = mpsc::channel(32);

    provider.start(tx);
    provider.stop();
}
