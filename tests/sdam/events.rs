use bson::oid::ObjectId;

use mongodb_topology::apm::{ChannelSink, Event, EventSink, Listener};

use std::sync::atomic::{AtomicUsize, Ordering};

use super::framework::host;

static HOOK_RUNS: AtomicUsize = AtomicUsize::new(0);

fn counting_hook(_: &Event) {
    HOOK_RUNS.fetch_add(1, Ordering::SeqCst);
}

fn opening(topology_id: ObjectId) -> Event {
    Event::TopologyOpening { topology_id }
}

#[test]
fn listener_runs_registered_hooks() {
    let listener = Listener::new();
    let topology_id = ObjectId::new();

    // Publishing with no hooks is a no-op.
    listener.publish(opening(topology_id));
    assert_eq!(HOOK_RUNS.load(Ordering::SeqCst), 0);

    listener.add_hook(counting_hook).unwrap();
    listener.publish(opening(topology_id));
    listener.publish(Event::TopologyClosed { topology_id });

    assert_eq!(HOOK_RUNS.load(Ordering::SeqCst), 2);
}

#[test]
fn channel_sink_bounds_delivery_by_dropping() {
    let (sink, receiver) = ChannelSink::new(1);
    let topology_id = ObjectId::new();

    sink.publish(opening(topology_id));
    sink.publish(opening(topology_id));
    sink.publish(opening(topology_id));

    // Only the buffered event survives; the overflow was dropped rather
    // than blocking the publisher.
    assert_eq!(receiver.try_iter().count(), 1);
}

#[test]
fn events_render_their_kind_and_address() {
    let topology_id = ObjectId::new();
    let event = Event::ServerOpening {
        topology_id,
        address: host("a:27017"),
    };

    assert_eq!(event.name(), "server_opening");
    assert_eq!(event.address(), Some(&host("a:27017")));
    assert!(event.to_string().contains("a:27017"));
}
