// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration registry integration tests
//!
//! Activation atomicity under concurrent readers, record files, and contexts
//! and ports following the active set.

use rtlink::config::keys;
use rtlink::{
    Cadence, ConfigEvent, ConfigSet, ConfigSetRegistry, ExecutionContext, OutPort, TransportKind,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn tagged(id: &str) -> ConfigSet {
    ConfigSet::from_pairs(id, (0..16).map(|i| (format!("key{i}"), id.to_string())))
}

#[test]
fn test_activation_never_mixes_sets() {
    let registry = Arc::new(ConfigSetRegistry::new());
    registry.add(tagged("red")).expect("add red");
    registry.add(tagged("blue")).expect("add blue");
    registry.activate("red").expect("activate");

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut checked = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let active = registry.get_active().expect("always active");
                    let id = active.id().to_string();
                    assert_eq!(active.len(), 16);
                    assert!(active.iter().all(|(_, v)| v == id), "mixed snapshot");
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    for i in 0..500 {
        let id = if i % 2 == 0 { "blue" } else { "red" };
        registry.activate(id).expect("activate");
        if i % 50 == 0 {
            let values = (0..16).map(|k| (format!("key{k}"), id.to_string()));
            registry.set_values(id, values).expect("rewrite active");
        }
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().expect("reader thread") > 0);
    }
}

#[test]
fn test_load_records_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(
        file,
        "[default]\ndescription = normal operation\n{} = 100\n{} = 4\n\n\
         [debug]\ndescription = slow, verbose\n{} = 1\nbanner = line1\\nline2\n",
        keys::EXEC_PERIODIC_RATE,
        keys::BUFFER_LENGTH,
        keys::EXEC_PERIODIC_RATE
    )
    .expect("write");

    let registry = ConfigSetRegistry::new();
    assert_eq!(registry.load_file(file.path()).expect("load"), 2);

    let debug = registry.get("debug").expect("debug set");
    assert_eq!(debug.description(), "slow, verbose");
    assert_eq!(debug.get("banner"), Some("line1\nline2"));

    // Export and re-import into a fresh registry
    let other = ConfigSetRegistry::new();
    let sets = rtlink::config::parse_records(&registry.to_records()).expect("reparse");
    for set in sets {
        other.add(set).expect("add");
    }
    assert_eq!(other.get("debug").expect("debug").get("banner"), Some("line1\nline2"));
    assert_eq!(other.list().len(), 2);
}

#[test]
fn test_listeners_see_every_event() {
    let registry = ConfigSetRegistry::new();
    let activations = Arc::new(AtomicUsize::new(0));
    let others = Arc::new(AtomicUsize::new(0));
    let listener = {
        let activations = Arc::clone(&activations);
        let others = Arc::clone(&others);
        registry.add_listener(move |event| match event {
            ConfigEvent::Activated(_) => {
                activations.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                others.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    registry.add(ConfigSet::new("a")).expect("add a");
    registry.add(ConfigSet::new("b")).expect("add b");
    registry.activate("a").expect("activate");
    registry.set_values("a", [("k", "v")]).expect("update active");
    registry.remove("b").expect("remove");

    // add, add, updated, removed
    assert_eq!(others.load(Ordering::Relaxed), 4);
    // activate, re-publish after update
    assert_eq!(activations.load(Ordering::Relaxed), 2);

    assert!(registry.remove_listener(listener));
    registry.activate("a").expect("activate again");
    assert_eq!(activations.load(Ordering::Relaxed), 2);
}

#[test]
fn test_context_and_port_follow_active_set() {
    let registry = ConfigSetRegistry::new();
    let mut fast = ConfigSet::new("fast");
    fast.set(keys::EXEC_PERIODIC_RATE, "500");
    fast.set(keys::INTERFACE_TYPE, "shared_memory");
    fast.set(keys::SHM_MEMORY_SIZE, "8k");
    registry.add(fast).expect("add");
    let mut slow = ConfigSet::new("slow");
    slow.set(keys::EXEC_PERIODIC_RATE, "10");
    registry.add(slow).expect("add");

    let ec = Arc::new(ExecutionContext::periodic("follower", Duration::from_millis(50)));
    let port = Arc::new(OutPort::<f32>::new("speed"));
    ec.follow(&registry);
    port.follow(&registry);

    registry.activate("fast").expect("activate fast");
    assert_eq!(ec.cadence(), Cadence::Periodic(Duration::from_millis(2)));
    assert_eq!(port.default_profile().kind, TransportKind::SharedMemory);
    assert_eq!(port.default_profile().memory_size().expect("size"), 8 * 1024);

    registry.activate("slow").expect("activate slow");
    assert_eq!(ec.cadence(), Cadence::Periodic(Duration::from_millis(100)));
    assert_eq!(port.default_profile().kind, TransportKind::Local);

    // A dropped follower leaves the registry usable
    drop(ec);
    registry.activate("fast").expect("activate after drop");
}

#[test]
fn test_followers_settle_on_last_activation() {
    let registry = Arc::new(ConfigSetRegistry::new());
    let mut slow = ConfigSet::new("slow");
    slow.set(keys::EXEC_PERIODIC_RATE, "10");
    registry.add(slow).expect("add");
    let mut fast = ConfigSet::new("fast");
    fast.set(keys::EXEC_PERIODIC_RATE, "1000");
    registry.add(fast).expect("add");

    // Registered ahead of the follower: stalls while 'slow' is delivered
    let entered = Arc::new(AtomicBool::new(false));
    {
        let entered = Arc::clone(&entered);
        registry.add_listener(move |event| {
            if let ConfigEvent::Activated(set) = event {
                if set.id() == "slow" {
                    entered.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                }
            }
        });
    }
    let ec = Arc::new(ExecutionContext::periodic("follower", Duration::from_millis(50)));
    ec.follow(&registry);

    let first = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.activate("slow").map(|_| ()))
    };
    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    registry.activate("fast").expect("activate fast");
    first.join().expect("activating thread").expect("activate slow");

    assert_eq!(registry.active_id().as_deref(), Some("fast"));
    assert_eq!(ec.cadence(), Cadence::Periodic(Duration::from_millis(1)));
}
