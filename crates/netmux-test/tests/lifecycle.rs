//! Binding and interface lifecycle.

use netmux_core::{
    CreateError, IndicationKind, InitParams, LowerStatus, MacAddress, Medium, MuxError, Oid,
    OpenError, SendRequest, StatusCode, StatusIndication, VifState, VlanId,
};
use netmux_test::{
    broadcast, ethernet, vlan, Harness, UpperEvent, MOCK_ADDRESS, MOCK_LOOKAHEAD,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_bind_then_unbind_leaves_nothing_linked() {
    let h = Harness::new();
    let b = h.mux.bind("eth0", &["vlan10", "vlan20", "pass"]).unwrap();

    let info = h.mux.binding_info(b).unwrap();
    assert_eq!(info.interfaces, 3);
    assert_eq!(info.lookahead, MOCK_LOOKAHEAD);
    assert_eq!(info.address, MOCK_ADDRESS);
    let mut vifs = h.mux.interfaces(b).unwrap();
    vifs.sort();
    assert!(vifs
        .iter()
        .all(|v| h.mux.interface_state(*v).unwrap() == VifState::Active));

    h.mux.unbind(b).unwrap();

    assert!(h.mux.bindings().is_empty());
    assert_eq!(h.lower.closed().len(), 1);
    let mut halted = h.upper.halted();
    halted.sort();
    assert_eq!(halted, vifs);
    assert!(matches!(h.mux.binding_info(b), Err(MuxError::NotFound(_))));
}

#[test]
fn test_interface_numbers_and_addresses_are_distinct() {
    let h = Harness::new();
    let b = h.mux.bind("eth0", &["a", "b"]).unwrap();
    let infos: Vec<_> = h
        .mux
        .interfaces(b)
        .unwrap()
        .into_iter()
        .map(|v| h.mux.interface_info(v).unwrap())
        .collect();
    assert_ne!(infos[0].number, infos[1].number);
    assert_ne!(infos[0].current_address, infos[1].current_address);
    assert!(infos.iter().all(|i| i.current_address.is_local()));
    assert!(infos.iter().all(|i| i.permanent_address == i.current_address));
}

#[test]
fn test_bind_skips_duplicate_names() {
    let h = Harness::new();
    let b = h.mux.bind("eth0", &["vlan5", "VLAN5"]).unwrap();
    assert_eq!(h.mux.binding_info(b).unwrap().interfaces, 1);
    assert_eq!(h.mux.bootstrap_virtual_interfaces(b, &["vlan5", "vlan6"]).unwrap(), 1);
}

#[test]
fn test_open_refuses_other_media() {
    let h = Harness::new();
    h.lower.set_medium(Medium::Other(9));
    assert!(matches!(
        h.mux.open("tr0"),
        Err(OpenError::UnsupportedMedium {
            medium: Medium::Other(9),
            ..
        })
    ));
    assert_eq!(h.lower.closed().len(), 1);
    assert!(h.mux.bindings().is_empty());
}

#[test]
fn test_open_failure_status_is_kept() {
    let h = Harness::new();
    h.lower.fail_open(LowerStatus::AdapterNotReady);
    let err = h.mux.open("eth0").unwrap_err();
    assert_eq!(err.status(), Some(LowerStatus::AdapterNotReady));

    h.lower.fail_open(LowerStatus::Resources);
    assert!(matches!(h.mux.open("eth0"), Err(OpenError::Resources { .. })));
}

#[test]
fn test_failed_adapter_queries_keep_defaults() {
    let h = Harness::new();
    h.lower.fail(Oid::LINK_SPEED, LowerStatus::Failure);
    let b = h.open("eth0");
    assert_eq!(
        h.mux.binding_info(b).unwrap().link_speed,
        h.mux.config().default_link_speed
    );
}

#[test]
fn test_refused_instantiation_unwinds_bind() {
    let h = Harness::new();
    h.upper.set_refuse_instantiation(true);

    let err = h.mux.bind("eth0", &["vlan5"]).unwrap_err();
    assert!(matches!(err, MuxError::Resources { .. }));
    assert!(h.mux.bindings().is_empty());
    assert_eq!(h.lower.closed().len(), 1);
}

#[test]
fn test_refused_instantiation_on_populated_binding() {
    let h = Harness::new();
    let b = h.mux.bind("eth0", &["vlan5"]).unwrap();
    h.upper.set_refuse_instantiation(true);

    let err = h.mux.create_interface(b, "vlan6").unwrap_err();
    assert!(matches!(err, CreateError::Instantiate { .. }));
    assert_eq!(h.mux.binding_info(b).unwrap().interfaces, 1);

    // Bootstrap stops at the first failure but keeps what it has.
    assert_eq!(h.mux.bootstrap_virtual_interfaces(b, &["vlan6"]).unwrap(), 0);
}

#[test]
fn test_deferred_initialization_applies_settings() {
    let h = Harness::new();
    h.upper.set_auto_initialize(false);
    let b = h.open("eth0");
    let vif = h.mux.create_interface(b, "vlan9").unwrap();
    assert_eq!(h.mux.interface_state(vif).unwrap(), VifState::InitPending);

    let address = MacAddress::new([0x02, 0x11, 0x11, 0x11, 0x11, 0x11]);
    h.mux
        .initialize_interface(
            vif,
            InitParams {
                network_address: Some(address),
                vlan_id: 9,
                strip_passthrough_tags: false,
            },
        )
        .unwrap();

    let info = h.mux.interface_info(vif).unwrap();
    assert_eq!(info.state, VifState::Active);
    assert_eq!(info.current_address, address);
    assert_ne!(info.permanent_address, address);
    assert_eq!(info.vlan_id, 9);

    // A second acknowledgment is a protocol error.
    assert!(matches!(
        h.mux.initialize_interface(vif, InitParams::default()),
        Err(MuxError::InvalidTransition { .. })
    ));
}

#[test]
fn test_bad_init_settings_fall_back() {
    let h = Harness::new();
    h.upper.set_auto_initialize(false);
    let b = h.open("eth0");
    let vif = h.mux.create_interface(b, "odd").unwrap();
    let multicast = MacAddress::new([0x03, 0, 0, 0, 0, 1]);
    h.mux
        .initialize_interface(
            vif,
            InitParams {
                network_address: Some(multicast),
                vlan_id: 4095,
                strip_passthrough_tags: false,
            },
        )
        .unwrap();

    let info = h.mux.interface_info(vif).unwrap();
    assert_eq!(info.vlan_id, VlanId::UNTAGGED.as_u16());
    assert_eq!(info.current_address, info.permanent_address);
}

#[test]
fn test_instantiation_failure_unlinks() {
    let h = Harness::new();
    h.upper.set_auto_initialize(false);
    let b = h.open("eth0");
    let vif = h.mux.create_interface(b, "late").unwrap();

    h.mux.instantiation_failed(vif).unwrap();
    assert_eq!(h.mux.binding_info(b).unwrap().interfaces, 0);
    assert!(h.mux.instantiation_failed(vif).is_err());
}

#[test]
fn test_halt_waits_for_pending_instantiation() {
    let h = Harness::new();
    h.upper.set_auto_initialize(false);
    let b = h.open("eth0");
    let vif = h.mux.create_interface(b, "slow").unwrap();

    let mux = Arc::clone(&h.mux);
    let acknowledger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        mux.initialize_interface(vif, InitParams::default()).unwrap();
    });

    h.mux.halt(vif).unwrap();
    acknowledger.join().unwrap();

    assert_eq!(h.upper.teardowns(), vec![vif]);
    assert_eq!(h.upper.halted(), vec![vif]);
    assert_eq!(h.mux.binding_info(b).unwrap().interfaces, 0);
}

#[test]
fn test_halt_is_idempotent() {
    let h = Harness::new();
    h.upper.set_auto_halt(false);
    let b = h.open("eth0");
    let vif = h.active(b, "vlan5", 5);

    h.mux.halt(vif).unwrap();
    h.mux.halt(vif).unwrap();
    assert_eq!(h.upper.teardowns(), vec![vif]);
    assert_eq!(h.mux.interface_state(vif).unwrap(), VifState::Halting);

    h.mux.on_instance_halt(vif).unwrap();
    assert_eq!(h.upper.halted(), vec![vif]);
}

#[test]
fn test_halt_drains_pending_send() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.lower.pend_sends(true);
    h.mux
        .send(vif, vec![SendRequest::new(11, ethernet(MacAddress::BROADCAST))])
        .unwrap();

    let lower = Arc::clone(&h.lower);
    let mux = Arc::clone(&h.mux);
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        lower.complete_send(&mux, LowerStatus::Success).unwrap();
    });

    h.mux.halt(vif).unwrap();
    completer.join().unwrap();

    let events = h.upper.events();
    let sent = events
        .iter()
        .position(|e| matches!(e, UpperEvent::SendComplete(_, 11, Ok(()))))
        .unwrap();
    let halted = events
        .iter()
        .position(|e| matches!(e, UpperEvent::Halted(_)))
        .unwrap();
    assert!(sent < halted);
}

#[test]
fn test_stale_handle_does_not_resolve() {
    let h = Harness::new();
    let b = h.open("eth0");
    let first = h.active(b, "one", 0);
    h.mux.halt(first).unwrap();

    let second = h.active(b, "two", 0);
    assert_eq!(second.slot, first.slot);
    assert_ne!(second.generation, first.generation);
    assert!(h.mux.interface_info(first).is_err());
    assert_eq!(h.mux.interface_info(second).unwrap().name, "two");
}

#[test]
fn test_create_on_closing_binding_is_refused() {
    let h = Harness::new();
    h.lower.pend_close(true);
    let b = h.mux.bind("eth0", &["vlan5"]).unwrap();

    let mux = Arc::clone(&h.mux);
    let unbinder = thread::spawn(move || mux.unbind(b));
    while h.lower.closed().is_empty() {
        thread::sleep(Duration::from_millis(1));
    }

    assert!(matches!(
        h.mux.create_interface(b, "vlan6"),
        Err(CreateError::BindingClosing { .. })
    ));
    assert!(matches!(h.mux.unbind(b), Err(MuxError::Closing(_))));

    assert_eq!(h.lower.finish_close(), 1);
    unbinder.join().unwrap().unwrap();
    assert!(h.mux.bindings().is_empty());
}

#[test]
fn test_references_balance_over_interface_lifetime() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "vlan5", 5);
    let iface = h.mux.interface(vif).unwrap();

    h.mux
        .send(vif, vec![SendRequest::new(1, ethernet(MacAddress::BROADCAST))])
        .unwrap();
    h.mux.on_frame_received(b, broadcast(2, vlan(5)));
    h.mux.on_receive_batch_complete(b);
    h.mux.query(vif, Oid::LINK_SPEED, 4).unwrap();
    h.mux.on_status(b, StatusIndication::new(StatusCode::MediaDisconnect));
    h.mux.on_status_complete(b);
    assert_eq!(h.extra_references(vif), 0);

    h.mux.halt(vif).unwrap();
    assert_eq!(h.upper.halted(), vec![vif]);

    let refs = iface.references();
    assert_eq!(refs.count, 0);
    assert_eq!(refs.frees, 1);
    assert_eq!(refs.acquires, refs.releases);
    // Allocation, send, receive, request, status and the batch flush.
    assert!(refs.acquires >= 6, "{refs:?}");
}

#[test]
fn test_interface_halted_from_a_completion_callback_is_freed_once() {
    let h = Harness::new();
    let bind = h.open("eth0");
    let first = h.active(bind, "first", 0);
    let second = h.active(bind, "second", 0);
    let victim = h.mux.interface(second).unwrap();

    h.upper.set_on_indication_complete(move |mux, vif, kind| {
        if vif == first && kind == IndicationKind::Receive {
            mux.on_instance_halt(second).unwrap();
        }
    });
    assert_eq!(h.mux.on_frame_received(bind, broadcast(1, None)), 2);
    h.mux.on_receive_batch_complete(bind);

    assert_eq!(h.upper.halted(), vec![second]);
    assert!(!h
        .upper
        .events()
        .contains(&UpperEvent::IndicationComplete(second, IndicationKind::Receive)));
    // One frame came back through the upper layer, the other from the halt.
    assert_eq!(h.lower.returned().len(), 2);

    let refs = victim.references();
    assert_eq!(refs.count, 0);
    assert_eq!(refs.frees, 1);
    assert_eq!(refs.acquires, refs.releases);
}

#[test]
fn test_frames_racing_a_halt_are_all_returned() {
    let h = Harness::new();
    let b = h.open("eth0");
    h.active(b, "keep", 0);
    let victim = h.active(b, "victim", 0);
    let iface = h.mux.interface(victim).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let receiver = {
        let mux = Arc::clone(&h.mux);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut retained = 0;
            let mut id = 0;
            while !stop.load(Ordering::SeqCst) {
                retained += mux.on_frame_received(b, broadcast(id, None));
                id += 1;
                if id % 4 == 0 {
                    mux.on_receive_batch_complete(b);
                }
            }
            mux.on_receive_batch_complete(b);
            retained
        })
    };

    thread::sleep(Duration::from_millis(5));
    h.mux.halt(victim).unwrap();
    thread::sleep(Duration::from_millis(5));
    stop.store(true, Ordering::SeqCst);
    let retained = receiver.join().unwrap();

    assert_eq!(h.upper.halted(), vec![victim]);
    assert_eq!(h.lower.returned().len(), retained);
    let refs = iface.references();
    assert_eq!(refs.count, 0);
    assert_eq!(refs.frees, 1);
    assert_eq!(refs.acquires, refs.releases);
}
