//! Query and set handling: local answers, forwarding and slot rules.

use netmux_core::{
    LowerStatus, MacAddress, MuxError, Oid, PacketFilter, PowerState, RequestKind, RequestOutcome,
    VifId, DRIVER_VERSION, VENDOR_ID,
};
use netmux_test::{broadcast, Harness, GROUP, MOCK_LINK_SPEED, MOCK_LOOKAHEAD};
use pretty_assertions::assert_eq;

fn answered(h: &Harness, vif: VifId, oid: Oid, len: usize) -> Vec<u8> {
    match h.mux.query(vif, oid, len).unwrap() {
        RequestOutcome::Complete(reply) => reply.data,
        RequestOutcome::Pending => panic!("{oid} was forwarded"),
    }
}

fn u32_of(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().unwrap())
}

#[test]
fn test_interface_objects_are_answered_locally() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "vlan5", 5);
    let info = h.mux.interface_info(vif).unwrap();

    assert_eq!(
        answered(&h, vif, Oid::CURRENT_ADDRESS, 6),
        info.current_address.as_bytes().to_vec()
    );
    assert_eq!(u32_of(&answered(&h, vif, Oid::VLAN_ID, 4)), 5);
    assert_eq!(u32_of(&answered(&h, vif, Oid::VENDOR_ID, 4)), VENDOR_ID);
    assert_eq!(
        answered(&h, vif, Oid::DRIVER_VERSION, 2),
        DRIVER_VERSION.to_le_bytes().to_vec()
    );
    assert_eq!(
        u32_of(&answered(&h, vif, Oid::CURRENT_PACKET_FILTER, 4)),
        (PacketFilter::DIRECTED | PacketFilter::BROADCAST | PacketFilter::MULTICAST).bits()
    );
    assert_eq!(
        u32_of(&answered(&h, vif, Oid::CURRENT_LOOKAHEAD, 4)),
        MOCK_LOOKAHEAD - 14
    );

    let supported = answered(&h, vif, Oid::SUPPORTED_LIST, 4 * Oid::SUPPORTED.len());
    assert_eq!(supported.len(), 4 * Oid::SUPPORTED.len());
    assert_eq!(u32_of(&supported), Oid::SUPPORTED_LIST.code());

    // Nothing reached the adapter beyond the open-time queries and the
    // adapter filter.
    assert!(h
        .lower
        .submitted()
        .iter()
        .all(|(_, oid, _)| *oid != Oid::VLAN_ID && *oid != Oid::SUPPORTED_LIST));
}

#[test]
fn test_counters_follow_buffer_width() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.mux.on_frame_received(b, broadcast(1, None));
    h.mux.on_receive_batch_complete(b);

    assert_eq!(answered(&h, vif, Oid::RCV_OK, 8), 1u64.to_le_bytes().to_vec());
    assert_eq!(answered(&h, vif, Oid::RCV_OK, 4), 1u32.to_le_bytes().to_vec());
    assert_eq!(answered(&h, vif, Oid::XMIT_OK, 8), 0u64.to_le_bytes().to_vec());
}

#[test]
fn test_short_buffer_reports_needed_size() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);

    assert_eq!(
        h.mux.query(vif, Oid::CURRENT_ADDRESS, 4),
        Err(MuxError::BufferTooShort { needed: 6 })
    );
    assert_eq!(
        h.mux.query(vif, Oid(0x0bad_0001), 4),
        Err(MuxError::InvalidOid(Oid(0x0bad_0001)))
    );
    assert!(matches!(
        h.mux.query(vif, Oid::SUPPORTED_GUIDS, 64),
        Err(MuxError::NotSupported(_))
    ));
}

#[test]
fn test_adapter_objects_are_forwarded_and_relayed() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.lower.answer(Oid::LINK_SPEED, 1000u32.to_le_bytes().to_vec());

    assert_eq!(
        h.mux.query(vif, Oid::LINK_SPEED, 4).unwrap(),
        RequestOutcome::Pending
    );
    assert_eq!(
        h.upper.query_results(),
        vec![(vif, Oid::LINK_SPEED, Ok(1000u32.to_le_bytes().to_vec()))]
    );
    assert_eq!(h.mux.interface_info(vif).unwrap().link_speed, 1000);
    assert_eq!(h.mux.interface_info(vif).unwrap().outstanding_sends, 0);
}

#[test]
fn test_wake_up_minimums_are_hidden() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);

    h.mux.query(vif, Oid::PNP_CAPABILITIES, 16).unwrap();
    let results = h.upper.query_results();
    let (_, _, Ok(data)) = &results[0] else {
        panic!("capabilities query failed: {results:?}");
    };
    assert_eq!(&data[..4], &[0xff; 4]);
    assert!(data[4..].iter().all(|b| *b == 0));
}

#[test]
fn test_lower_errors_are_mapped() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.lower
        .fail(Oid::MEDIA_CONNECT_STATUS, LowerStatus::AdapterNotReady);
    h.lower.fail(Oid::LINK_SPEED, LowerStatus::InvalidOid);

    h.mux.query(vif, Oid::MEDIA_CONNECT_STATUS, 4).unwrap();
    h.mux.query(vif, Oid::LINK_SPEED, 4).unwrap();

    let results = h.upper.query_results();
    assert!(matches!(results[0].2, Err(MuxError::NotReady(_))));
    assert_eq!(results[1].2, Err(MuxError::InvalidOid(Oid::LINK_SPEED)));
    // The cached speed is kept on failure.
    assert_eq!(h.mux.interface_info(vif).unwrap().link_speed, MOCK_LINK_SPEED);
}

#[test]
fn test_lookahead_set_is_widened_for_the_tag() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);

    h.mux
        .set(vif, Oid::CURRENT_LOOKAHEAD, &256u32.to_le_bytes())
        .unwrap();
    assert_eq!(
        h.lower.submitted_for(Oid::CURRENT_LOOKAHEAD),
        vec![260u32.to_le_bytes().to_vec()]
    );
    assert_eq!(h.upper.set_results(), vec![(vif, Oid::CURRENT_LOOKAHEAD, Ok(4))]);
    assert_eq!(h.mux.interface_info(vif).unwrap().lookahead, 260);
}

#[test]
fn test_set_validation() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);

    assert_eq!(
        h.mux.set(vif, Oid::CURRENT_PACKET_FILTER, &[1, 0]),
        Err(MuxError::InvalidLength {
            expected: 4,
            actual: 2
        })
    );
    assert!(matches!(
        h.mux.set(vif, Oid::CURRENT_PACKET_FILTER, &0x1000u32.to_le_bytes()),
        Err(MuxError::NotSupported(_))
    ));
    assert_eq!(
        h.mux.set(vif, Oid::VLAN_ID, &4095u32.to_le_bytes()),
        Err(MuxError::InvalidData(Oid::VLAN_ID))
    );
    assert_eq!(
        h.mux.set(vif, Oid::PNP_SET_POWER, &9u32.to_le_bytes()),
        Err(MuxError::InvalidData(Oid::PNP_SET_POWER))
    );
    assert_eq!(
        h.mux.set(vif, Oid::MAXIMUM_LIST_SIZE, &[0; 4]),
        Err(MuxError::InvalidOid(Oid::MAXIMUM_LIST_SIZE))
    );
}

#[test]
fn test_multicast_list_limits() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    let max = h.mux.config().max_multicast_list;

    assert!(matches!(
        h.mux.set(vif, Oid::MULTICAST_LIST, &[0x01; 7]),
        Err(MuxError::InvalidLength { actual: 7, .. })
    ));
    assert_eq!(
        h.mux
            .set(vif, Oid::MULTICAST_LIST, &vec![0x01; (max + 1) * MacAddress::LEN]),
        Err(MuxError::MulticastFull {
            needed: max * MacAddress::LEN
        })
    );

    h.mux.set(vif, Oid::MULTICAST_LIST, GROUP.as_bytes()).unwrap();
    assert_eq!(
        answered(&h, vif, Oid::MULTICAST_LIST, 6),
        GROUP.as_bytes().to_vec()
    );
    assert_eq!(
        u32_of(&answered(&h, vif, Oid::MAXIMUM_LIST_SIZE, 4)) as usize,
        max
    );
}

#[test]
fn test_vlan_id_can_change_at_runtime() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.mux.set(vif, Oid::VLAN_ID, &12u32.to_le_bytes()).unwrap();
    assert_eq!(h.mux.interface_info(vif).unwrap().vlan_id, 12);
}

#[test]
fn test_set_power_changes_interface_state() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);

    h.mux
        .set(vif, Oid::PNP_SET_POWER, &PowerState::D3.code().to_le_bytes())
        .unwrap();
    assert_eq!(h.mux.interface_info(vif).unwrap().power, PowerState::D3);
    assert!(matches!(
        h.mux.forward(vif, RequestKind::Query, Oid::LINK_SPEED, vec![0; 4]),
        Err(MuxError::NotReady(_))
    ));
    // Local answers still work while asleep.
    assert_eq!(u32_of(&answered(&h, vif, Oid::VLAN_ID, 4)), 0);
}

#[test]
fn test_busy_slot_refuses_local_answers_too() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.lower.pend_requests(true);

    h.mux.query(vif, Oid::LINK_SPEED, 4).unwrap();
    assert!(matches!(
        h.mux.query(vif, Oid::VLAN_ID, 4),
        Err(MuxError::Busy {
            kind: RequestKind::Query,
            ..
        })
    ));
    assert_eq!(h.lower.pending_requests(), 1);
    h.lower.complete_request(&h.mux, None).unwrap();
    assert_eq!(u32_of(&answered(&h, vif, Oid::VLAN_ID, 4)), 0);
}

#[test]
fn test_halt_waits_for_forwarded_request() {
    let h = Harness::new();
    let b = h.open("eth0");
    let vif = h.active(b, "pass", 0);
    h.lower.pend_requests(true);
    h.mux.query(vif, Oid::MEDIA_CONNECT_STATUS, 4).unwrap();
    assert_eq!(h.extra_references(vif), 1);

    let lower = std::sync::Arc::clone(&h.lower);
    let mux = std::sync::Arc::clone(&h.mux);
    let completer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        lower.complete_request(&mux, None).unwrap()
    });
    h.mux.halt(vif).unwrap();
    assert_eq!(completer.join().unwrap(), Oid::MEDIA_CONNECT_STATUS);

    assert_eq!(
        h.upper.query_results(),
        vec![(vif, Oid::MEDIA_CONNECT_STATUS, Ok(0u32.to_le_bytes().to_vec()))]
    );
    assert_eq!(h.upper.halted(), vec![vif]);
}
