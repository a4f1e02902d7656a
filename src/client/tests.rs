use super::*;
use bytes::BytesMut;
use crate::server::StreamingServer;
use crate::test_utils::{loopback, time_descriptor, time_domain, value_packet, voltage_descriptor};
use crate::types::{DataDescriptor, OffsetValue, SampleType};
use crate::wire::{AlreadySentHeader, DATA_HEADER_SIZE, NO_DOMAIN_PACKET, PacketKind};
use std::sync::atomic::{AtomicBool, Ordering};

fn pump(server: &StreamingServer, client: &StreamingClient) {
    loopback(server, client).unwrap();
}

fn drain(client: &StreamingClient) -> Vec<(u32, Packet)> {
    std::iter::from_fn(|| client.get_next_packet()).collect()
}

fn data(packet: &Packet) -> &DataPacket {
    packet.as_data().expect("data packet")
}

#[test]
fn samples_and_offset_survive_the_trip() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let packet = DataPacket::builder(1).f64_samples(&[1.5, -2.5]).offset(2.25).build();

    server.add_packet(3, packet.clone()).unwrap();
    pump(&server, &client);

    let received = drain(&client);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, 3);
    let value = data(&received[0].1);
    assert_eq!(value.packet_id(), 1);
    assert_eq!(value.sample_count(), 2);
    assert_eq!(value.offset(), OffsetValue::Float(2.25));
    assert_eq!(value.samples_as_f64(), vec![1.5, -2.5]);
}

#[test]
fn shared_domain_is_reconstructed_once() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let domain = time_domain(100, 2, 5);
    let p1 = value_packet(1, &[1.0, 2.0], &domain);
    let p2 = value_packet(2, &[3.0, 4.0], &domain);

    server.add_packet(7, p1.clone()).unwrap();
    server.add_packet(7, p2.clone()).unwrap();
    pump(&server, &client);

    let received = drain(&client);
    assert_eq!(received.len(), 2);
    let d1 = data(&received[0].1).domain_packet().unwrap();
    let d2 = data(&received[1].1).domain_packet().unwrap();
    assert!(d1.ptr_eq(d2));
    assert_eq!(d1.packet_id(), 100);
    assert_eq!(d1.offset(), OffsetValue::Int(5));
    assert_eq!(client.stats().delivered, 2);
}

#[test]
fn buffers_waiting_for_a_domain_resolve_in_order() {
    let client = StreamingClient::default();
    let domain = DataPacket::builder(100).implicit_samples(1).build();

    // Value packet referencing a domain that has not arrived yet.
    let header = BufferHeader::Data(DataHeader::new(7, 2, 100, 1));
    let early = PacketBuffer::new(header, Bytes::copy_from_slice(&1.0f64.to_le_bytes()));
    client.add_buffer(early).unwrap();
    assert_eq!(client.pending_count(), 1);
    assert_eq!(client.available_packets_count(), 0);

    // The domain arrives embedded in another value packet.
    let server = StreamingServer::default();
    let carrier = DataPacket::builder(1).f64_samples(&[9.0]).domain(domain.clone()).build();
    server.add_packet(7, carrier.clone()).unwrap();
    pump(&server, &client);

    let ids: Vec<i64> = drain(&client).iter().map(|(_, p)| data(p).packet_id()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.stats().parked, 1);
}

#[test]
fn release_clears_references_and_is_idempotent() {
    let config = StreamingConfig { release_threshold: 1, ..Default::default() };
    let server = StreamingServer::new(config);
    let client = StreamingClient::default();
    let packet = DataPacket::builder(4).f64_samples(&[1.0]).build();

    server.add_packet(1, packet.clone()).unwrap();
    pump(&server, &client);
    drain(&client);
    assert!(!client.are_references_cleared());

    drop(packet);
    assert!(server.check_and_send_release_packet(false));
    pump(&server, &client);
    assert!(client.are_references_cleared());
    assert_eq!(client.stats().released, 1);

    let mut payload = BytesMut::new();
    payload.extend_from_slice(&4i64.to_le_bytes());
    payload.extend_from_slice(&99i64.to_le_bytes());
    client.add_buffer(PacketBuffer::new(BufferHeader::release(), payload.freeze())).unwrap();
    assert!(client.are_references_cleared());
    assert_eq!(client.stats().released, 1);
}

#[test]
fn already_sent_reuses_the_retained_packet() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let packet = DataPacket::builder(8).f64_samples(&[1.0, 2.0]).build();

    server.add_packet(1, packet.clone()).unwrap();
    server.add_packet(2, packet.clone()).unwrap();
    pump(&server, &client);

    let received = drain(&client);
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].0, 2);
    assert!(data(&received[0].1).ptr_eq(data(&received[1].1)));
}

#[test]
fn unknown_already_sent_reference_is_an_error() {
    let client = StreamingClient::default();
    let header = AlreadySentHeader::new(3, 77, NO_DOMAIN_PACKET);
    let buffer = PacketBuffer::new(BufferHeader::AlreadySent(header), Bytes::new());
    let result = client.add_buffer(buffer);

    assert!(matches!(
        result,
        Err(StreamingError::UnresolvedReference { signal_id: 3, packet_id: 77 })
    ));
    assert_eq!(client.available_packets_count(), 0);
}

#[test]
fn releasable_packets_are_not_retained() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();

    server.add_packet(1, DataPacket::builder(6).f64_samples(&[1.0]).build()).unwrap();
    pump(&server, &client);

    assert_eq!(drain(&client).len(), 1);
    assert!(client.are_references_cleared());
}

#[test]
fn descriptor_changes_merge_per_signal() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let voltage = DataDescriptor::new("voltage", SampleType::Float64).with_unit("V");
    let time = DataDescriptor::new("time", SampleType::Int64).with_linear_rule(0, 10);

    server
        .add_packet(7, EventPacket::descriptor_changed(Some(voltage.clone()), Some(time.clone())))
        .unwrap();
    let current = DataDescriptor::new("current", SampleType::Float64).with_unit("A");
    server.add_packet(7, EventPacket::descriptor_changed(Some(current.clone()), None)).unwrap();
    pump(&server, &client);

    let events = drain(&client);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(_, p)| p.packet_type() == crate::types::PacketType::Event));

    assert_eq!(
        client.get_data_descriptor_changed_event_packet(7),
        Some(EventPacket::descriptor_changed(Some(current), Some(time)))
    );
    assert_eq!(client.get_data_descriptor_changed_event_packet(8), None);
}

#[test]
fn data_packets_pick_up_descriptors() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let voltage = voltage_descriptor();
    let time = time_descriptor();
    server
        .add_packet(7, EventPacket::descriptor_changed(Some(voltage.clone()), Some(time.clone())))
        .unwrap();

    let domain = DataPacket::builder(100).implicit_samples(1).build();
    server
        .add_packet(7, DataPacket::builder(1).f64_samples(&[1.0]).domain(domain.clone()).build())
        .unwrap();
    pump(&server, &client);

    let received = drain(&client);
    let value = data(&received[1].1);
    assert_eq!(value.descriptor().map(|d| d.name.as_str()), Some("voltage"));
    let domain = value.domain_packet().unwrap();
    assert_eq!(domain.descriptor().map(|d| d.name.as_str()), Some("time"));
}

#[test]
fn extra_signals_receive_the_same_packet() {
    let server = StreamingServer::default();
    let client = StreamingClient::default();
    let packet = DataPacket::builder(1).f64_samples(&[1.0]).build();

    server.add_packet_for_signals(1, vec![2, 3], packet.clone()).unwrap();
    pump(&server, &client);

    let received = drain(&client);
    let signals: Vec<u32> = received.iter().map(|(signal_id, _)| *signal_id).collect();
    assert_eq!(signals, vec![1, 2, 3]);
    assert!(data(&received[0].1).ptr_eq(data(&received[2].1)));
}

#[test]
fn full_pending_table_drops_oldest_wait() {
    let config = StreamingConfig { max_pending_buffers: 1, ..Default::default() };
    let client = StreamingClient::new(config);
    for (packet_id, domain_packet_id) in [(1, 100), (2, 200)] {
        let header = DataHeader::new(1, packet_id, domain_packet_id, 0);
        client.add_buffer(PacketBuffer::new(BufferHeader::Data(header), Bytes::new())).unwrap();
    }

    assert_eq!(client.pending_count(), 1);
    assert_eq!(client.stats().evicted_pending, 1);
}

#[test]
fn truncated_frames_are_rejected() {
    let client = StreamingClient::default();
    let server = StreamingServer::default();
    server.add_packet(1, DataPacket::builder(1).f64_samples(&[1.0]).build()).unwrap();
    let frame = server.get_next_buffer().unwrap().encode();

    let result = client.add_frame(frame.slice(..frame.len() - 1));
    assert!(matches!(result, Err(StreamingError::Malformed { .. })));
    assert_eq!(client.available_packets_count(), 0);
}

#[test]
fn event_buffers_leave_no_references() {
    let client = StreamingClient::default();
    let event = EventPacket::ImplicitDomainGapDetected { gap: 2 };
    let payload = JsonEventSerializer.serialize(&event).unwrap();
    let buffer = PacketBuffer::new(BufferHeader::event(9), Bytes::from(payload));
    assert_eq!(buffer.kind(), PacketKind::Event);

    client.add_buffer(buffer).unwrap();
    match client.get_next_packet() {
        Some((9, Packet::Event(received))) => assert_eq!(received, event),
        other => panic!("Unexpected output {:?}", other),
    }
    assert!(client.are_references_cleared());
}

/// Data frame wrapping `levels` inline domain packets inside each other.
fn nested_inline_frame(levels: usize) -> Bytes {
    let mut frame = BytesMut::with_capacity(DATA_HEADER_SIZE * (levels + 1));
    for level in (1..=levels).rev() {
        let mut header = DataHeader::new(1, level as i64, level as i64 - 1, 0);
        header.set_inline_domain();
        header.generic.payload_size = (DATA_HEADER_SIZE * level) as u32;
        header.write_to(&mut frame);
    }
    DataHeader::new(1, 0, NO_DOMAIN_PACKET, 0).write_to(&mut frame);
    frame.freeze()
}

#[test]
fn inline_domains_resolve_up_to_the_depth_limit() {
    let client = StreamingClient::default();
    client.add_frame(nested_inline_frame(MAX_INLINE_DEPTH)).unwrap();

    let received = drain(&client);
    assert_eq!(received.len(), 1);
    let mut packet = data(&received[0].1).clone();
    assert_eq!(packet.packet_id(), MAX_INLINE_DEPTH as i64);
    while let Some(domain) = packet.domain_packet().cloned() {
        assert_eq!(domain.packet_id(), packet.packet_id() - 1);
        packet = domain;
    }
    assert_eq!(packet.packet_id(), 0);
}

#[test]
fn inline_domains_nested_too_deep_are_malformed() {
    let client = StreamingClient::default();
    for levels in [MAX_INLINE_DEPTH + 1, 10_000] {
        let result = client.add_frame(nested_inline_frame(levels));
        assert!(matches!(result, Err(StreamingError::Malformed { .. })));
    }
    assert_eq!(client.available_packets_count(), 0);
}

#[test]
fn decode_consumer_and_descriptor_threads_share_the_client() {
    const PACKETS: i64 = 200;
    let server = StreamingServer::default();
    let event =
        EventPacket::descriptor_changed(Some(voltage_descriptor()), Some(time_descriptor()));
    server.add_packet(1, event.clone()).unwrap();
    let domain = time_domain(1_000, 1, 0);
    let values: Vec<DataPacket> =
        (1..=PACKETS).map(|packet_id| value_packet(packet_id, &[1.0], &domain)).collect();
    for value in &values {
        server.add_packet(1, value.clone()).unwrap();
    }
    let mut frames: Vec<Bytes> =
        std::iter::from_fn(|| server.get_next_buffer()).map(|buffer| buffer.encode()).collect();
    drop((domain, values));
    assert!(server.check_and_send_release_packet(true));
    frames.extend(std::iter::from_fn(|| server.get_next_buffer()).map(|buffer| buffer.encode()));

    let client = StreamingClient::default();
    let consumed = AtomicBool::new(false);
    let received = std::thread::scope(|scope| {
        scope.spawn(|| {
            for frame in &frames {
                client.add_frame(frame.clone()).unwrap();
            }
        });
        scope.spawn(|| {
            while !consumed.load(Ordering::Acquire) {
                let current = client.get_data_descriptor_changed_event_packet(1);
                assert!(current.is_none() || current.as_ref() == Some(&event));
                std::thread::yield_now();
            }
        });
        let consumer = scope.spawn(|| {
            let mut received = Vec::new();
            while received.len() < PACKETS as usize + 1 {
                match client.get_next_packet() {
                    Some(item) => received.push(item),
                    None => std::thread::yield_now(),
                }
            }
            consumed.store(true, Ordering::Release);
            received
        });
        consumer.join().unwrap()
    });

    assert!(received.iter().all(|(signal_id, _)| *signal_id == 1));
    assert!(received[0].1.as_event().is_some());
    let ids: Vec<i64> = received[1..].iter().map(|(_, p)| data(p).packet_id()).collect();
    assert_eq!(ids, (1..=PACKETS).collect::<Vec<_>>());
    assert!(client.are_references_cleared());
    assert_eq!(client.stats().released, PACKETS as u64 + 1);
    assert_eq!(client.get_data_descriptor_changed_event_packet(1), Some(event));
}

#[test]
fn concurrent_callers_keep_a_carrier_ahead_of_its_dependent() {
    let server = StreamingServer::default();
    let domain = time_domain(100, 1, 0);
    let carrier = value_packet(1, &[1.0], &domain);
    let dependent = value_packet(2, &[2.0], &domain);
    server.add_packet(1, carrier.clone()).unwrap();
    server.add_packet(1, dependent.clone()).unwrap();
    let carrier_frame = server.get_next_buffer().unwrap().encode();
    let dependent_frame = server.get_next_buffer().unwrap().encode();

    for _ in 0..100 {
        let client = StreamingClient::default();
        std::thread::scope(|scope| {
            scope.spawn(|| client.add_frame(carrier_frame.clone()).unwrap());
            scope.spawn(|| client.add_frame(dependent_frame.clone()).unwrap());
        });
        let ids: Vec<i64> = drain(&client).iter().map(|(_, p)| data(p).packet_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
