use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use throttle_protocol::{Opcode, STATUS_FAIL, STATUS_OK, V_SIZE, write_v};
use throttle_server::{Server, ServerConfig, Transport};
use throttle_store::State;

fn start_server(port: u16) -> (Arc<State>, Server) {
    let state = Arc::new(State::new());
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    let server = Server::start(state.clone(), ServerConfig { transport: Transport::Tcp(addr), threads: Some(2) })
        .expect("server should bind and start");
    // give the acceptor thread a moment to register its listener.
    thread::sleep(Duration::from_millis(20));
    (state, server)
}

fn connect(port: u16) -> TcpStream {
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr) {
            stream.set_nodelay(true).unwrap();
            return stream;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("could not connect to {addr}");
}

fn insert_frame(quota: u16, ttl_unit: u8, ttl: u16, key: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Insert.as_u8()];
    write_v(quota, &mut out);
    out.push(ttl_unit);
    write_v(ttl, &mut out);
    out.push(key.len() as u8);
    out.extend_from_slice(key);
    out
}

fn query_frame(key: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Query.as_u8()];
    out.push(key.len() as u8);
    out.extend_from_slice(key);
    out
}

fn set_frame(ttl_unit: u8, ttl: u16, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Set.as_u8()];
    out.push(ttl_unit);
    write_v(ttl, &mut out);
    out.push(key.len() as u8);
    write_v(value.len() as u16, &mut out);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

fn get_frame(key: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Get.as_u8()];
    out.push(key.len() as u8);
    out.extend_from_slice(key);
    out
}

fn subscribe_frame(channel: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Subscribe.as_u8()];
    out.push(channel.len() as u8);
    out.extend_from_slice(channel);
    out
}

fn publish_frame(channel: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Publish.as_u8()];
    out.push(channel.len() as u8);
    write_v(value.len() as u16, &mut out);
    out.extend_from_slice(channel);
    out.extend_from_slice(value);
    out
}

fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).expect("peer closed before sending the expected bytes");
    buf
}

const SECONDS: u8 = 3; // TtlUnit::Seconds

#[test]
fn insert_then_query_round_trips_the_quota() {
    let (_state, server) = start_server(24801);
    let mut client = connect(24801);

    client.write_all(&insert_frame(10, SECONDS, 60, b"tcp-a")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    client.write_all(&query_frame(b"tcp-a")).unwrap();
    let mut header = read_exact(&mut client, 1 + V_SIZE + 1);
    assert_eq!(header.remove(0), STATUS_OK);
    let quota = u16::from_le_bytes(header[..V_SIZE].try_into().unwrap());
    assert_eq!(quota, 10);
    let ttl_unit = header[V_SIZE];
    assert_eq!(ttl_unit, SECONDS);
    let remaining_ttl = read_exact(&mut client, V_SIZE);
    assert!(u16::from_le_bytes(remaining_ttl.try_into().unwrap()) <= 60);

    server.stop();
}

#[test]
fn duplicate_insert_fails() {
    let (_state, server) = start_server(24802);
    let mut client = connect(24802);

    client.write_all(&insert_frame(5, SECONDS, 30, b"dup")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    client.write_all(&insert_frame(5, SECONDS, 30, b"dup")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_FAIL]);

    server.stop();
}

#[test]
fn set_then_get_round_trips_the_value() {
    let (_state, server) = start_server(24803);
    let mut client = connect(24803);

    client.write_all(&set_frame(SECONDS, 60, b"blob", b"hello")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    client.write_all(&get_frame(b"blob")).unwrap();
    let mut header = read_exact(&mut client, 1 + 1 + V_SIZE + V_SIZE);
    assert_eq!(header.remove(0), STATUS_OK);
    let value_len = u16::from_le_bytes(header[1 + V_SIZE..1 + 2 * V_SIZE].try_into().unwrap());
    assert_eq!(value_len, 5);
    let value = read_exact(&mut client, value_len as usize);
    assert_eq!(value, b"hello");

    server.stop();
}

#[test]
fn publish_fans_out_to_other_subscribers_but_not_the_publisher() {
    let (_state, server) = start_server(24804);
    let mut subscriber = connect(24804);
    let mut publisher = connect(24804);

    subscriber.write_all(&subscribe_frame(b"room")).unwrap();
    assert_eq!(read_exact(&mut subscriber, 1), vec![STATUS_OK]);

    publisher.write_all(&subscribe_frame(b"room")).unwrap();
    assert_eq!(read_exact(&mut publisher, 1), vec![STATUS_OK]);

    publisher.write_all(&publish_frame(b"room", b"hi")).unwrap();
    assert_eq!(read_exact(&mut publisher, 1), vec![STATUS_OK]);

    // the event frame: opcode, channel_size, value_size, channel bytes, value bytes.
    let event_header = read_exact(&mut subscriber, 1 + 1 + V_SIZE);
    assert_eq!(event_header[0], Opcode::Event.as_u8());
    let channel_len = event_header[1] as usize;
    let value_len = u16::from_le_bytes(event_header[2..2 + V_SIZE].try_into().unwrap()) as usize;
    let channel = read_exact(&mut subscriber, channel_len);
    let value = read_exact(&mut subscriber, value_len);
    assert_eq!(channel, b"room");
    assert_eq!(value, b"hi");

    // the publisher's own socket never receives its own publish as an event.
    publisher.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let mut probe = [0u8; 1];
    let res = publisher.read(&mut probe);
    assert!(matches!(res, Ok(0) | Err(_)), "publisher should not see its own event");

    server.stop();
}

#[test]
fn unsubscribe_is_idempotent_success() {
    let (_state, server) = start_server(24805);
    let mut client = connect(24805);

    client.write_all(&Opcode::Unsubscribe.as_u8().to_le_bytes()).unwrap();
    client.write_all(&[3]).unwrap();
    client.write_all(b"gap").unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    server.stop();
}

#[test]
fn ttl_expiry_fails_query_after_wait() {
    let (_state, server) = start_server(24807);
    let mut client = connect(24807);

    client.write_all(&insert_frame(1, SECONDS, 1, b"short-lived")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    thread::sleep(Duration::from_millis(1300));

    client.write_all(&query_frame(b"short-lived")).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_FAIL]);

    server.stop();
}

#[test]
fn pipelined_requests_get_ordered_responses() {
    let (_state, server) = start_server(24808);
    let mut client = connect(24808);

    // two frames written as a single `write_all` must still produce two
    // responses, in the order the requests were issued.
    let mut batch = insert_frame(1, SECONDS, 60, b"pipe-a");
    batch.extend_from_slice(&insert_frame(2, SECONDS, 60, b"pipe-b"));
    client.write_all(&batch).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);

    client.write_all(&query_frame(b"pipe-a")).unwrap();
    let mut first = read_exact(&mut client, 1 + V_SIZE + 1 + V_SIZE);
    assert_eq!(first.remove(0), STATUS_OK);
    assert_eq!(u16::from_le_bytes(first[..V_SIZE].try_into().unwrap()), 1);

    client.write_all(&query_frame(b"pipe-b")).unwrap();
    let mut second = read_exact(&mut client, 1 + V_SIZE + 1 + V_SIZE);
    assert_eq!(second.remove(0), STATUS_OK);
    assert_eq!(u16::from_le_bytes(second[..V_SIZE].try_into().unwrap()), 2);

    // one frame split across two separate writes must still be reassembled
    // into a single request.
    let split_frame = query_frame(b"pipe-a");
    let (head, tail) = split_frame.split_at(split_frame.len() / 2);
    client.write_all(head).unwrap();
    thread::sleep(Duration::from_millis(20));
    client.write_all(tail).unwrap();
    let mut split_response = read_exact(&mut client, 1 + V_SIZE + 1 + V_SIZE);
    assert_eq!(split_response.remove(0), STATUS_OK);
    assert_eq!(u16::from_le_bytes(split_response[..V_SIZE].try_into().unwrap()), 1);

    server.stop();
}

#[test]
fn list_reports_every_live_key() {
    let (_state, server) = start_server(24806);
    let mut client = connect(24806);

    for i in 0..40u16 {
        let key = format!("key-{i}");
        client.write_all(&insert_frame(1, SECONDS, 60, key.as_bytes())).unwrap();
        assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);
    }

    client.write_all(&[Opcode::List.as_u8()]).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);
    let fragment_count = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap());
    assert!(fragment_count >= 1);
    let mut seen_keys = 0usize;
    for _ in 0..fragment_count {
        let _fragment_index = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap());
        let entry_count = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap()) as usize;
        let mut key_lens = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let key_len = read_exact(&mut client, 1)[0] as usize;
            let _kind = read_exact(&mut client, 1)[0];
            let _ttl_unit = read_exact(&mut client, 1)[0];
            let _expires_at = read_exact(&mut client, 8);
            let _bytes_used = read_exact(&mut client, V_SIZE);
            key_lens.push(key_len);
        }
        for key_len in key_lens {
            let _ = read_exact(&mut client, key_len);
            seen_keys += 1;
        }
    }
    assert_eq!(seen_keys, 40);

    server.stop();
}

#[test]
fn list_splits_into_multiple_fragments_over_the_wire() {
    let (_state, server) = start_server(24809);
    let mut client = connect(24809);

    // each record's fixed part plus a padded key comfortably clears
    // FRAGMENT_MAX_BYTES (2048) once multiplied across 100 keys, so the
    // response must come back as more than one fragment.
    const KEY_COUNT: usize = 100;
    for i in 0..KEY_COUNT {
        let key = format!("fragment-key-{i:04}-padded-out-past-thirty-bytes");
        client.write_all(&insert_frame(1, SECONDS, 60, key.as_bytes())).unwrap();
        assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);
    }

    client.write_all(&[Opcode::List.as_u8()]).unwrap();
    assert_eq!(read_exact(&mut client, 1), vec![STATUS_OK]);
    let fragment_count = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap());
    assert!(fragment_count >= 2, "expected the 100-key list to span multiple fragments, got {fragment_count}");

    let mut seen_keys = 0usize;
    for _ in 0..fragment_count {
        let _fragment_index = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap());
        let entry_count = u64::from_le_bytes(read_exact(&mut client, 8).try_into().unwrap()) as usize;
        let mut key_lens = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let key_len = read_exact(&mut client, 1)[0] as usize;
            let _kind = read_exact(&mut client, 1)[0];
            let _ttl_unit = read_exact(&mut client, 1)[0];
            let _expires_at = read_exact(&mut client, 8);
            let _bytes_used = read_exact(&mut client, V_SIZE);
            key_lens.push(key_len);
        }
        for key_len in key_lens {
            let _ = read_exact(&mut client, key_len);
            seen_keys += 1;
        }
    }
    assert_eq!(seen_keys, KEY_COUNT);

    server.stop();
}
