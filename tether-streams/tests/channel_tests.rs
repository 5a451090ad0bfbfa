//! MessageChannel over in-memory byte streams.

use std::io;
use std::time::Duration;

use rstest::rstest;
use serde::Serialize;
use serde_json::{json, Value};
use tether_core::{ChannelConfig, ParseErrorPolicy};
use tether_streams::{ChannelError, ChannelEvent, LineDecoder, MessageChannel};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

fn channel_pair() -> (MessageChannel<DuplexStream>, DuplexStream, DuplexStream) {
    let (outbound, peer_reader) = duplex(4096);
    let (peer_writer, inbound) = duplex(4096);
    (MessageChannel::new(outbound, inbound), peer_reader, peer_writer)
}

async fn next_message(channel: &MessageChannel<DuplexStream>) -> Value {
    match tokio::time::timeout(Duration::from_secs(5), channel.recv()).await {
        Ok(Some(ChannelEvent::Message(value))) => value,
        other => panic!("expected a message, got {other:?}"),
    }
}

async fn wait_pending(channel: &MessageChannel<DuplexStream>, expected: &[u8]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.pending() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("inbound bytes should be buffered");
}

// ---------------------------------------------------------------------------
// 1. Framing
// ---------------------------------------------------------------------------

#[rstest]
#[case(vec!["{\"a\":1}\n{\"b\":2}\n{\"c\""])]
#[case(vec!["{\"a\"", ":1}\n{\"b\":2", "}\n{\"c\""])]
#[case(vec!["{\"a\":1}", "\n", "{\"b\":2}\n{", "\"c\""])]
fn fragments_yield_two_messages_and_keep_tail(#[case] fragments: Vec<&str>) {
    let mut decoder = LineDecoder::new();
    let mut decoded = Vec::new();
    for fragment in fragments {
        decoded.extend(decoder.feed(fragment.as_bytes()));
    }

    let values: Vec<Value> = decoded
        .into_iter()
        .map(|item| item.expect("valid line"))
        .collect();
    assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    assert_eq!(decoder.pending(), b"{\"c\"");
}

#[test]
fn byte_at_a_time_feed_matches_whole_feed() {
    let wire = b"{\"a\":1}\n{\"b\":2}\n{\"c\"";
    let mut decoder = LineDecoder::new();
    let mut values = Vec::new();
    for byte in wire {
        for item in decoder.feed(std::slice::from_ref(byte)) {
            values.push(item.expect("valid line"));
        }
    }
    assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    assert_eq!(decoder.pending(), b"{\"c\"");
}

#[tokio::test]
async fn inbound_fragments_are_emitted_in_order_and_tail_retained() {
    let (channel, _peer_reader, mut peer_writer) = channel_pair();

    for fragment in ["{\"state\":\"al", "ive\"}\n[1,", "2]\n{\"pid\""] {
        peer_writer.write_all(fragment.as_bytes()).await.expect("write");
        peer_writer.flush().await.expect("flush");
    }
    drop(peer_writer);

    assert_eq!(next_message(&channel).await, json!({"state": "alive"}));
    assert_eq!(next_message(&channel).await, json!([1, 2]));
    assert!(channel.recv().await.is_none(), "EOF ends the event stream");
    assert_eq!(channel.pending(), b"{\"pid\"");
}

#[tokio::test]
async fn flush_discards_stale_partial_line() {
    let (channel, _peer_reader, mut peer_writer) = channel_pair();

    peer_writer.write_all(b"{\"from\":\"old-incarn").await.expect("write");
    wait_pending(&channel, b"{\"from\":\"old-incarn").await;

    channel.flush();
    assert!(channel.pending().is_empty());

    peer_writer.write_all(b"{\"from\":\"new\"}\n").await.expect("write");
    assert_eq!(next_message(&channel).await, json!({"from": "new"}));
}

// ---------------------------------------------------------------------------
// 2. Parse errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_line_is_reported_and_framing_continues() {
    let (channel, _peer_reader, mut peer_writer) = channel_pair();

    peer_writer
        .write_all(b"{\"n\":1}\n{oops\n{\"n\":2}\n")
        .await
        .expect("write");
    drop(peer_writer);

    assert_eq!(next_message(&channel).await, json!({"n": 1}));
    match channel.recv().await {
        Some(ChannelEvent::Error(ChannelError::Parse { line, .. })) => assert_eq!(line, "{oops"),
        other => panic!("expected parse error, got {other:?}"),
    }
    assert_eq!(next_message(&channel).await, json!({"n": 2}));
    assert!(channel.recv().await.is_none());
    assert!(channel.pending().is_empty());
}

#[tokio::test]
async fn skip_policy_drops_malformed_lines_silently() {
    let (outbound, _peer_reader) = duplex(1024);
    let (mut peer_writer, inbound) = duplex(1024);
    let config = ChannelConfig {
        on_parse_error: ParseErrorPolicy::Skip,
    };
    let channel = MessageChannel::with_config(outbound, inbound, &config);

    peer_writer
        .write_all(b"garbage\n{\"n\":1}\n")
        .await
        .expect("write");
    drop(peer_writer);

    match channel.recv().await {
        Some(ChannelEvent::Message(value)) => assert_eq!(value, json!({"n": 1})),
        other => panic!("expected the valid message only, got {other:?}"),
    }
    assert!(channel.recv().await.is_none());
}

#[tokio::test]
async fn inbound_read_failure_is_reported_then_stream_ends() {
    let (outbound, _peer_reader) = duplex(64);
    let inbound = tokio_test::io::Builder::new()
        .read(b"{\"a\":1}\n{\"b\"")
        .read_error(io::Error::other("pipe broke"))
        .build();
    let channel = MessageChannel::new(outbound, inbound);

    assert_eq!(next_message(&channel).await, json!({"a": 1}));
    match channel.recv().await {
        Some(ChannelEvent::Error(ChannelError::Io(err))) => {
            assert_eq!(err.to_string(), "pipe broke")
        }
        other => panic!("expected I/O error, got {other:?}"),
    }
    assert!(channel.recv().await.is_none(), "read failure ends the stream");
    assert_eq!(channel.pending(), b"{\"b\"");
}

// ---------------------------------------------------------------------------
// 3. Outbound
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Command<'a> {
    cmd: &'a str,
    pid: u32,
}

#[tokio::test]
async fn send_writes_exactly_one_terminated_frame() {
    let writer = tokio_test::io::Builder::new()
        .write(b"{\"cmd\":\"restart\",\"pid\":42}\n")
        .build();
    let (_peer_writer, inbound) = duplex(64);
    let channel = MessageChannel::new(writer, inbound);

    channel
        .send(&Command {
            cmd: "restart",
            pid: 42,
        })
        .await
        .expect("send");
}

#[tokio::test]
async fn failing_sink_surfaces_io_error_from_send() {
    let writer = tokio_test::io::Builder::new()
        .write_error(io::Error::other("sink closed"))
        .build();
    let (_peer_writer, inbound) = duplex(64);
    let channel = MessageChannel::new(writer, inbound);

    let err = channel.send(&json!({"cmd": "stop"})).await.unwrap_err();
    assert!(matches!(err, ChannelError::Io(_)), "got: {err}");
}

#[tokio::test]
async fn sent_messages_arrive_as_lines_at_the_peer() {
    let (channel, mut peer_reader, _peer_writer) = channel_pair();

    channel.send(&json!({"event": "process", "state": "start"})).await.expect("send");
    channel.send(&json!("stop")).await.expect("send");
    drop(channel);

    let mut received = String::new();
    peer_reader
        .read_to_string(&mut received)
        .await
        .expect("read");
    assert_eq!(
        received,
        "{\"event\":\"process\",\"state\":\"start\"}\n\"stop\"\n"
    );
}

#[tokio::test]
async fn unencodable_message_fails_before_writing() {
    let (channel, mut peer_reader, _peer_writer) = channel_pair();

    let mut bad = std::collections::BTreeMap::new();
    bad.insert((1, 2), "tuple keys have no JSON form");
    let err = channel.send(&bad).await.unwrap_err();
    assert!(matches!(err, ChannelError::Serialization(_)), "got: {err}");

    channel.send(&json!({"after": true})).await.expect("send");
    drop(channel);

    let mut received = String::new();
    peer_reader
        .read_to_string(&mut received)
        .await
        .expect("read");
    assert_eq!(received, "{\"after\":true}\n");
}

#[tokio::test]
async fn two_channels_talk_to_each_other() {
    let (a_out, b_in) = duplex(1024);
    let (b_out, a_in) = duplex(1024);
    let supervisor = MessageChannel::new(a_out, a_in);
    let child = MessageChannel::new(b_out, b_in);

    supervisor.send(&json!({"cmd": "ready"})).await.expect("send");
    match child.recv().await {
        Some(ChannelEvent::Message(value)) => assert_eq!(value["cmd"], "ready"),
        other => panic!("unexpected {other:?}"),
    }

    child.send(&json!({"process": "start"})).await.expect("send");
    match supervisor.recv().await {
        Some(ChannelEvent::Message(value)) => assert_eq!(value["process"], "start"),
        other => panic!("unexpected {other:?}"),
    }
}
