//! Line framing of worker stdout.

use agent_relay::worker::codec::LineCodec;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[test]
fn splits_complete_lines() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\npartial");

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("{\"a\":1}".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("{\"b\":2}".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode eof"),
        Some("partial".into())
    );
}

#[test]
fn strips_carriage_returns() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("line\r\n");

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("line".into()));
}

#[test]
fn over_long_line_is_dropped_and_decoding_continues() {
    let mut codec = LineCodec::with_max_length(8);
    let mut buf = BytesMut::from("first\n0123456789abcdef\nok\n");

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("first".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("ok".into()));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
}

#[test]
fn over_long_line_split_across_reads_is_dropped() {
    let mut codec = LineCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert!(buf.is_empty(), "oversized partial line is released");

    buf.extend_from_slice(b"abcdef\nnext\n");
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("next".into()));
}

#[test]
fn line_at_exact_limit_is_kept() {
    let mut codec = LineCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcd\n");

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("abcd".into()));
}

#[test]
fn invalid_utf8_is_replaced_not_fatal() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(&b"one\n\xff\xfebad\ntwo\n"[..]);

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("one".into()));
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("\u{fffd}\u{fffd}bad".into())
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some("two".into()));
}

#[test]
fn partial_line_scan_resumes_after_more_input() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    buf.extend_from_slice(b"\"result\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("{\"type\":\"result\"}".into())
    );
}
