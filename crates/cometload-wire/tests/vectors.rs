use cometload_wire::{
    DEFAULT_MAX_FRAME_BYTES, Dialect, OutboundAck, decode, encode, encode_ack, encode_heartbeat,
};
use std::fs;

#[test]
fn vectors_match_frame_encoding() {
    let dir = "tests/vectors";
    let mut seen = 0;
    for entry in fs::read_dir(dir).expect("read vectors dir") {
        let entry = entry.expect("entry");
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let contents = fs::read_to_string(&path).expect("read vector");
        let value: serde_json::Value = serde_json::from_str(&contents).expect("json");
        let dialect = Dialect::parse(value["dialect"].as_str().expect("dialect")).expect("known");
        let frame_expected = value["frame"].as_str().expect("frame").as_bytes();

        let payload = match value["kind"].as_str().expect("kind") {
            "ack" => encode_ack(
                dialect,
                &OutboundAck {
                    sequence: value["sequence"].as_i64().expect("sequence"),
                    sender: value["sender"].as_str().expect("sender").to_string(),
                },
            )
            .expect("ack"),
            "heartbeat" => encode_heartbeat(dialect).expect("heartbeat"),
            other => panic!("unknown vector kind {other}"),
        };
        assert_eq!(
            encode(&payload).as_ref(),
            frame_expected,
            "frame mismatch for {:?}",
            path
        );

        let (decoded, consumed) =
            decode(frame_expected, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(decoded, payload, "round trip mismatch for {:?}", path);
        assert_eq!(consumed, frame_expected.len());
        seen += 1;
    }
    assert!(seen >= 4, "expected vector files under {dir}");
}
