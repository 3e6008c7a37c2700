//! Frame decoder behavior at the wire boundary: totality, exact section
//! accounting, and the documented malformed-input failures.

use meshdot::meshcore::{decode_frame, DecodeError, PayloadType, RouteType};

fn hex(input: &str) -> Vec<u8> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).expect("hex"))
        .collect()
}

#[test]
fn two_byte_frame_is_the_smallest_legal_input() {
    // routeType DIRECT needs no transport token; pathLen 0.
    let frame = decode_frame(&hex("02 00")).expect("decode");
    assert_eq!(frame.route_type, RouteType::Direct);
    assert!(frame.transport.is_none());
    assert!(frame.path.is_empty());
    assert!(frame.payload.is_empty());
}

#[test]
fn direct_req_frame_with_five_byte_payload() {
    // header 0x02: routeType DIRECT, payloadType REQ; no transport;
    // pathLen 0; everything after is payload.
    let frame = decode_frame(&hex("02 00 01 02 03 04 61")).expect("decode");
    assert_eq!(frame.route_type, RouteType::Direct);
    assert_eq!(frame.payload_type, PayloadType::Req);
    assert!(frame.transport.is_none());
    assert!(frame.path.is_empty());
    assert_eq!(frame.payload, hex("01 02 03 04 61"));
}

#[test]
fn section_lengths_account_for_every_input_byte() {
    let inputs: Vec<Vec<u8>> = vec![
        hex("02 00"),
        hex("02 02 aa bb cc dd"),
        hex("11 00 01 02 03"),
        hex("10 de ad be ef 01 42 99 98"),
        hex("03 01 02 03 04 00"),
    ];
    for input in inputs {
        let frame = decode_frame(&input).expect("decode");
        let transport_len = if frame.transport.is_some() { 4 } else { 0 };
        let consumed = 1 + transport_len + 1 + frame.path.len() + frame.payload.len();
        assert_eq!(consumed, input.len(), "input {:02x?}", input);
    }
}

#[test]
fn malformed_inputs_fail_with_typed_reasons() {
    assert!(matches!(
        decode_frame(&[]),
        Err(DecodeError::FrameTooShort { len: 0 })
    ));
    assert!(matches!(
        decode_frame(&[0x01]),
        Err(DecodeError::FrameTooShort { len: 1 })
    ));
    // TRANSPORT_FLOOD (route 0) declares a 4-byte token but only 1 remains.
    assert!(matches!(
        decode_frame(&hex("00 aa")),
        Err(DecodeError::TransportOverrun { remaining: 1 })
    ));
    // Path declares 200 hops into a 4-byte remainder.
    assert!(matches!(
        decode_frame(&hex("02 c8 01 02 03 04")),
        Err(DecodeError::PathOverrun {
            declared: 200,
            remaining: 4
        })
    ));
}

#[test]
fn every_header_byte_decodes_or_fails_without_panicking() {
    // Totality over the header space with a generous body.
    let body = hex("00 01 02 03 04 05 06 07");
    for header in 0u8..=255 {
        let mut input = vec![header];
        input.extend_from_slice(&body);
        let _ = decode_frame(&input);
    }
}

#[test]
fn transport_routes_consume_their_token() {
    let frame = decode_frame(&hex("03 01 02 03 04 00")).expect("decode");
    assert_eq!(frame.route_type, RouteType::TransportDirect);
    assert_eq!(frame.transport, Some([0x01, 0x02, 0x03, 0x04]));
    assert!(frame.path.is_empty());
    assert!(frame.payload.is_empty());
}
