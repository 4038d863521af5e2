//! Integration tests for the DPI model

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use x0t_core::dpi::{DpiModel, RAW_MESH_SIGNATURE};
use x0t_core::stego::{MimicProtocol, StegoCodec};

#[test]
fn test_raw_heartbeat_detected() {
    let verdict = DpiModel::new().inspect(br#"{"type":"heartbeat","node_id":"n1"}"#);
    assert!(verdict.detected);
    assert_eq!(verdict.detected_as.as_deref(), Some(RAW_MESH_SIGNATURE));
    assert_eq!(verdict.threat_level, 10);
}

#[test]
fn test_random_bytes_detected_by_entropy() {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut data = vec![0u8; 512];
    rng.fill_bytes(&mut data);
    // keep the first bytes away from every mimic and forbidden prefix
    data[0] = 0xAA;
    data[1] = 0xBB;
    data[2] = 0xCC;
    data[3] = 0xDD;

    let verdict = DpiModel::new().inspect(&data);
    assert!(verdict.entropy > 7.0);
    assert!(verdict.detected);
    assert_eq!(verdict.threat_level, 7);
    assert!(!verdict.mimic_valid);
}

#[test]
fn test_known_tunnels_detected() {
    let model = DpiModel::new();
    let cases: &[(&[u8], &str)] = &[
        (&[0x01, 0x00, 0x00, 0x00, 0x12], "WireGuard"),
        (&[0x00, 0x0e, 0x38, 0x01], "OpenVPN"),
        (&[0x05, 0x01, 0x00], "SOCKS5"),
        (b"CONNECT example.com:443 HTTP/1.1\r\n", "HTTP_CONNECT"),
    ];
    for (packet, name) in cases {
        let verdict = model.inspect(packet);
        assert!(verdict.detected, "{name} not detected");
        assert_eq!(verdict.detected_as.as_deref(), Some(*name));
    }
}

#[test]
fn test_stego_packets_pass() {
    let codec = StegoCodec::new(&[0x42; 32]).unwrap();
    let model = DpiModel::new();
    for mimic in MimicProtocol::ALL {
        let packet = &codec.encode(br#"{"type":"heartbeat"}"#, mimic, None)[0];
        let verdict = model.inspect(packet);
        assert!(!verdict.detected, "{mimic} packet detected");
        assert!(verdict.mimic_valid);
        assert_eq!(verdict.mimic_protocol, Some(mimic));
    }
}

#[test]
fn test_empty_packet() {
    let verdict = DpiModel::new().inspect(&[]);
    assert!(!verdict.detected);
    assert_eq!(verdict.entropy, 0.0);
    assert_eq!(verdict.threat_level, 0);
}
