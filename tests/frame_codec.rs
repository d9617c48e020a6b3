use wxlink::frame::{checksum, encode, verify_checksum, FRAME_HEADER};
use wxlink::schema::{ByteOrder, LIVE_DATA};
use wxlink::{decode, WxError};

#[test]
fn encode_is_deterministic_and_self_verifying() {
    let opcode = [0x27u8];
    for len in 0..=252usize {
        #[allow(clippy::cast_possible_truncation)]
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let a = encode(&opcode, &payload).expect("fits");
        let b = encode(&opcode, &payload).expect("fits");
        assert_eq!(a, b);
        verify_checksum(&a).expect("checksum recomputes");
        assert_eq!(a.len(), FRAME_HEADER.len() + 1 + len + 2);
        assert_eq!(usize::from(a[a.len() - 2]), FRAME_HEADER.len() + 1 + len);
    }
}

#[test]
fn oversize_frame_is_rejected() {
    let payload = vec![0u8; 253];
    assert!(matches!(
        encode(&[0x27], &payload),
        Err(WxError::InvalidFrame(_))
    ));
}

#[test]
fn header_is_outside_the_checksum() {
    let f = encode(&[0x27], &[]).expect("encode");
    assert_eq!(f, [0xFF, 0xFF, 0x27, 0x03, 0x2A]);
    assert_eq!(checksum(&f[2..4]), 0x2A);
}

#[test]
fn any_single_bit_flip_is_detected() {
    let f = encode(&[0x12, 0x00], &[1, 2, 3, 4]).expect("encode");
    for byte in FRAME_HEADER.len()..f.len() {
        for bit in 0..8 {
            let mut bad = f.clone();
            bad[byte] ^= 1 << bit;
            assert!(
                matches!(verify_checksum(&bad), Err(WxError::ChecksumInvalid { .. })),
                "flip of byte {byte} bit {bit} went unnoticed"
            );
        }
    }
}

#[test]
fn truncated_prefixes_never_fail() {
    let full: Vec<u8> = (0..104u8).collect();
    for order in [ByteOrder::Big, ByteOrder::Little, ByteOrder::Native] {
        for n in 0..=full.len() {
            let rec = decode(&full[..n], LIVE_DATA, order);
            assert_eq!(rec.len(), LIVE_DATA.len());
            assert_eq!(rec.is_complete(), n == full.len());
        }
    }
}
