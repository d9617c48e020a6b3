use crate::error::WxError;

/// Constant header that opens every command and reply frame.
pub const FRAME_HEADER: [u8; 2] = [0xFF, 0xFF];

/// Offset of the size field in a reply (`header(2) + command(1)`).
pub const SIZE_OFFSET: usize = 3;

pub(crate) fn hex_dump(b: &[u8]) -> String {
    b.iter()
        .map(|x| format!("{x:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 8-bit additive checksum.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a command frame: `header ++ opcode ++ payload ++ size ++ checksum`.
///
/// `size` counts the header, opcode and payload bytes; the checksum covers everything
/// after the header up to and including `size`.
///
/// # Errors
///
/// Returns `WxError::InvalidFrame` when the size does not fit the one-byte size field.
pub fn encode(opcode: &[u8], payload: &[u8]) -> Result<Vec<u8>, WxError> {
    let size = FRAME_HEADER.len() + opcode.len() + payload.len();
    let size = u8::try_from(size).map_err(|_| {
        WxError::InvalidFrame(format!(
            "opcode ({}) + payload ({}) too large for a one-byte size field",
            opcode.len(),
            payload.len()
        ))
    })?;

    let mut frame = Vec::with_capacity(usize::from(size) + 2);
    frame.extend_from_slice(&FRAME_HEADER);
    frame.extend_from_slice(opcode);
    frame.extend_from_slice(payload);
    frame.push(size);
    let sum = checksum(&frame[FRAME_HEADER.len()..]);
    frame.push(sum);
    Ok(frame)
}

/// Check the trailing checksum byte of a complete frame against the bytes between
/// the header and the checksum.
///
/// # Errors
///
/// `WxError::ChecksumInvalid` on mismatch, `WxError::Protocol` when the frame is too
/// short to carry a checksum.
pub fn verify_checksum(frame: &[u8]) -> Result<(), WxError> {
    if frame.len() < FRAME_HEADER.len() + 2 {
        return Err(WxError::Protocol(format!(
            "frame too short for checksum: {} bytes",
            frame.len()
        )));
    }
    let (body, tail) = frame.split_at(frame.len() - 1);
    let expected = checksum(&body[FRAME_HEADER.len()..]);
    let actual = tail[0];
    if expected == actual {
        Ok(())
    } else {
        Err(WxError::ChecksumInvalid { expected, actual })
    }
}

/// Patch the size field and trailing checksum of a reply built field-by-field.
///
/// The size field sits at [`SIZE_OFFSET`], is `size_width` bytes wide (1 or 2,
/// big-endian) and counts every byte after the header.
///
/// # Errors
///
/// Returns `WxError::InvalidFrame` when the frame is too short or its length does not
/// fit the size field.
pub fn finish_frame(frame: &mut [u8], size_width: usize) -> Result<(), WxError> {
    if frame.len() < SIZE_OFFSET + size_width + 1 {
        return Err(WxError::InvalidFrame(format!(
            "frame too short to finish: {} bytes",
            frame.len()
        )));
    }
    let size = frame.len() - FRAME_HEADER.len();
    match size_width {
        1 => {
            frame[SIZE_OFFSET] = u8::try_from(size)
                .map_err(|_| WxError::InvalidFrame(format!("size {size} exceeds u8")))?;
        }
        2 => {
            let v = u16::try_from(size)
                .map_err(|_| WxError::InvalidFrame(format!("size {size} exceeds u16")))?;
            frame[SIZE_OFFSET..SIZE_OFFSET + 2].copy_from_slice(&v.to_be_bytes());
        }
        other => {
            return Err(WxError::InvalidFrame(format!(
                "unsupported size field width: {other}"
            )))
        }
    }
    let last = frame.len() - 1;
    frame[last] = checksum(&frame[FRAME_HEADER.len()..last]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_command_bytes() {
        let f = encode(&[0x12, 0x00], &[]).expect("encode");
        assert_eq!(f, vec![0xFF, 0xFF, 0x12, 0x00, 0x04, 0x16]);
    }

    #[test]
    fn live_data_command_bytes() {
        let f = encode(&[0x27], &[]).expect("encode");
        assert_eq!(f, vec![0xFF, 0xFF, 0x27, 0x03, 0x2A]);
        verify_checksum(&f).expect("checksum of own frame");
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0x00);
    }

    #[test]
    fn oversize_is_invalid_frame() {
        let payload = vec![0u8; 254];
        let err = encode(&[0x01], &payload).expect_err("must not fit");
        assert!(matches!(err, WxError::InvalidFrame(_)));
        // 2 + 1 + 252 = 255 still fits
        assert!(encode(&[0x01], &payload[..252]).is_ok());
    }

    #[test]
    fn finish_frame_patches_size_and_sum() {
        let mut f = vec![0xFF, 0xFF, 0x34, 0x00, 0x01, 0x02, 0x00];
        finish_frame(&mut f, 1).expect("finish");
        assert_eq!(f[3], 5);
        verify_checksum(&f).expect("valid after finish");
    }
}
