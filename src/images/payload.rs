//! Payload sniffing: just enough container inspection to decide whether a
//! payload is worth handing to a decoder.

use crate::models::PayloadFormat;

/// Offset of the `DICM` magic in a Part 10 file (after the 128-byte preamble)
const DICOM_PREAMBLE_LEN: usize = 128;

/// Root shared by every DICOM transfer syntax UID
const TRANSFER_SYNTAX_ROOT: &[u8] = b"1.2.840.10008.1.2";

/// The file meta group is small; never scan further than this
const META_SCAN_LIMIT: usize = 4096;

/// Guess the container format from magic numbers.
pub fn sniff(bytes: &[u8]) -> PayloadFormat {
    if bytes.len() >= DICOM_PREAMBLE_LEN + 4
        && &bytes[DICOM_PREAMBLE_LEN..DICOM_PREAMBLE_LEN + 4] == b"DICM"
    {
        return PayloadFormat::Dicom;
    }
    if bytes.starts_with(b"DICM") {
        return PayloadFormat::Dicom;
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return PayloadFormat::Png;
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return PayloadFormat::Jpeg;
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return PayloadFormat::Gif;
    }
    if bytes.starts_with(b"BM") && bytes.len() > 14 {
        return PayloadFormat::Bmp;
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return PayloadFormat::Webp;
    }
    PayloadFormat::Unknown
}

/// Extract the transfer syntax UID from a DICOM file meta header.
///
/// Scans the meta group for the first UID under the transfer syntax root and
/// reads it up to the first byte that cannot belong to a UID (padding `\0`,
/// space, or the next element's tag).
pub fn transfer_syntax(bytes: &[u8]) -> Option<String> {
    let window = &bytes[..bytes.len().min(META_SCAN_LIMIT)];
    let start = window
        .windows(TRANSFER_SYNTAX_ROOT.len())
        .position(|w| w == TRANSFER_SYNTAX_ROOT)?;

    let uid: String = window[start..]
        .iter()
        .take(64)
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| char::from(*b))
        .collect();

    let uid = uid.trim_end_matches('.');
    (!uid.is_empty()).then(|| uid.to_string())
}

/// Whether a transfer syntax is on the refusal list.
pub fn is_unsupported_syntax(uid: &str, unsupported: &[String]) -> bool {
    unsupported.iter().any(|u| u == uid)
}

#[cfg(test)]
pub(crate) fn dicom_with_syntax(uid: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; DICOM_PREAMBLE_LEN];
    bytes.extend_from_slice(b"DICM");
    // (0002,0010) UI, explicit VR little endian
    bytes.extend_from_slice(&[0x02, 0x00, 0x10, 0x00, b'U', b'I']);
    let mut value = uid.as_bytes().to_vec();
    if value.len() % 2 == 1 {
        value.push(0);
    }
    bytes.extend_from_slice(&(value.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&value);
    bytes.extend_from_slice(&[0x08, 0x00, 0x16, 0x00]);
    bytes
}
