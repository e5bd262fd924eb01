//! Decoy header provider — fixed bytes mimicking a PNG or WebP file
//! header, used only to make a vault blob look innocuous to casual
//! inspection. No cryptographic role.

const PADDING_BOUNDARY: usize = 128;

// PNG signature + a minimal (invalid past the signature, which is all that
// matters for a casual look) IHDR chunk stub.
const PNG_MAGIC: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
    0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', // IHDR, length 13
];

// RIFF....WEBP container header.
const WEBP_MAGIC: &[u8] = &[
    b'R', b'I', b'F', b'F', 0x00, 0x00, 0x00, 0x00, b'W', b'E', b'B', b'P',
];

/// Returns the decoy prefix for `ext`, already padded to a multiple of 128
/// bytes. `ext == "bin"` (or anything else unrecognized) carries no decoy.
pub fn prefix(ext: &str) -> Vec<u8> {
    let magic: &[u8] = match ext {
        "png" => PNG_MAGIC,
        "webp" => WEBP_MAGIC,
        _ => return Vec::new(),
    };
    pad_to_boundary(magic)
}

fn pad_to_boundary(magic: &[u8]) -> Vec<u8> {
    let mut out = magic.to_vec();
    let rem = out.len() % PADDING_BOUNDARY;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(PADDING_BOUNDARY - rem));
    } else if out.is_empty() {
        out.extend(std::iter::repeat(0u8).take(PADDING_BOUNDARY));
    }
    out
}
