//! SHA-256 fingerprints of serialized payloads.

use sha2::{Digest, Sha256};

pub const LEN: usize = 32;

/// Compute the 32-byte SHA-256 fingerprint of the given bytes.
pub fn compute(bytes: &[u8]) -> [u8; LEN] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; LEN];
    out.copy_from_slice(&digest);
    out
}

/// Render a fingerprint as lowercase hexadecimal.
pub fn to_hex(digest: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_of_known_digest() {
        let digest = compute(b"");
        assert_eq!(
            to_hex(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
