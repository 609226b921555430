//! FNV-1a hashing and a PBKDF2-*style* key derivation.
//!
//! Neither of these is cryptographically hardened. The module code hash
//! exists to seed the RNG and to key the `rc4-derived` string-encryption
//! scheme, not to resist collision attacks; the KDF exists only to raise
//! the work factor of recovering plaintext from an encrypted string one
//! guess at a time, not to meet any PBKDF2 standard. Treat both as
//! obfuscation-grade, matching spec §7.

/// 64-bit FNV-1a over an arbitrary byte string.
#[must_use]
pub fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// FNV-1a over several byte slices, as if they had been concatenated —
/// avoids an allocation for the common case of hashing a handful of
/// already-separate fields (an opcode byte, then a name).
#[must_use]
pub fn fnv1a64_chain(parts: &[&[u8]]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for part in parts {
        for &byte in *part {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

/// Derives 32 bytes from `password`/`salt` by iterating four parallel
/// FNV-1a chains, each reseeded every round from its own previous output
/// plus `password` and `salt`. `iterations` is clamped to at least 1.
#[must_use]
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut chains = [0u64; 4];
    for (lane, chain) in chains.iter_mut().enumerate() {
        *chain = fnv1a64_chain(&[password, salt, &[lane as u8]]);
    }

    for _ in 0..iterations.max(1) {
        for chain in &mut chains {
            let prev = chain.to_le_bytes();
            *chain = fnv1a64_chain(&[&prev, password, salt]);
        }
    }

    let mut out = [0u8; 32];
    for (lane, chain) in chains.iter().enumerate() {
        out[lane * 8..lane * 8 + 8].copy_from_slice(&chain.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a64_is_stable() {
        assert_eq!(fnv1a64(b"hello"), fnv1a64(b"hello"));
        assert_ne!(fnv1a64(b"hello"), fnv1a64(b"hellp"));
    }

    #[test]
    fn fnv1a64_empty_is_offset_basis() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(b"pw", b"salt1234", 100);
        let b = derive_key(b"pw", b"salt1234", 100);
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_distinguishes_salts() {
        let a = derive_key(b"pw", b"salt0001", 1000);
        let b = derive_key(b"pw", b"salt0002", 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn derive_key_zero_iterations_does_not_panic() {
        let _ = derive_key(b"pw", b"salt", 0);
    }

    #[test]
    fn derive_key_changes_with_iteration_count() {
        let a = derive_key(b"pw", b"salt", 1);
        let b = derive_key(b"pw", b"salt", 2);
        assert_ne!(a, b);
    }
}
