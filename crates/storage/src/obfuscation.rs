//! Rolling-XOR value obfuscation.
//!
//! Values written by a store owner can be XORed with a fixed 8-byte key so
//! that raw database files do not contain wire-format material that other
//! software might misdetect. This is not encryption.

pub const OBFUSCATION_KEY_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Obfuscation {
    key: [u8; OBFUSCATION_KEY_SIZE],
}

impl Obfuscation {
    pub fn new(key: [u8; OBFUSCATION_KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn disabled() -> Self {
        Self {
            key: [0u8; OBFUSCATION_KEY_SIZE],
        }
    }

    pub fn key_bytes(&self) -> [u8; OBFUSCATION_KEY_SIZE] {
        self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.key != [0u8; OBFUSCATION_KEY_SIZE]
    }

    /// XORs `data` in place. `key_offset` selects where in the key stream the
    /// slice starts, so a value can be processed in chunks.
    pub fn apply(&self, data: &mut [u8], key_offset: usize) {
        if !self.is_enabled() {
            return;
        }
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.key[(i + key_offset) % OBFUSCATION_KEY_SIZE];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn apply_twice_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let obfuscation = Obfuscation::new(rng.random());
        let original: Vec<u8> = (0..100).map(|_| rng.random()).collect();

        let mut data = original.clone();
        obfuscation.apply(&mut data, 0);
        assert_ne!(data, original);
        obfuscation.apply(&mut data, 0);
        assert_eq!(data, original);
    }

    #[test]
    fn chunked_matches_whole() {
        let obfuscation = Obfuscation::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let original: Vec<u8> = (0..37).collect();

        let mut whole = original.clone();
        obfuscation.apply(&mut whole, 0);

        let mut chunked = original;
        let (head, tail) = chunked.split_at_mut(13);
        obfuscation.apply(head, 0);
        obfuscation.apply(tail, 13);
        assert_eq!(chunked, whole);
    }

    #[test]
    fn zero_key_is_noop() {
        let obfuscation = Obfuscation::disabled();
        assert!(!obfuscation.is_enabled());
        let mut data = vec![0xaa; 16];
        obfuscation.apply(&mut data, 0);
        assert_eq!(data, vec![0xaa; 16]);
    }
}
