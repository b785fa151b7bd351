//! Bloom filter stored beside each SSTable's index.
//!
//! Layout: `[bit array][probe count: u8]`. Probes use double hashing over a
//! single CRC32 of the key.

/// Bits per key used when none is configured.
pub const DEFAULT_BITS_PER_KEY: usize = 10;

fn key_hash(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// Collects key hashes while a table is written.
#[derive(Debug, Default)]
pub struct BloomBuilder {
    hashes: Vec<u32>,
}

impl BloomBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.hashes.push(key_hash(key));
    }

    /// Build the encoded filter.
    pub fn finish(&self, bits_per_key: usize) -> Vec<u8> {
        let bits_per_key = bits_per_key.max(1);
        // ln(2) * bits_per_key probes, clamped like the usual LSM engines
        let probes = ((bits_per_key as f64) * 0.69) as u32;
        let probes = probes.clamp(1, 30);

        let bits = (self.hashes.len() * bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = bytes * 8;

        let mut array = vec![0u8; bytes + 1];
        for &hash in &self.hashes {
            let mut h = hash;
            let delta = h.rotate_right(17);
            for _ in 0..probes {
                let pos = (h as usize) % bits;
                array[pos / 8] |= 1 << (pos % 8);
                h = h.wrapping_add(delta);
            }
        }
        array[bytes] = probes as u8;
        array
    }
}

/// A decoded filter.
#[derive(Debug, Clone, Default)]
pub struct BloomFilter {
    data: Vec<u8>,
}

impl BloomFilter {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// False means the key is definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.data.len() < 2 {
            // No filter stored; every key is a candidate.
            return true;
        }
        let bytes = self.data.len() - 1;
        let bits = bytes * 8;
        let probes = self.data[bytes];
        if probes == 0 || probes > 30 {
            return true;
        }

        let mut h = key_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..probes {
            let pos = (h as usize) % bits;
            if self.data[pos / 8] & (1 << (pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut builder = BloomBuilder::new();
        for i in 0..1000 {
            builder.add_key(format!("key{}", i).as_bytes());
        }
        let filter = BloomFilter::from_bytes(builder.finish(DEFAULT_BITS_PER_KEY));

        for i in 0..1000 {
            assert!(filter.may_contain(format!("key{}", i).as_bytes()));
        }
    }

    #[test]
    fn test_false_positive_rate_is_low() {
        let mut builder = BloomBuilder::new();
        for i in 0..1000 {
            builder.add_key(format!("key{}", i).as_bytes());
        }
        let filter = BloomFilter::from_bytes(builder.finish(DEFAULT_BITS_PER_KEY));

        let hits = (0..10_000)
            .filter(|i| filter.may_contain(format!("other{}", i).as_bytes()))
            .count();
        assert!(hits < 500, "false positive rate too high: {}", hits);
    }

    #[test]
    fn test_empty_filter_admits_everything() {
        let filter = BloomFilter::default();
        assert!(filter.may_contain(b"anything"));
    }
}
