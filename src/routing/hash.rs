/// Key hash functions
///
/// All functions map a key's bytes to a 32-bit value. Bytes are treated as
/// unsigned.
use crate::utils::crc16;

/// Selectable key hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Bytes,
    Fnv1_32,
    Fnv1a_32,
    Fnv1_64,
    Fnv1a_64,
    Hsieh,
    Jenkins,
    Md5,
    Crc16,
}

impl HashKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "bytes" => HashKind::Bytes,
            "fnv1_32" => HashKind::Fnv1_32,
            "fnv1a_32" => HashKind::Fnv1a_32,
            "fnv1_64" => HashKind::Fnv1_64,
            "fnv1a_64" => HashKind::Fnv1a_64,
            "hsieh" => HashKind::Hsieh,
            "jenkins" => HashKind::Jenkins,
            "md5" => HashKind::Md5,
            "crc16" => HashKind::Crc16,
            _ => return None,
        };
        Some(kind)
    }

    pub fn hash(&self, key: &[u8]) -> u32 {
        match self {
            HashKind::Bytes => hash_bytes(key),
            HashKind::Fnv1_32 => fnv1_32(key),
            HashKind::Fnv1a_32 => fnv1a_32(key),
            HashKind::Fnv1_64 => fnv1_64(key),
            HashKind::Fnv1a_64 => fnv1a_64(key),
            HashKind::Hsieh => hsieh(key),
            HashKind::Jenkins => jenkins(key),
            HashKind::Md5 => md5_hash(key),
            HashKind::Crc16 => crc16(key) as u32,
        }
    }
}

impl Default for HashKind {
    fn default() -> Self {
        HashKind::Bytes
    }
}

/// Murmur2-style byte hash with seed 131
pub fn hash_bytes(key: &[u8]) -> u32 {
    const M: u32 = 0x5bd1e995;
    const R: u32 = 24;
    const SEED: u32 = 131;

    let mut h = SEED ^ key.len() as u32;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

const FNV_64_INIT: u64 = 0xcbf29ce484222325;
const FNV_64_PRIME: u64 = 0x100000001b3;
const FNV_32_INIT: u32 = 2166136261;
const FNV_32_PRIME: u32 = 16777619;

pub fn fnv1_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT;
    for &b in key {
        hash = hash.wrapping_mul(FNV_64_PRIME);
        hash ^= b as u64;
    }
    hash as u32
}

/// FNV-1a over 32-bit truncations of the 64-bit constants
pub fn fnv1a_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT as u32;
    for &b in key {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_64_PRIME as u32);
    }
    hash
}

pub fn fnv1_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &b in key {
        hash = hash.wrapping_mul(FNV_32_PRIME);
        hash ^= b as u32;
    }
    hash
}

pub fn fnv1a_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &b in key {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_32_PRIME);
    }
    hash
}

#[inline]
fn get16(d: &[u8]) -> u32 {
    ((d[1] as u32) << 8) + d[0] as u32
}

/// Paul Hsieh's SuperFastHash
pub fn hsieh(key: &[u8]) -> u32 {
    if key.is_empty() {
        return 0;
    }

    let mut hash: u32 = 0;
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(get16(chunk));
        let tmp = (get16(&chunk[2..]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let tail = chunks.remainder();
    match tail.len() {
        3 => {
            hash = hash.wrapping_add(get16(tail));
            hash ^= hash << 16;
            hash ^= (tail[2] as u32) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(get16(tail));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(tail[0] as u32);
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

const JENKINS_INITVAL: u32 = 13;

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(4); *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(6); *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(8); *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(16); *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(19); *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(4); *b = b.wrapping_add(*a);
}

#[inline]
fn finalize(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(24));
}

/// Bob Jenkins' lookup3 `hashlittle`, byte-at-a-time path
pub fn jenkins(key: &[u8]) -> u32 {
    let init = 0xdeadbeef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(JENKINS_INITVAL);
    let (mut a, mut b, mut c) = (init, init, init);

    let word = |bytes: &[u8]| -> u32 {
        bytes
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &byte)| acc.wrapping_add((byte as u32) << (8 * i)))
    };

    let mut rest = key;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    if rest.is_empty() {
        return c;
    }

    a = a.wrapping_add(word(&rest[..rest.len().min(4)]));
    if rest.len() > 4 {
        b = b.wrapping_add(word(&rest[4..rest.len().min(8)]));
    }
    if rest.len() > 8 {
        c = c.wrapping_add(word(&rest[8..]));
    }

    finalize(&mut a, &mut b, &mut c);
    c
}

/// First four MD5 digest bytes read little-endian
pub fn md5_hash(key: &[u8]) -> u32 {
    let digest = md5::compute(key);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_names() {
        for name in [
            "bytes", "fnv1_32", "fnv1a_32", "fnv1_64", "fnv1a_64", "hsieh", "jenkins", "md5", "crc16",
        ] {
            assert!(HashKind::from_name(name).is_some(), "{}", name);
        }
        assert!(HashKind::from_name("sha1").is_none());
        assert_eq!(HashKind::default(), HashKind::Bytes);
    }

    #[test]
    fn test_fnv_reference_values() {
        // Standard FNV test vectors for 32-bit variants
        assert_eq!(fnv1_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
        assert_eq!(fnv1_32(b"a"), 0x050c5d7e);
        // 64-bit FNV-1 of "a" is 0xaf63bd4c8601b7be
        assert_eq!(fnv1_64(b"a"), 0x8601b7be);
    }

    #[test]
    fn test_jenkins_reference_values() {
        // lookup3 hashlittle("", 0) with initval 13
        assert_eq!(jenkins(b""), 0xdeadbeef_u32.wrapping_add(13));
        assert_ne!(jenkins(b"a"), jenkins(b"b"));
        assert_ne!(jenkins(b"0123456789abc"), jenkins(b"0123456789abd"));
    }

    #[test]
    fn test_md5_hash() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_hash(b""), u32::from_le_bytes([0xd4, 0x1d, 0x8c, 0xd9]));
    }

    #[test]
    fn test_hsieh_empty_and_spread() {
        assert_eq!(hsieh(b""), 0);
        assert_ne!(hsieh(b"abcd"), hsieh(b"abce"));
        assert_ne!(hsieh(b"abcdefgh"), hsieh(b"abcdefgi"));
    }

    #[test]
    fn test_hash_bytes_spread() {
        assert_ne!(hash_bytes(b"user:1"), hash_bytes(b"user:2"));
        assert_eq!(hash_bytes(b"user:1"), hash_bytes(b"user:1"));
        // High-bit bytes are unsigned
        assert_ne!(hash_bytes(&[0xff]), hash_bytes(&[0x7f]));
    }

    #[test]
    fn test_all_hashes_deterministic() {
        let kinds = [
            HashKind::Bytes,
            HashKind::Fnv1_32,
            HashKind::Fnv1a_32,
            HashKind::Fnv1_64,
            HashKind::Fnv1a_64,
            HashKind::Hsieh,
            HashKind::Jenkins,
            HashKind::Md5,
            HashKind::Crc16,
        ];
        for kind in kinds {
            assert_eq!(kind.hash(b"session:42"), kind.hash(b"session:42"));
        }
        assert_eq!(HashKind::Crc16.hash(b"123456789"), 12739);
    }
}
