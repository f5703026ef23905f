const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Fingerprint of generated kernel source: entry point plus its JIT constants.
pub fn source_fingerprint<'a>(
    entry_point: &str,
    constants: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> u64 {
    let mut hash = fnv1a_bytes(fnv1a_init(), entry_point.as_bytes());
    for (name, value) in constants {
        hash = fnv1a_bytes(hash, name.as_bytes());
        hash = fnv1a_bytes(hash, b"=");
        hash = fnv1a_bytes(hash, value.as_bytes());
        hash = fnv1a_bytes(hash, b";");
    }
    hash
}
