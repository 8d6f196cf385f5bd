//! Header key derivation.
//!
//! Every request header carries a 32-byte key field holding the device password
//! XORed with a keystream generated from a fixed 16-byte table. The transform is
//! static and reversible: anyone who captures a request recovers the password.
//! It authenticates nothing against a capable adversary.

/// Fixed table the keystream is generated from.
pub const STATIC_KEY: [u8; 16] = [
    0x5b, 0x6f, 0xaf, 0x5d, 0x9d, 0x5b, 0x0e, 0x13, 0x51, 0xf2, 0xda, 0x1d, 0xe7, 0xe8, 0xd6, 0x73,
];

/// Size of the key field embedded in the message header.
pub const HEADER_KEY_SIZE: usize = 32;

/// Generates `length` keystream bytes.
///
/// Byte `i` is `(i + 0x55) mod 256` XORed with `STATIC_KEY[i mod 16]`.
pub fn derive_keystream(length: usize) -> Vec<u8> {
    (0..length)
        .map(|i| (i.wrapping_add(0x55) as u8) ^ STATIC_KEY[i % STATIC_KEY.len()])
        .collect()
}

/// Derives the header key field for `password`.
///
/// The password is truncated or zero-padded to 32 bytes before being XORed
/// with the keystream.
pub fn derive_header_key(password: &[u8]) -> [u8; HEADER_KEY_SIZE] {
    let stream = derive_keystream(HEADER_KEY_SIZE);
    let mut key = [0u8; HEADER_KEY_SIZE];
    for (i, slot) in key.iter_mut().enumerate() {
        let p = password.get(i).copied().unwrap_or(0);
        *slot = stream[i] ^ p;
    }
    key
}
