//! Compact serialization used by the coins database: base-128 varints,
//! mantissa/exponent amount packing, and template-aware script compression.

use crate::encoding::{DecodeError, Decoder, Encoder};

pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Script codes below this value denote a compressed template; higher values
/// encode a raw script of `code - SPECIAL_SCRIPTS` bytes.
const SPECIAL_SCRIPTS: u64 = 6;

/// Writes a base-128 varint with MSB continuation. Each continuation step
/// subtracts one so that every value has exactly one encoding.
pub fn write_varint(encoder: &mut Encoder, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut len = 0usize;
    loop {
        tmp[len] = (value & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if value <= 0x7f {
            break;
        }
        value = (value >> 7) - 1;
        len += 1;
    }
    for i in (0..=len).rev() {
        encoder.write_u8(tmp[i]);
    }
}

pub fn read_varint(decoder: &mut Decoder) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    loop {
        let byte = decoder.read_u8()?;
        if value > u64::MAX >> 7 {
            return Err(DecodeError::InvalidData("varint overflows 64 bits"));
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if value == u64::MAX {
            return Err(DecodeError::InvalidData("varint overflows 64 bits"));
        }
        value += 1;
    }
}

/// Packs an amount so that round figures take one or two bytes: trailing
/// decimal zeros become an exponent, the last nonzero digit a separate field.
pub fn compress_amount(mut n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut e = 0u64;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

pub fn decompress_amount(mut x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    x -= 1;
    let e = x % 10;
    x /= 10;
    let mut n = if e < 9 {
        let d = (x % 9) + 1;
        x /= 9;
        x * 10 + d
    } else {
        x + 1
    };
    for _ in 0..e {
        n = n.saturating_mul(10);
    }
    n
}

fn to_pubkey_hash(script: &[u8]) -> Option<&[u8]> {
    // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 20
        && script[23] == 0x88
        && script[24] == 0xac
    {
        Some(&script[3..23])
    } else {
        None
    }
}

fn to_script_hash(script: &[u8]) -> Option<&[u8]> {
    // OP_HASH160 <20> OP_EQUAL
    if script.len() == 23 && script[0] == 0xa9 && script[1] == 20 && script[22] == 0x87 {
        Some(&script[2..22])
    } else {
        None
    }
}

fn to_pubkey(script: &[u8]) -> Option<&[u8]> {
    // <33 or 65 byte push> OP_CHECKSIG
    if script.len() == 35
        && script[0] == 33
        && script[34] == 0xac
        && (script[1] == 0x02 || script[1] == 0x03)
    {
        return Some(&script[1..34]);
    }
    if script.len() == 67
        && script[0] == 65
        && script[66] == 0xac
        && script[1] == 0x04
        && secp256k1::PublicKey::from_slice(&script[1..66]).is_ok()
    {
        return Some(&script[1..66]);
    }
    None
}

pub fn write_script(encoder: &mut Encoder, script: &[u8]) {
    if let Some(hash) = to_pubkey_hash(script) {
        encoder.write_u8(0x00);
        encoder.write_bytes(hash);
        return;
    }
    if let Some(hash) = to_script_hash(script) {
        encoder.write_u8(0x01);
        encoder.write_bytes(hash);
        return;
    }
    if let Some(pubkey) = to_pubkey(script) {
        match pubkey[0] {
            0x02 | 0x03 => {
                encoder.write_u8(pubkey[0]);
                encoder.write_bytes(&pubkey[1..33]);
            }
            _ => {
                // Uncompressed key: keep the x coordinate, fold the parity of
                // y into the code byte.
                encoder.write_u8(0x04 | (pubkey[64] & 0x01));
                encoder.write_bytes(&pubkey[1..33]);
            }
        }
        return;
    }
    write_varint(encoder, script.len() as u64 + SPECIAL_SCRIPTS);
    encoder.write_bytes(script);
}

pub fn read_script(decoder: &mut Decoder) -> Result<Vec<u8>, DecodeError> {
    let code = read_varint(decoder)?;
    match code {
        0x00 => {
            let hash = decoder.read_bytes(20)?;
            let mut script = Vec::with_capacity(25);
            script.extend_from_slice(&[0x76, 0xa9, 20]);
            script.extend_from_slice(&hash);
            script.extend_from_slice(&[0x88, 0xac]);
            Ok(script)
        }
        0x01 => {
            let hash = decoder.read_bytes(20)?;
            let mut script = Vec::with_capacity(23);
            script.extend_from_slice(&[0xa9, 20]);
            script.extend_from_slice(&hash);
            script.push(0x87);
            Ok(script)
        }
        0x02 | 0x03 => {
            let x = decoder.read_bytes(32)?;
            let mut script = Vec::with_capacity(35);
            script.push(33);
            script.push(code as u8);
            script.extend_from_slice(&x);
            script.push(0xac);
            Ok(script)
        }
        0x04 | 0x05 => {
            let mut compressed = [0u8; 33];
            compressed[0] = 0x02 | (code as u8 & 0x01);
            compressed[1..].copy_from_slice(&decoder.read_bytes(32)?);
            let pubkey = secp256k1::PublicKey::from_slice(&compressed)
                .map_err(|_| DecodeError::InvalidData("invalid pubkey in compressed script"))?;
            let mut script = Vec::with_capacity(67);
            script.push(65);
            script.extend_from_slice(&pubkey.serialize_uncompressed());
            script.push(0xac);
            Ok(script)
        }
        _ => {
            let len = code - SPECIAL_SCRIPTS;
            if len > MAX_SCRIPT_SIZE as u64 {
                return Err(DecodeError::SizeTooLarge);
            }
            decoder.read_bytes(len as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash160;

    // Generator point of secp256k1, a convenient known-valid pubkey.
    const GEN_X: [u8; 32] = [
        0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b,
        0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8,
        0x17, 0x98,
    ];
    const GEN_Y: [u8; 32] = [
        0x48, 0x3a, 0xda, 0x77, 0x26, 0xa3, 0xc4, 0x65, 0x5d, 0xa4, 0xfb, 0xfc, 0x0e, 0x11, 0x08,
        0xa8, 0xfd, 0x17, 0xb4, 0x48, 0xa6, 0x85, 0x54, 0x19, 0x9c, 0x47, 0xd0, 0x8f, 0xfb, 0x10,
        0xd4, 0xb8,
    ];

    fn compress(script: &[u8]) -> Vec<u8> {
        let mut encoder = Encoder::new();
        write_script(&mut encoder, script);
        encoder.into_inner()
    }

    fn decompress(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let script = read_script(&mut decoder)?;
        assert!(decoder.is_empty());
        Ok(script)
    }

    #[test]
    fn varint_known_encoding() {
        let mut encoder = Encoder::new();
        write_varint(&mut encoder, 3_000_000_000);
        assert_eq!(encoder.into_inner(), [0x8a, 0x95, 0xc0, 0xbb, 0x00]);
    }

    #[test]
    fn varint_round_trip() {
        for value in [
            0u64,
            1,
            0x7f,
            0x80,
            0x407f,
            0x4080,
            u64::from(u32::MAX),
            u64::MAX,
        ] {
            let mut encoder = Encoder::new();
            write_varint(&mut encoder, value);
            let bytes = encoder.into_inner();
            let mut decoder = Decoder::new(&bytes);
            assert_eq!(read_varint(&mut decoder).expect("varint"), value);
            assert!(decoder.is_empty());
        }
    }

    #[test]
    fn varint_rejects_overflow() {
        // One continuation step beyond u64::MAX.
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f];
        let mut decoder = Decoder::new(&bytes);
        assert!(read_varint(&mut decoder).is_err());
    }

    #[test]
    fn amount_known_values() {
        assert_eq!(compress_amount(0), 0);
        assert_eq!(compress_amount(60_000_000_000), 600);
        assert_eq!(compress_amount(110_397), 993_571);
        assert_eq!(decompress_amount(600), 60_000_000_000);
        assert_eq!(decompress_amount(993_571), 110_397);
    }

    #[test]
    fn amount_round_trip() {
        use bitcoind_consensus::{COIN, MAX_MONEY};
        for value in [
            0i64,
            1,
            9,
            10,
            545,
            546,
            COIN / 100,
            COIN,
            50 * COIN,
            21_000_000 * COIN / 2,
            MAX_MONEY,
        ] {
            let n = value as u64;
            assert_eq!(decompress_amount(compress_amount(n)), n);
        }
    }

    #[test]
    fn p2pkh_compresses_to_21_bytes() {
        let key_hash = hash160(b"example");
        let mut script = vec![0x76, 0xa9, 20];
        script.extend_from_slice(&key_hash);
        script.extend_from_slice(&[0x88, 0xac]);

        let compressed = compress(&script);
        assert_eq!(compressed.len(), 21);
        assert_eq!(compressed[0], 0x00);
        assert_eq!(decompress(&compressed).expect("decompress"), script);
    }

    #[test]
    fn p2sh_compresses_to_21_bytes() {
        let script_hash = hash160(b"redeem");
        let mut script = vec![0xa9, 20];
        script.extend_from_slice(&script_hash);
        script.push(0x87);

        let compressed = compress(&script);
        assert_eq!(compressed.len(), 21);
        assert_eq!(compressed[0], 0x01);
        assert_eq!(decompress(&compressed).expect("decompress"), script);
    }

    #[test]
    fn compressed_pubkey_round_trip() {
        let mut script = vec![33, 0x02];
        script.extend_from_slice(&GEN_X);
        script.push(0xac);

        let compressed = compress(&script);
        assert_eq!(compressed.len(), 33);
        assert_eq!(compressed[0], 0x02);
        assert_eq!(decompress(&compressed).expect("decompress"), script);
    }

    #[test]
    fn uncompressed_pubkey_recovers_y_coordinate() {
        let mut script = vec![65, 0x04];
        script.extend_from_slice(&GEN_X);
        script.extend_from_slice(&GEN_Y);
        script.push(0xac);

        let compressed = compress(&script);
        assert_eq!(compressed.len(), 33);
        assert_eq!(compressed[0], 0x04); // even y
        assert_eq!(decompress(&compressed).expect("decompress"), script);
    }

    #[test]
    fn raw_script_prefixes_length() {
        let script = vec![0x6a, 0x01, 0x02]; // OP_RETURN payload
        let compressed = compress(&script);
        assert_eq!(compressed[0], script.len() as u8 + 6);
        assert_eq!(decompress(&compressed).expect("decompress"), script);
    }

    #[test]
    fn truncated_script_fails() {
        assert_eq!(decompress(&[0x07]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn oversized_script_fails() {
        let bytes = [0x8a, 0x95, 0xc0, 0xbb, 0x00]; // declares 3e9 bytes
        assert_eq!(decompress(&bytes), Err(DecodeError::SizeTooLarge));
    }

    #[test]
    fn invalid_pubkey_point_fails() {
        // An x coordinate beyond the field prime cannot be a valid key.
        let mut bytes = vec![0x04];
        bytes.extend_from_slice(&[0xff; 32]);
        assert!(matches!(
            decompress(&bytes),
            Err(DecodeError::InvalidData(_))
        ));
    }
}
