// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use byteorder::{ByteOrder, LittleEndian as LE};

/// Number of bytes touched by a value of `bit_len` bits starting at `bit`.
pub(crate) fn byte_span(bit: u32, bit_len: u8) -> usize {
    (bit as usize + bit_len as usize + 7) / 8
}

/// Read an unsigned little-endian value of up to 64 bits.
pub(crate) fn read_bits(data: &[u8], bit: u32, bit_len: u8) -> u64 {
    if bit == 0 {
        match bit_len {
            8 => return u64::from(data[0]),
            16 => return u64::from(LE::read_u16(data)),
            32 => return u64::from(LE::read_u32(data)),
            64 => return LE::read_u64(data),
            _ => (),
        }
    }
    let mut value = 0u64;
    for i in 0..usize::from(bit_len.min(64)) {
        let pos = bit as usize + i;
        if (data[pos / 8] >> (pos % 8)) & 1 != 0 {
            value |= 1 << i;
        }
    }
    value
}

/// Write the low `bit_len` bits of `value`, leaving neighbouring bits alone.
pub(crate) fn write_bits(data: &mut [u8], bit: u32, bit_len: u8, value: u64) {
    if bit == 0 {
        match bit_len {
            8 => data[0] = value as u8,
            16 => LE::write_u16(data, value as u16),
            32 => LE::write_u32(data, value as u32),
            64 => LE::write_u64(data, value),
            _ => return write_each_bit(data, bit, bit_len, value),
        }
        return;
    }
    write_each_bit(data, bit, bit_len, value)
}

fn write_each_bit(data: &mut [u8], bit: u32, bit_len: u8, value: u64) {
    for i in 0..usize::from(bit_len.min(64)) {
        let pos = bit as usize + i;
        let mask = 1 << (pos % 8);
        if (value >> i) & 1 != 0 {
            data[pos / 8] |= mask;
        } else {
            data[pos / 8] &= !mask;
        }
    }
}

/// Sign-extend the low `bit_len` bits of `raw`.
pub(crate) fn sign_extend(raw: u64, bit_len: u8) -> i64 {
    if bit_len == 0 || bit_len >= 64 {
        return raw as i64;
    }
    let shift = 64 - u32::from(bit_len);
    ((raw << shift) as i64) >> shift
}

#[test]
fn test_byte_span() {
    assert_eq!(byte_span(0, 1), 1);
    assert_eq!(byte_span(7, 1), 1);
    assert_eq!(byte_span(7, 2), 2);
    assert_eq!(byte_span(0, 16), 2);
    assert_eq!(byte_span(4, 12), 2);
}

#[test]
fn test_read_bits() {
    let data = [0x2C, 0x01, 0b1010_0110];
    assert_eq!(read_bits(&data, 0, 16), 300);
    assert_eq!(read_bits(&data, 0, 8), 0x2C);
    assert_eq!(read_bits(&data[2..], 1, 1), 1);
    assert_eq!(read_bits(&data[2..], 3, 1), 0);
    assert_eq!(read_bits(&data[2..], 4, 4), 0b1010);
    // spans a byte boundary
    assert_eq!(read_bits(&data, 4, 8), 0x12);
}

#[test]
fn test_write_bits() {
    let mut data = [0xFFu8; 3];
    write_bits(&mut data, 0, 16, 300);
    assert_eq!(data, [0x2C, 0x01, 0xFF]);

    let mut data = [0u8; 2];
    write_bits(&mut data, 6, 4, 0b1011);
    assert_eq!(data, [0b1100_0000, 0b0000_0010]);
    write_bits(&mut data, 6, 4, 0);
    assert_eq!(data, [0, 0]);

    let mut data = [0b0101_0101u8];
    write_bits(&mut data, 1, 1, 1);
    assert_eq!(data, [0b0101_0111]);
}

#[test]
fn test_sign_extend() {
    assert_eq!(sign_extend(0xFFFF, 16), -1);
    assert_eq!(sign_extend(0x7FFF, 16), 0x7FFF);
    assert_eq!(sign_extend(0b1000, 4), -8);
    assert_eq!(sign_extend(5, 64), 5);
}
