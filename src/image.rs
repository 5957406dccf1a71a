// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Views on single channels of a domain process image.
//!
//! A view only lives for the duration of one `decode` or `encode` call and
//! covers exactly the bytes the channel occupies.

use crate::convert::{byte_span, read_bits, sign_extend, write_bits};
use crate::types::*;

/// Read-only access to an input channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelRef<'a> {
    data: &'a [u8],
    bit: u32,
    bit_len: u8,
}

/// Write access to an output channel.
#[derive(Debug)]
pub struct ChannelMut<'a> {
    data: &'a mut [u8],
    bit: u32,
    bit_len: u8,
}

pub(crate) fn channel_ref<'a>(image: &'a [u8], offset: Offset, bit_len: u8) -> ChannelRef<'a> {
    let end = offset.byte + byte_span(offset.bit, bit_len);
    ChannelRef {
        data: &image[offset.byte..end],
        bit: offset.bit,
        bit_len,
    }
}

pub(crate) fn channel_mut<'a>(image: &'a mut [u8], offset: Offset, bit_len: u8) -> ChannelMut<'a> {
    let end = offset.byte + byte_span(offset.bit, bit_len);
    ChannelMut {
        data: &mut image[offset.byte..end],
        bit: offset.bit,
        bit_len,
    }
}

impl<'a> ChannelRef<'a> {
    /// The bytes this channel touches; the first value bit is at `bit_position()`.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn bit_position(&self) -> u32 {
        self.bit
    }

    pub fn bit_len(&self) -> u8 {
        self.bit_len
    }

    /// The channel value, zero-extended.
    pub fn raw(&self) -> u64 {
        read_bits(self.data, self.bit, self.bit_len)
    }

    /// The channel value, sign-extended from its bit width.
    pub fn signed(&self) -> i64 {
        sign_extend(self.raw(), self.bit_len)
    }

    pub fn bit(&self) -> bool {
        read_bits(self.data, self.bit, 1) != 0
    }

    pub fn u8(&self) -> u8 {
        self.raw() as u8
    }

    pub fn u16(&self) -> u16 {
        self.raw() as u16
    }

    pub fn u32(&self) -> u32 {
        self.raw() as u32
    }

    pub fn i16(&self) -> i16 {
        self.signed() as i16
    }

    pub fn i32(&self) -> i32 {
        self.signed() as i32
    }
}

impl ChannelMut<'_> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn bit_position(&self) -> u32 {
        self.bit
    }

    pub fn bit_len(&self) -> u8 {
        self.bit_len
    }

    /// Current content of the channel, i.e. the last value written or echoed back.
    pub fn raw(&self) -> u64 {
        read_bits(self.data, self.bit, self.bit_len)
    }

    /// Store the low `bit_len()` bits of `value`.
    pub fn set_raw(&mut self, value: u64) {
        write_bits(self.data, self.bit, self.bit_len, value)
    }

    pub fn set_bit(&mut self, value: bool) {
        write_bits(self.data, self.bit, 1, value as u64)
    }

    pub fn set_u8(&mut self, value: u8) {
        self.set_raw(u64::from(value))
    }

    pub fn set_u16(&mut self, value: u16) {
        self.set_raw(u64::from(value))
    }

    pub fn set_u32(&mut self, value: u32) {
        self.set_raw(u64::from(value))
    }

    pub fn set_i16(&mut self, value: i16) {
        self.set_raw(value as u16 as u64)
    }

    pub fn set_i32(&mut self, value: i32) {
        self.set_raw(value as u32 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_cover_only_their_channel() {
        let mut image = vec![0u8; 4];
        {
            let mut out = channel_mut(&mut image, Offset::new(1, 0), 16);
            assert_eq!(out.bytes_mut().len(), 2);
            out.set_i16(-2);
        }
        assert_eq!(image, [0, 0xFE, 0xFF, 0]);

        let input = channel_ref(&image, Offset::new(1, 0), 16);
        assert_eq!(input.i16(), -2);
        assert_eq!(input.u16(), 0xFFFE);
    }

    #[test]
    fn bit_channels_keep_neighbours() {
        let mut image = vec![0b1000_0001u8];
        channel_mut(&mut image, Offset::new(0, 3), 1).set_bit(true);
        assert_eq!(image, [0b1000_1001]);
        assert!(channel_ref(&image, Offset::new(0, 7), 1).bit());
        assert!(!channel_ref(&image, Offset::new(0, 6), 1).bit());
    }
}
