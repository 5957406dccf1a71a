// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Assembly of domain process images.
//!
//! Channels are laid out in registration order. Channels whose width is a
//! whole number of bytes start on a byte boundary, narrower ones are packed
//! bitwise at the current position. A [DomainBuilder] collects the
//! registrations while the master is configured; [DomainBuilder::build]
//! freezes them into a [Domain] whose offsets never change afterwards.

use crate::image::{channel_mut, channel_ref, ChannelMut, ChannelRef};
use crate::types::*;
use std::ops::Range;

/// A resolved channel of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub slave: SlaveHandle,
    /// index into the slave's channel list
    pub channel: usize,
    pub entry: PdoEntryIdx,
    pub bit_len: u8,
    pub direction: SyncDirection,
    pub offset: Offset,
}

#[derive(Debug, Clone)]
pub struct DomainBuilder {
    idx: DomainIdx,
    regs: Vec<Registration>,
    /// slave handle and the range of `regs` registered in one call
    slaves: Vec<(SlaveHandle, Range<usize>)>,
    bit_cursor: usize,
}

impl DomainBuilder {
    pub fn new(idx: DomainIdx) -> Self {
        Self {
            idx,
            regs: Vec::new(),
            slaves: Vec::new(),
            bit_cursor: 0,
        }
    }

    pub fn idx(&self) -> DomainIdx {
        self.idx
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Append the given channels of one slave and return their offsets.
    pub fn register(
        &mut self,
        slave: SlaveHandle,
        channels: impl IntoIterator<Item = (usize, ChannelInfo)>,
    ) -> Vec<Offset> {
        let start = self.regs.len();
        let mut offsets = Vec::new();
        for (channel, info) in channels {
            let offset = self.place(info.bit_len);
            self.regs.push(Registration {
                slave,
                channel,
                entry: info.entry,
                bit_len: info.bit_len,
                direction: info.direction,
                offset,
            });
            offsets.push(offset);
        }
        self.slaves.push((slave, start..self.regs.len()));
        offsets
    }

    fn place(&mut self, bit_len: u8) -> Offset {
        if bit_len % 8 == 0 {
            self.bit_cursor = (self.bit_cursor + 7) / 8 * 8;
        }
        let offset = Offset::new(self.bit_cursor / 8, (self.bit_cursor % 8) as u32);
        self.bit_cursor += usize::from(bit_len);
        offset
    }

    /// Image size in bytes for the channels registered so far.
    pub fn size(&self) -> usize {
        (self.bit_cursor + 7) / 8
    }

    /// Freeze the registration table and allocate the image.
    pub fn build(self) -> Result<Domain> {
        if self.regs.is_empty() {
            return Err(Error::EmptyDomain(self.idx));
        }
        let size = self.size();
        Ok(Domain {
            idx: self.idx,
            regs: self.regs.into_boxed_slice(),
            slaves: self.slaves.into_boxed_slice(),
            image: vec![0; size].into_boxed_slice(),
        })
    }
}

/// An activated domain: a fixed registration table and its process image.
#[derive(Debug)]
pub struct Domain {
    idx: DomainIdx,
    regs: Box<[Registration]>,
    slaves: Box<[(SlaveHandle, Range<usize>)]>,
    image: Box<[u8]>,
}

impl Domain {
    pub fn idx(&self) -> DomainIdx {
        self.idx
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.regs
    }

    /// Registrations belonging to one slave, in registration order.
    pub fn registrations_of(&self, slave: SlaveHandle) -> impl Iterator<Item = &Registration> {
        self.slaves
            .iter()
            .filter(move |(s, _)| *s == slave)
            .flat_map(move |(_, range)| self.regs[range.clone()].iter())
    }

    /// Number of distinct slaves with channels in this domain.
    pub fn slave_count(&self) -> usize {
        let mut handles: Vec<_> = self.slaves.iter().map(|(s, _)| *s).collect();
        handles.sort();
        handles.dedup();
        handles.len()
    }

    pub fn find(&self, slave: SlaveHandle, channel: usize) -> Option<&Registration> {
        self.registrations_of(slave).find(|r| r.channel == channel)
    }

    pub fn data(&self) -> &[u8] {
        &self.image
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub(crate) fn input(&self, reg: &Registration) -> ChannelRef<'_> {
        channel_ref(&self.image, reg.offset, reg.bit_len)
    }

    pub(crate) fn output(&mut self, reg: &Registration) -> ChannelMut<'_> {
        channel_mut(&mut self.image, reg.offset, reg.bit_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(infos: &[ChannelInfo]) -> Vec<(usize, ChannelInfo)> {
        infos.iter().copied().enumerate().collect()
    }

    #[test]
    fn word_then_byte() {
        let mut builder = DomainBuilder::new(0);
        let a = builder.register(SlaveHandle(0), channels(&[ChannelInfo::input(0x6000, 1, 16)]));
        let b = builder.register(SlaveHandle(1), channels(&[ChannelInfo::output(0x7000, 1, 8)]));
        assert_eq!(a, [Offset::new(0, 0)]);
        assert_eq!(b, [Offset::new(2, 0)]);

        let domain = builder.build().unwrap();
        assert_eq!(domain.size(), 3);
        assert_eq!(domain.slave_count(), 2);
        assert_eq!(domain.find(SlaveHandle(1), 0).unwrap().offset, Offset::new(2, 0));
    }

    #[test]
    fn bits_are_packed_and_bytes_realigned() {
        let mut builder = DomainBuilder::new(1);
        let offsets = builder.register(
            SlaveHandle(0),
            channels(&[
                ChannelInfo::input(0x6000, 1, 1),
                ChannelInfo::input(0x6000, 2, 1),
                ChannelInfo::input(0x6000, 3, 4),
                ChannelInfo::input(0x6010, 1, 16),
                ChannelInfo::output(0x7000, 1, 3),
            ]),
        );
        assert_eq!(
            offsets,
            [
                Offset::new(0, 0),
                Offset::new(0, 1),
                Offset::new(0, 2),
                Offset::new(1, 0),
                Offset::new(3, 0),
            ]
        );
        assert_eq!(builder.size(), 4);
    }

    #[test]
    fn empty_domain_is_rejected() {
        let mut builder = DomainBuilder::new(3);
        builder.register(SlaveHandle(0), Vec::new());
        match builder.build() {
            Err(Error::EmptyDomain(3)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn registrations_by_slave() {
        let mut builder = DomainBuilder::new(0);
        builder.register(SlaveHandle(0), channels(&[ChannelInfo::input(0x6000, 1, 8)]));
        builder.register(SlaveHandle(1), channels(&[ChannelInfo::input(0x6000, 1, 8)]));
        builder.register(SlaveHandle(0), vec![(1, ChannelInfo::output(0x7000, 1, 8))]);
        let domain = builder.build().unwrap();
        let own: Vec<_> = domain.registrations_of(SlaveHandle(0)).map(|r| r.channel).collect();
        assert_eq!(own, [0, 1]);
        assert_eq!(domain.registrations().len(), 3);
    }
}
