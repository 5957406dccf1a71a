// Part of ethercat-interface. Copyright 2018-2022 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use derive_new::new;
use std::{collections::BTreeMap, fmt, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No such master {0}")]
    NoSuchMaster(MasterIdx),
    #[error("Master is not connected")]
    NotConnected,
    #[error("Master is already connected")]
    AlreadyConnected,
    #[error("Slave {0} is already registered")]
    DuplicateSlave(SlaveAddr),
    #[error("Unknown slave handle {0}")]
    NoSlave(usize),
    #[error("Slave {slave} has no channel {channel}")]
    NoChannel { slave: SlaveAddr, channel: usize },
    #[error("Domain {0} has no registered entries")]
    EmptyDomain(DomainIdx),
    #[error("Invalid SDO request {0}: {1}")]
    InvalidRequest(SdoIdx, &'static str),
    #[error("Unknown SDO request {0}")]
    NoRequest(usize),
    #[error("SDO {sdo} rejected with abort code 0x{code:08X}")]
    SdoAbort { sdo: SdoIdx, code: u32 },
    #[error("Bus link is down")]
    LinkDown,
    #[error("Master is already activated")]
    AlreadyActive,
    #[error("Master is not activated")]
    NotActivated,
    #[error("Master has been stopped")]
    Stopped,
    #[error("Invalid cycle frequency {0} Hz")]
    InvalidFrequency(f64),
    #[error("Invalid AL state 0x{0:X}")]
    InvalidAlState(u8),
    #[error(transparent)]
    Signal(#[from] ctrlc::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The protocol abort code of a rejected SDO transfer.
    pub fn abort_code(&self) -> Option<u32> {
        match self {
            Error::SdoAbort { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
pub type MasterIdx = u32;
pub type DomainIdx = u32;
pub type SlaveConfigIdx = u32;
pub type SdoRequestIdx = usize;

/// Channel indices of one slave, grouped by the domain they are exchanged in.
pub type DomainMap = BTreeMap<DomainIdx, Vec<usize>>;

/// Arena index of a slave registered with a master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlaveHandle(pub(crate) usize);

impl SlaveHandle {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of an SDO request owned by a master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub(crate) usize);

/// An EtherCAT slave identification, consisting of vendor ID and product code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct SlaveId {
    pub vendor_id: u32,
    pub product_code: u32,
}

/// An EtherCAT slave, which is specified either by absolute position in the
/// ring or by offset from a given alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaveAddr {
    ByPos(u16),
    ByAlias(u16, u16),
}

impl SlaveAddr {
    pub fn new(alias: u16, position: u16) -> Self {
        if alias == 0 {
            SlaveAddr::ByPos(position)
        } else {
            SlaveAddr::ByAlias(alias, position)
        }
    }

    pub fn as_pair(self) -> (u16, u16) {
        match self {
            SlaveAddr::ByPos(x) => (0, x),
            SlaveAddr::ByAlias(x, y) => (x, y),
        }
    }

    pub fn position(self) -> u16 {
        self.as_pair().1
    }
}

impl fmt::Display for SlaveAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (alias, pos) = self.as_pair();
        write!(f, "{}:{}", alias, pos)
    }
}

/// Index and subindex of a PDO entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct PdoEntryIdx {
    pub idx: u16,
    pub sub_idx: u8,
}

/// Index and subindex of an SDO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, new)]
pub struct SdoIdx {
    pub idx: u16,
    pub sub_idx: u8,
}

impl fmt::Display for SdoIdx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:04X}:{:02X}", self.idx, self.sub_idx)
    }
}

/// Position of a value inside a domain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, new)]
pub struct Offset {
    pub byte: usize,
    pub bit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Master to slave.
    Output,
    /// Slave to master.
    Input,
}

/// One process data channel of a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct ChannelInfo {
    pub entry: PdoEntryIdx,
    pub bit_len: u8,
    pub direction: SyncDirection,
}

impl ChannelInfo {
    pub fn input(idx: u16, sub_idx: u8, bit_len: u8) -> Self {
        Self::new(PdoEntryIdx::new(idx, sub_idx), bit_len, SyncDirection::Input)
    }

    pub fn output(idx: u16, sub_idx: u8, bit_len: u8) -> Self {
        Self::new(PdoEntryIdx::new(idx, sub_idx), bit_len, SyncDirection::Output)
    }
}

/// An SDO value written to a slave during configuration.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct SdoConfigEntry {
    pub sdo: SdoIdx,
    pub data: Vec<u8>,
}

impl SdoConfigEntry {
    pub fn value<T: SdoData>(idx: u16, sub_idx: u8, value: T) -> Self {
        Self::new(SdoIdx::new(idx, sub_idx), value.to_bytes())
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Fixed-width values that travel through the mailbox in little-endian order.
pub trait SdoData: Sized {
    const SIZE: usize;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(data: &[u8]) -> Option<Self>;
}

macro_rules! sdo_data {
    ($($t:ty),*) => {$(
        impl SdoData for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn to_bytes(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }

            fn from_bytes(data: &[u8]) -> Option<Self> {
                let raw = data.get(..Self::SIZE)?;
                <[u8; std::mem::size_of::<$t>()]>::try_from(raw)
                    .ok()
                    .map(<$t>::from_le_bytes)
            }
        }
    )*}
}

sdo_data!(u8, u16, u32, u64, i8, i16, i32, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlState {
    Init = 1,
    Preop = 2,
    Boot = 3,
    Safeop = 4,
    Op = 8,
}

impl TryFrom<u8> for AlState {
    type Error = Error;

    fn try_from(st: u8) -> Result<Self> {
        Ok(match st {
            1 => AlState::Init,
            2 => AlState::Preop,
            3 => AlState::Boot,
            4 => AlState::Safeop,
            8 => AlState::Op,
            x => return Err(Error::InvalidAlState(x)),
        })
    }
}

impl Default for AlState {
    fn default() -> Self {
        AlState::Init
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasterState {
    pub slaves_responding: u32,
    pub al_states: u8,
    pub link_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlaveConfigState {
    pub online: bool,
    pub operational: bool,
    pub al_state: AlState,
    pub error_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainState {
    pub working_counter: u32,
    pub wc_state: WcState,
    pub redundancy_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WcState {
    Zero = 0,
    Incomplete,
    Complete,
}

impl Default for WcState {
    fn default() -> Self {
        WcState::Zero
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRequestState {
    Unused,
    Busy,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdo_data_little_endian() {
        assert_eq!(u16::from_bytes(&[0x2C, 0x01]), Some(300));
        assert_eq!(i16::from_bytes(&[0xFF, 0xFF]), Some(-1));
        assert_eq!(u32::from_bytes(&[0x01, 0x02]), None);
        assert_eq!(0x1234_5678u32.to_bytes(), vec![0x78, 0x56, 0x34, 0x12]);
        let entry = SdoConfigEntry::value(0x8010, 1, 750u16);
        assert_eq!(entry.size(), 2);
        assert_eq!(entry.sdo, SdoIdx::new(0x8010, 1));
    }

    #[test]
    fn slave_addr_pairs() {
        assert_eq!(SlaveAddr::new(0, 3), SlaveAddr::ByPos(3));
        assert_eq!(SlaveAddr::new(5, 1).as_pair(), (5, 1));
        assert_eq!(SlaveAddr::ByAlias(5, 1).to_string(), "5:1");
    }

    #[test]
    fn abort_code_is_exposed() {
        let e = Error::SdoAbort {
            sdo: SdoIdx::new(0x6060, 0),
            code: 0x0602_0000,
        };
        assert_eq!(e.abort_code(), Some(0x0602_0000));
        assert_eq!(
            e.to_string(),
            "SDO 0x6060:00 rejected with abort code 0x06020000"
        );
        assert_eq!(Error::LinkDown.abort_code(), None);
        assert!(AlState::try_from(7u8).is_err());
    }
}
