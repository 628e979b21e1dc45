//! Hash slots: key hashing, slot ranges and the slot owner table.
//!
//! Keys map to one of 16384 slots through CRC16 (XMODEM) of the key or of
//! its `{hash tag}`, exactly as the server computes it. The client must
//! agree with the server bit for bit, otherwise every command would land
//! on the wrong shard.

use std::fmt;

/// Total number of hash slots in the cluster (Redis Cluster standard).
pub const SLOT_COUNT: u16 = 16384;

/// CRC16 lookup table from Redis source code (crc16.c).
/// Uses CCITT polynomial for Redis Cluster slot calculation.
#[rustfmt::skip]
static CRC16_TABLE: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7,
    0x8108, 0x9129, 0xa14a, 0xb16b, 0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
    0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294, 0x72f7, 0x62d6,
    0x9339, 0x8318, 0xb37b, 0xa35a, 0xd3bd, 0xc39c, 0xf3ff, 0xe3de,
    0x2462, 0x3443, 0x0420, 0x1401, 0x64e6, 0x74c7, 0x44a4, 0x5485,
    0xa56a, 0xb54b, 0x8528, 0x9509, 0xe5ee, 0xf5cf, 0xc5ac, 0xd58d,
    0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695, 0x46b4,
    0xb75b, 0xa77a, 0x9719, 0x8738, 0xf7df, 0xe7fe, 0xd79d, 0xc7bc,
    0x48c4, 0x58e5, 0x6886, 0x78a7, 0x0840, 0x1861, 0x2802, 0x3823,
    0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948, 0x9969, 0xa90a, 0xb92b,
    0x5af5, 0x4ad4, 0x7ab7, 0x6a96, 0x1a71, 0x0a50, 0x3a33, 0x2a12,
    0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a,
    0x6ca6, 0x7c87, 0x4ce4, 0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41,
    0xedae, 0xfd8f, 0xcdec, 0xddcd, 0xad2a, 0xbd0b, 0x8d68, 0x9d49,
    0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70,
    0xff9f, 0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a, 0x9f59, 0x8f78,
    0x9188, 0x81a9, 0xb1ca, 0xa1eb, 0xd10c, 0xc12d, 0xf14e, 0xe16f,
    0x1080, 0x00a1, 0x30c2, 0x20e3, 0x5004, 0x4025, 0x7046, 0x6067,
    0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e,
    0x02b1, 0x1290, 0x22f3, 0x32d2, 0x4235, 0x5214, 0x6277, 0x7256,
    0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e, 0xe54f, 0xd52c, 0xc50d,
    0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405,
    0xa7db, 0xb7fa, 0x8799, 0x97b8, 0xe75f, 0xf77e, 0xc71d, 0xd73c,
    0x26d3, 0x36f2, 0x0691, 0x16b0, 0x6657, 0x7676, 0x4615, 0x5634,
    0xd94c, 0xc96d, 0xf90e, 0xe92f, 0x99c8, 0x89e9, 0xb98a, 0xa9ab,
    0x5844, 0x4865, 0x7806, 0x6827, 0x18c0, 0x08e1, 0x3882, 0x28a3,
    0xcb7d, 0xdb5c, 0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a,
    0x4a75, 0x5a54, 0x6a37, 0x7a16, 0x0af1, 0x1ad0, 0x2ab3, 0x3a92,
    0xfd2e, 0xed0f, 0xdd6c, 0xcd4d, 0xbdaa, 0xad8b, 0x9de8, 0x8dc9,
    0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83, 0x1ce0, 0x0cc1,
    0xef1f, 0xff3e, 0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8,
    0x6e17, 0x7e36, 0x4e55, 0x5e74, 0x2e93, 0x3eb2, 0x0ed1, 0x1ef0,
];

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) ^ byte as u16) as usize]
    })
}

/// Returns the part of the key that is hashed.
///
/// If the key contains `{...}` with at least one byte between the first
/// `{` and the next `}`, only that content is hashed. Otherwise the whole
/// key is. This is what lets `user:{42}:name` and `user:{42}:mail` share
/// a slot.
fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = memchr_byte(b'{', key) else {
        return key;
    };
    let rest = &key[open + 1..];
    match memchr_byte(b'}', rest) {
        Some(close) if close > 0 => &rest[..close],
        _ => key,
    }
}

fn memchr_byte(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Computes the hash slot for a key. Always in `0..SLOT_COUNT`.
pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

/// An inclusive range of slots, `start..=end`.
///
/// A valid range satisfies `start <= end < SLOT_COUNT`; values coming off
/// the wire go through [`SlotRange::try_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Creates a validated range. Returns `None` if `start > end` or the
    /// range reaches past the last slot.
    pub fn try_new(start: u16, end: u16) -> Option<Self> {
        (start <= end && end < SLOT_COUNT).then_some(Self { start, end })
    }

    /// A range covering exactly one slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= SLOT_COUNT`.
    pub fn single(slot: u16) -> Self {
        assert!(slot < SLOT_COUNT, "slot must be < {SLOT_COUNT}");
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Parses a node-table slot token: `N` or `N-M`.
    ///
    /// Anything else, including migration markers like `[93-<-id]`,
    /// returns `None`.
    pub fn parse_token(token: &str) -> Option<Self> {
        match token.split_once('-') {
            Some((start, end)) => Self::try_new(start.parse().ok()?, end.parse().ok()?),
            None => {
                let slot = token.parse().ok()?;
                Self::try_new(slot, slot)
            }
        }
    }

    /// Number of slots in the range (always >= 1).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Returns true if the range contains `slot`.
    pub fn contains(&self, slot: u16) -> bool {
        (self.start..=self.end).contains(&slot)
    }

    /// Iterates over every slot in the range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Slot owner table: for each of the 16384 slots, the index of the
/// master that serves it, if any.
///
/// Indices refer to the master list of the router snapshot that owns the
/// table. A slot holds at most one owner; assigning an owned slot
/// replaces the previous owner.
#[derive(Clone)]
pub struct SlotTable {
    owners: Box<[Option<u16>]>,
}

impl fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("covered", &self.covered_count())
            .finish()
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    /// Creates a table with no slot assigned.
    pub fn new() -> Self {
        Self {
            owners: vec![None; SLOT_COUNT as usize].into_boxed_slice(),
        }
    }

    /// Returns the owner index for `slot`, if assigned.
    pub fn owner(&self, slot: u16) -> Option<usize> {
        self.owners
            .get(slot as usize)
            .copied()
            .flatten()
            .map(usize::from)
    }

    /// Assigns every slot of `range` to `owner`.
    ///
    /// Returns how many of those slots previously belonged to a different
    /// owner, so the caller can report overlapping ranges.
    pub fn assign_range(&mut self, range: SlotRange, owner: u16) -> usize {
        let mut replaced = 0;
        for slot in range.iter() {
            if let Some(entry) = self.owners.get_mut(slot as usize) {
                if matches!(*entry, Some(prev) if prev != owner) {
                    replaced += 1;
                }
                *entry = Some(owner);
            }
        }
        replaced
    }

    /// Number of slots with an owner.
    pub fn covered_count(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// Returns true when every slot has an owner.
    pub fn is_complete(&self) -> bool {
        self.owners.iter().all(Option::is_some)
    }

    /// Slots owned by `owner`, merged into contiguous ranges.
    pub fn ranges_of(&self, owner: u16) -> Vec<SlotRange> {
        self.collect_ranges(|entry| entry == Some(owner))
    }

    /// Slots without an owner, merged into contiguous ranges.
    pub fn uncovered_ranges(&self) -> Vec<SlotRange> {
        self.collect_ranges(|entry| entry.is_none())
    }

    fn collect_ranges(&self, pick: impl Fn(Option<u16>) -> bool) -> Vec<SlotRange> {
        let mut ranges = Vec::new();
        let mut open: Option<u16> = None;

        for (idx, entry) in self.owners.iter().enumerate() {
            let slot = idx as u16;
            match (pick(*entry), open) {
                (true, None) => open = Some(slot),
                (false, Some(start)) => {
                    ranges.push(SlotRange {
                        start,
                        end: slot - 1,
                    });
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            ranges.push(SlotRange {
                start,
                end: SLOT_COUNT - 1,
            });
        }
        ranges
    }
}
