//! Pstate table
//!
//! A pstate is a named performance level (P0 = fastest, increasing id =
//! slower) bundling a frequency range per clock domain. The table is parsed
//! once from a firmware table at subsystem setup and is immutable afterward.

use log::{debug, warn};

use crate::boardobj::{BoardObjGroup, E32_MAX_OBJECTS};
use crate::error::{PmuError, Result};

/// Clock domains addressed by pstates and change requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkDomain {
    GpcClk,
    SysClk,
    XbarClk,
    MClk,
    HostClk,
    NvdClk,
}

/// Number of addressable clock domains
pub const CLK_DOMAIN_COUNT: usize = 6;

impl ClkDomain {
    pub fn wire_value(self) -> u8 {
        match self {
            ClkDomain::GpcClk => 0,
            ClkDomain::SysClk => 1,
            ClkDomain::XbarClk => 2,
            ClkDomain::MClk => 3,
            ClkDomain::HostClk => 4,
            ClkDomain::NvdClk => 5,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => ClkDomain::GpcClk,
            1 => ClkDomain::SysClk,
            2 => ClkDomain::XbarClk,
            3 => ClkDomain::MClk,
            4 => ClkDomain::HostClk,
            5 => ClkDomain::NvdClk,
            _ => return None,
        })
    }
}

/// Highest-performance pstate id
pub const PSTATE_P0: u32 = 0;

/// Frequency range of one clock domain within a pstate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClkRange {
    pub min_khz: u32,
    pub nominal_khz: u32,
    pub max_khz: u32,
}

/// Per-domain clock ranges of one pstate
#[derive(Debug, Clone, PartialEq)]
pub struct ClkSetInfo {
    ranges: [Option<ClkRange>; CLK_DOMAIN_COUNT],
}

impl ClkSetInfo {
    pub fn new() -> Self {
        Self {
            ranges: [None; CLK_DOMAIN_COUNT],
        }
    }

    pub fn set(&mut self, domain: ClkDomain, range: ClkRange) {
        self.ranges[domain.wire_value() as usize] = Some(range);
    }

    pub fn get(&self, domain: ClkDomain) -> Option<&ClkRange> {
        self.ranges[domain.wire_value() as usize].as_ref()
    }
}

impl Default for ClkSetInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// One performance level
#[derive(Debug, Clone, PartialEq)]
pub struct Pstate {
    /// Ordinal id, lower = higher performance
    pub id: u32,
    pub clocks: ClkSetInfo,
    pub lpwr_entry_idx: u8,
    pub pcie_idx: u8,
    pub nvlink_idx: u8,
}

/// The parsed pstate table
#[derive(Debug, PartialEq)]
pub struct Pstates {
    group: BoardObjGroup<Pstate>,
}

impl Pstates {
    /// Look up a pstate by id; linear scan, n is small
    pub fn find_by_id(&self, id: u32) -> Option<&Pstate> {
        self.group.iter().map(|(_, p)| p).find(|p| p.id == id)
    }

    /// Group slot index of the pstate with the given id
    ///
    /// This index is the firmware-visible "table entry index". Absent ids
    /// yield `None`; callers surface `PstateNotFound`.
    pub fn index_of(&self, id: u32) -> Option<u8> {
        self.group
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(idx, _)| idx)
    }

    /// Clock range of `domain` within pstate `id`
    pub fn get_clk_range(&self, id: u32, domain: ClkDomain) -> Option<&ClkRange> {
        self.find_by_id(id).and_then(|p| p.clocks.get(domain))
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Pstate)> + '_ {
        self.group.iter()
    }
}

// ============================================================================
// Firmware table parsing
// ============================================================================

/// Expected table version
pub const PSTATE_TABLE_VERSION: u8 = 0x20;
/// Expected header size
pub const PSTATE_TABLE_HEADER_SIZE: u8 = 8;
/// Expected base entry size
pub const PSTATE_BASE_ENTRY_SIZE: u8 = 8;
/// Expected per-clock entry size
pub const PSTATE_CLOCK_ENTRY_SIZE: u8 = 13;

/// Level byte marking an entry the firmware wants omitted
const PSTATE_LEVEL_SKIP: u8 = 0xFF;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parse the pstate firmware table
///
/// Header: `{version, header_size, base_entry_size, clock_entry_size,
/// clock_entry_count, num_entries, reserved[2]}`. Each entry is a base block
/// followed by `clock_entry_count` clock blocks. Entries whose level byte is
/// the skip sentinel are omitted silently; a clock range violating
/// `min <= nominal <= max` is a parse error.
pub fn parse_pstate_table(table: &[u8]) -> Result<Pstates> {
    if table.len() < PSTATE_TABLE_HEADER_SIZE as usize {
        return Err(PmuError::MalformedTableHeader);
    }
    if table[0] != PSTATE_TABLE_VERSION {
        return Err(PmuError::UnsupportedTableVersion(table[0]));
    }
    if table[1] != PSTATE_TABLE_HEADER_SIZE
        || table[2] != PSTATE_BASE_ENTRY_SIZE
        || table[3] != PSTATE_CLOCK_ENTRY_SIZE
    {
        return Err(PmuError::MalformedTableHeader);
    }
    let clock_entry_count = table[4] as usize;
    let num_entries = table[5] as usize;
    if clock_entry_count > CLK_DOMAIN_COUNT {
        return Err(PmuError::MalformedTableHeader);
    }

    let entry_size =
        PSTATE_BASE_ENTRY_SIZE as usize + clock_entry_count * PSTATE_CLOCK_ENTRY_SIZE as usize;
    let needed = PSTATE_TABLE_HEADER_SIZE as usize + num_entries * entry_size;
    if table.len() < needed {
        return Err(PmuError::MalformedTableHeader);
    }

    let mut group = BoardObjGroup::construct(E32_MAX_OBJECTS)?;
    let mut slot: u8 = 0;
    for index in 0..num_entries {
        let base = PSTATE_TABLE_HEADER_SIZE as usize + index * entry_size;
        let entry = &table[base..base + entry_size];

        let level = entry[0];
        if level == PSTATE_LEVEL_SKIP {
            debug!("pstate table entry {} marked skip", index);
            continue;
        }

        let mut clocks = ClkSetInfo::new();
        for clk in 0..clock_entry_count {
            let off = PSTATE_BASE_ENTRY_SIZE as usize + clk * PSTATE_CLOCK_ENTRY_SIZE as usize;
            let domain = ClkDomain::from_wire(entry[off])
                .ok_or(PmuError::InvalidTableEntry(index as u32))?;
            let range = ClkRange {
                min_khz: read_u32(entry, off + 1),
                nominal_khz: read_u32(entry, off + 5),
                max_khz: read_u32(entry, off + 9),
            };
            if !(range.min_khz <= range.nominal_khz && range.nominal_khz <= range.max_khz) {
                warn!(
                    "pstate P{} {:?}: bad range {}..{}..{} kHz",
                    level, domain, range.min_khz, range.nominal_khz, range.max_khz
                );
                return Err(PmuError::MalformedClockRange);
            }
            clocks.set(domain, range);
        }

        let pstate = Pstate {
            id: level as u32,
            clocks,
            lpwr_entry_idx: entry[2],
            pcie_idx: entry[3],
            nvlink_idx: entry[4],
        };
        group.insert(slot, pstate)?;
        slot += 1;
    }

    debug!("pstate table parsed: {} levels", group.len());
    Ok(Pstates { group })
}
