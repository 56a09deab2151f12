//! Change-sequence scripts
//!
//! A script is the ordered list of steps the PMU executes atomically to move
//! the GPU from one operating point to another. Three named slots exist in
//! the super surface: CURRENT (being executed), LAST (most recently applied,
//! read at boot to discover the hardware state) and QUERY (scratch for
//! inspection). Scripts are stored in a fixed-size wire format; every slot
//! access round-trips through [`crate::surface::SuperSurface`].

use bitflags::bitflags;
use heapless::Vec as FixedVec;
use static_assertions::const_assert;

use crate::error::{PmuError, Result};
use crate::pstate::{ClkDomain, CLK_DOMAIN_COUNT};
use crate::surface::SurfaceMember;

/// Maximum steps a script can carry
pub const CHANGE_SEQ_MAX_STEPS: usize = 16;
/// Maximum voltage rails in a change
pub const CHANGE_SEQ_MAX_VOLT_RAILS: usize = 2;
/// Encoded size of one script slot
pub const SCRIPT_SIZE: usize = 256;

// Worst-case encoding: 4 header + 9 change fixed + 6 clock entries of 5 +
// 2 volt entries of 9 + 16 steps of 9.
const_assert!(4 + 9 + 1 + CLK_DOMAIN_COUNT * 5 + 1 + CHANGE_SEQ_MAX_VOLT_RAILS * 9
    + CHANGE_SEQ_MAX_STEPS * 9 <= SCRIPT_SIZE);

/// Named script slots in the super surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSlot {
    Current,
    Last,
    Query,
}

impl ScriptSlot {
    pub fn index(self) -> usize {
        match self {
            ScriptSlot::Current => 0,
            ScriptSlot::Last => 1,
            ScriptSlot::Query => 2,
        }
    }

    /// Byte offset of this slot within the super surface
    pub fn surface_offset(self) -> usize {
        SurfaceMember::ChangeSeqGrp.offset() + self.index() * SCRIPT_SIZE
    }
}

bitflags! {
    /// Change request flags (wire values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangeSeqFlags: u32 {
        /// Apply even if the target equals the current operating point
        const FORCE = 1 << 0;
        /// Return after submission without waiting for completion
        const ASYNC = 1 << 1;
        /// Do not synchronize the switch to vblank
        const SKIP_VBLANK_WAIT = 1 << 2;
    }
}

/// One clock-domain target in a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClkListItem {
    pub domain: ClkDomain,
    pub freq_mhz: u32,
}

/// One voltage-rail target in a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoltListItem {
    pub rail_idx: u8,
    pub voltage_uv: u32,
    pub voltage_min_noise_unaware_uv: u32,
}

/// The change descriptor submitted to firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeInput {
    pub pstate_index: u8,
    pub flags: ChangeSeqFlags,
    pub clk_list: FixedVec<ClkListItem, CLK_DOMAIN_COUNT>,
    pub volt_list: FixedVec<VoltListItem, CHANGE_SEQ_MAX_VOLT_RAILS>,
    /// All-ones forces the PMU to rebuild its VF-point cache
    pub vf_points_cache_counter: u32,
}

impl ChangeInput {
    pub fn new(pstate_index: u8, flags: ChangeSeqFlags) -> Self {
        Self {
            pstate_index,
            flags,
            clk_list: FixedVec::new(),
            volt_list: FixedVec::new(),
            vf_points_cache_counter: 0,
        }
    }
}

/// One script step (wire step union)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Program one clock domain
    Clocks { domain: ClkDomain, freq_mhz: u32 },
    /// Program one voltage rail
    Volt { rail_idx: u8, voltage_uv: u32 },
    /// Switch the firmware-visible pstate index
    Pstate { pstate_index: u8 },
    /// Retrain the bus interface to the pstate's PCIe entry
    Bif { pcie_idx: u8 },
    /// Disengage or re-engage low-power features around the switch
    Lpwr { engage: bool },
}

impl Step {
    fn wire_id(&self) -> u8 {
        match self {
            Step::Clocks { .. } => 0,
            Step::Volt { .. } => 1,
            Step::Pstate { .. } => 2,
            Step::Bif { .. } => 3,
            Step::Lpwr { .. } => 4,
        }
    }
}

/// Script header: progress bookkeeping maintained by firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptHeader {
    pub num_steps: u8,
    pub cur_step_index: u8,
    pub profiling: bool,
}

/// One complete script slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSeqScript {
    pub header: ScriptHeader,
    pub change: ChangeInput,
    pub steps: FixedVec<Step, CHANGE_SEQ_MAX_STEPS>,
}

impl ChangeSeqScript {
    /// Build the ordered step list for a change
    ///
    /// Low-power features are disengaged first and re-engaged last; voltage
    /// moves before clocks so a frequency raise never runs undervolted.
    pub fn build(change: ChangeInput) -> Self {
        let mut steps: FixedVec<Step, CHANGE_SEQ_MAX_STEPS> = FixedVec::new();
        let _ = steps.push(Step::Lpwr { engage: false });
        let _ = steps.push(Step::Pstate {
            pstate_index: change.pstate_index,
        });
        for volt in change.volt_list.iter() {
            let _ = steps.push(Step::Volt {
                rail_idx: volt.rail_idx,
                voltage_uv: volt.voltage_uv,
            });
        }
        for clk in change.clk_list.iter() {
            let _ = steps.push(Step::Clocks {
                domain: clk.domain,
                freq_mhz: clk.freq_mhz,
            });
        }
        let _ = steps.push(Step::Bif { pcie_idx: 0 });
        let _ = steps.push(Step::Lpwr { engage: true });

        Self {
            header: ScriptHeader {
                num_steps: steps.len() as u8,
                cur_step_index: 0,
                profiling: false,
            },
            change,
            steps,
        }
    }

    /// Encode into the fixed-size slot format
    pub fn encode(&self) -> [u8; SCRIPT_SIZE] {
        let mut buf = [0u8; SCRIPT_SIZE];
        buf[0] = self.header.num_steps;
        buf[1] = self.header.cur_step_index;
        buf[2] = self.header.profiling as u8;
        buf[4] = self.change.pstate_index;
        buf[5..9].copy_from_slice(&self.change.flags.bits().to_le_bytes());
        buf[9..13].copy_from_slice(&self.change.vf_points_cache_counter.to_le_bytes());

        let mut off = 13;
        buf[off] = self.change.clk_list.len() as u8;
        off += 1;
        for clk in self.change.clk_list.iter() {
            buf[off] = clk.domain.wire_value();
            buf[off + 1..off + 5].copy_from_slice(&clk.freq_mhz.to_le_bytes());
            off += 5;
        }
        buf[off] = self.change.volt_list.len() as u8;
        off += 1;
        for volt in self.change.volt_list.iter() {
            buf[off] = volt.rail_idx;
            buf[off + 1..off + 5].copy_from_slice(&volt.voltage_uv.to_le_bytes());
            buf[off + 5..off + 9]
                .copy_from_slice(&volt.voltage_min_noise_unaware_uv.to_le_bytes());
            off += 9;
        }
        for step in self.steps.iter() {
            buf[off] = step.wire_id();
            match step {
                Step::Clocks { domain, freq_mhz } => {
                    buf[off + 1] = domain.wire_value();
                    buf[off + 2..off + 6].copy_from_slice(&freq_mhz.to_le_bytes());
                }
                Step::Volt {
                    rail_idx,
                    voltage_uv,
                } => {
                    buf[off + 1] = *rail_idx;
                    buf[off + 2..off + 6].copy_from_slice(&voltage_uv.to_le_bytes());
                }
                Step::Pstate { pstate_index } => buf[off + 1] = *pstate_index,
                Step::Bif { pcie_idx } => buf[off + 1] = *pcie_idx,
                Step::Lpwr { engage } => buf[off + 1] = *engage as u8,
            }
            off += 9;
        }
        buf
    }

    /// Decode a slot previously written by [`ChangeSeqScript::encode`]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SCRIPT_SIZE {
            return Err(PmuError::MalformedTableHeader);
        }
        let num_steps = buf[0];
        if num_steps as usize > CHANGE_SEQ_MAX_STEPS {
            return Err(PmuError::InvalidTableEntry(0));
        }
        let header = ScriptHeader {
            num_steps,
            cur_step_index: buf[1],
            profiling: buf[2] != 0,
        };
        let flags = ChangeSeqFlags::from_bits_truncate(u32::from_le_bytes([
            buf[5], buf[6], buf[7], buf[8],
        ]));
        let mut change = ChangeInput::new(buf[4], flags);
        change.vf_points_cache_counter =
            u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]);

        let mut off = 13;
        let clk_count = buf[off] as usize;
        off += 1;
        if clk_count > CLK_DOMAIN_COUNT {
            return Err(PmuError::InvalidTableEntry(0));
        }
        for _ in 0..clk_count {
            let domain =
                ClkDomain::from_wire(buf[off]).ok_or(PmuError::InvalidTableEntry(off as u32))?;
            let freq_mhz = u32::from_le_bytes([buf[off + 1], buf[off + 2], buf[off + 3], buf[off + 4]]);
            let _ = change.clk_list.push(ClkListItem { domain, freq_mhz });
            off += 5;
        }
        let volt_count = buf[off] as usize;
        off += 1;
        if volt_count > CHANGE_SEQ_MAX_VOLT_RAILS {
            return Err(PmuError::InvalidTableEntry(0));
        }
        for _ in 0..volt_count {
            let _ = change.volt_list.push(VoltListItem {
                rail_idx: buf[off],
                voltage_uv: u32::from_le_bytes([
                    buf[off + 1],
                    buf[off + 2],
                    buf[off + 3],
                    buf[off + 4],
                ]),
                voltage_min_noise_unaware_uv: u32::from_le_bytes([
                    buf[off + 5],
                    buf[off + 6],
                    buf[off + 7],
                    buf[off + 8],
                ]),
            });
            off += 9;
        }

        let mut steps: FixedVec<Step, CHANGE_SEQ_MAX_STEPS> = FixedVec::new();
        for _ in 0..num_steps {
            let step = match buf[off] {
                0 => Step::Clocks {
                    domain: ClkDomain::from_wire(buf[off + 1])
                        .ok_or(PmuError::InvalidTableEntry(off as u32))?,
                    freq_mhz: u32::from_le_bytes([
                        buf[off + 2],
                        buf[off + 3],
                        buf[off + 4],
                        buf[off + 5],
                    ]),
                },
                1 => Step::Volt {
                    rail_idx: buf[off + 1],
                    voltage_uv: u32::from_le_bytes([
                        buf[off + 2],
                        buf[off + 3],
                        buf[off + 4],
                        buf[off + 5],
                    ]),
                },
                2 => Step::Pstate {
                    pstate_index: buf[off + 1],
                },
                3 => Step::Bif {
                    pcie_idx: buf[off + 1],
                },
                4 => Step::Lpwr {
                    engage: buf[off + 1] != 0,
                },
                _ => return Err(PmuError::InvalidTableEntry(off as u32)),
            };
            let _ = steps.push(step);
            off += 9;
        }

        Ok(Self {
            header,
            change,
            steps,
        })
    }
}
