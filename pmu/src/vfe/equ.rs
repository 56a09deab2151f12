//! VFE equations
//!
//! Equation nodes reference one variable leaf and, depending on the kind, up
//! to two other equation nodes. Sibling nodes are chained through
//! `equ_idx_next` and terminated by the invalid-index sentinel. The firmware
//! table is trusted for values but not for shape: the dependency-mask build
//! refuses cyclic graphs instead of walking them forever.

use log::{debug, error};

use crate::boardobj::{
    BoardObjGroup, BoardObjGrpMask, BOARDOBJ_IDX_INVALID, E255_MAX_OBJECTS, E32_MAX_OBJECTS,
};
use crate::error::{PmuError, Result};
use crate::vfe::var::{build_var_dependency_masks, VfeVar, VfeVarKind};
use crate::vfe::VfeOutputType;

/// Comparison function of a `Compare` equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfeCompareFunc {
    Equal,
    GreaterEq,
    Greater,
}

/// Equation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfeEquKind {
    /// Ternary select between two equations based on comparing the variable
    /// against `criteria`
    Compare {
        func: VfeCompareFunc,
        equ_idx_true: u8,
        equ_idx_false: u8,
        criteria: u32,
    },
    /// Minimum or maximum of two equations
    MinMax {
        b_max: bool,
        equ_idx0: u8,
        equ_idx1: u8,
    },
    /// Three-coefficient polynomial of the variable
    Quadratic { coeffs: [u32; 3] },
    /// Scale another equation's result by the variable
    Scalar { equ_idx_to_scale: u8 },
}

/// One VFE equation node
#[derive(Debug, Clone, PartialEq)]
pub struct VfeEqu {
    pub var_idx: u8,
    /// Sibling chain link, `BOARDOBJ_IDX_INVALID` terminates
    pub equ_idx_next: u8,
    pub output_type: VfeOutputType,
    pub kind: VfeEquKind,
    /// Transitive set of variables this equation reads
    pub mask_depending_vars: BoardObjGrpMask,
}

impl VfeEqu {
    pub fn new(var_idx: u8, equ_idx_next: u8, output_type: VfeOutputType, kind: VfeEquKind) -> Self {
        Self {
            var_idx,
            equ_idx_next,
            output_type,
            kind,
            mask_depending_vars: BoardObjGrpMask::e32(),
        }
    }
}

// ============================================================================
// Dependency-mask construction
// ============================================================================

/// Build `mask_depending_vars` on every equation and the inverted
/// `mask_dependent_equs` on every variable
///
/// Variable masks are built first (derived variables union their operands),
/// then each equation's mask, then the inversion. A pure set-union
/// computation: order independent, no tie-breaking.
pub fn build_dependency_masks(
    equs: &mut BoardObjGroup<VfeEqu>,
    vars: &mut BoardObjGroup<VfeVar>,
) -> Result<()> {
    build_var_dependency_masks(vars)?;

    let indices: Vec<u8> = equs.iter().map(|(idx, _)| idx).collect();
    let mut built: Vec<(u8, BoardObjGrpMask)> = Vec::with_capacity(indices.len());
    for idx in &indices {
        let mut on_stack = BoardObjGrpMask::e255();
        on_stack.bit_set(*idx)?;
        let mask = equ_own_mask(equs, vars, *idx, &mut on_stack)?;
        built.push((*idx, mask));
    }
    for (idx, mask) in built {
        if let Some(equ) = equs.get_mut(idx) {
            equ.mask_depending_vars = mask;
        }
    }

    // Invert the relation: var -> equations reading it.
    for equ_idx in indices {
        let var_bits: Vec<u8> = equs
            .get(equ_idx)
            .ok_or(PmuError::VfeEquNotFound(equ_idx))?
            .mask_depending_vars
            .iter_set()
            .collect();
        for var_idx in var_bits {
            let var = vars
                .get_mut(var_idx)
                .ok_or(PmuError::VfeVarNotFound(var_idx))?;
            var.mask_dependent_equs.bit_set(equ_idx)?;
        }
    }
    Ok(())
}

/// Mask of one equation node, not following its own sibling link
fn equ_own_mask(
    equs: &BoardObjGroup<VfeEqu>,
    vars: &BoardObjGroup<VfeVar>,
    idx: u8,
    on_stack: &mut BoardObjGrpMask,
) -> Result<BoardObjGrpMask> {
    let equ = equs.get(idx).ok_or(PmuError::VfeEquNotFound(idx))?;
    let mut mask = BoardObjGrpMask::e32();

    // MinMax reads only its operand equations; every other kind reads its
    // variable leaf.
    match equ.kind {
        VfeEquKind::MinMax { .. } => {}
        _ => {
            let var = vars
                .get(equ.var_idx)
                .ok_or(PmuError::VfeVarNotFound(equ.var_idx))?;
            mask.or_assign(&var.mask_depending_vars)?;
        }
    }

    match equ.kind {
        VfeEquKind::Compare {
            equ_idx_true,
            equ_idx_false,
            ..
        } => {
            combine_chain(equs, vars, equ_idx_true, &mut mask, on_stack)?;
            combine_chain(equs, vars, equ_idx_false, &mut mask, on_stack)?;
        }
        VfeEquKind::MinMax {
            equ_idx0, equ_idx1, ..
        } => {
            combine_chain(equs, vars, equ_idx0, &mut mask, on_stack)?;
            combine_chain(equs, vars, equ_idx1, &mut mask, on_stack)?;
        }
        VfeEquKind::Quadratic { .. } => {}
        VfeEquKind::Scalar { equ_idx_to_scale } => {
            combine_chain(equs, vars, equ_idx_to_scale, &mut mask, on_stack)?;
        }
    }
    Ok(mask)
}

/// Union the masks of every node along an `equ_idx_next` chain into `dst`
///
/// Two guards: `chain_visited` catches a `equ_idx_next` link that loops back
/// into this chain, `on_stack` catches an operand reference back into any
/// node currently being expanded. Both are reported as a cyclic graph.
fn combine_chain(
    equs: &BoardObjGroup<VfeEqu>,
    vars: &BoardObjGroup<VfeVar>,
    start_idx: u8,
    dst: &mut BoardObjGrpMask,
    on_stack: &mut BoardObjGrpMask,
) -> Result<()> {
    let mut chain_visited = BoardObjGrpMask::e255();
    let mut idx = start_idx;
    while idx != BOARDOBJ_IDX_INVALID {
        if chain_visited.bit_get(idx) || on_stack.bit_get(idx) {
            error!("vfe equ graph cycles through index {}", idx);
            return Err(PmuError::CyclicEquationGraph(idx));
        }
        chain_visited.bit_set(idx)?;
        on_stack.bit_set(idx)?;
        let node_mask = equ_own_mask(equs, vars, idx, on_stack)?;
        dst.or_assign(&node_mask)?;
        on_stack.bit_clr(idx)?;

        idx = equs
            .get(idx)
            .ok_or(PmuError::VfeEquNotFound(idx))?
            .equ_idx_next;
    }
    Ok(())
}

// ============================================================================
// Firmware table parsing
// ============================================================================

/// Expected table header size
pub const VFE_TABLE_HEADER_SIZE: u8 = 8;
/// Expected table version
pub const VFE_TABLE_VERSION: u8 = 0x30;
/// Expected variable entry size
pub const VFE_VAR_ENTRY_SIZE: u8 = 12;
/// Expected equation entry size
pub const VFE_EQU_ENTRY_SIZE: u8 = 18;

// Variable entry types
const VAR_TYPE_DISABLED: u8 = 0;
const VAR_TYPE_SENSED_TEMP: u8 = 1;
const VAR_TYPE_SENSED_FUSE: u8 = 2;
const VAR_TYPE_FREQUENCY: u8 = 3;
const VAR_TYPE_VOLTAGE: u8 = 4;
const VAR_TYPE_DERIVED_PRODUCT: u8 = 5;
const VAR_TYPE_DERIVED_SUM: u8 = 6;

// Equation entry types; the fixed-point variants are retired and skipped.
const EQU_TYPE_DISABLED: u8 = 0;
const EQU_TYPE_QUADRATIC: u8 = 1;
const EQU_TYPE_MINMAX: u8 = 2;
const EQU_TYPE_COMPARE: u8 = 3;
const EQU_TYPE_SCALAR: u8 = 4;
const EQU_TYPE_QUADRATIC_FXP: u8 = 5;
const EQU_TYPE_MINMAX_FXP: u8 = 6;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parse the VFE firmware table into variable and equation groups
///
/// Layout: an 8-byte header `{header_size, version, var_count, var_size,
/// equ_count, equ_size, reserved[2]}` followed by the variable entries and
/// then the equation entries. Entries of retired types are silently skipped,
/// keeping their table index unoccupied so cross-references stay valid.
pub fn parse_vfe_table(
    table: &[u8],
) -> Result<(BoardObjGroup<VfeVar>, BoardObjGroup<VfeEqu>)> {
    if table.len() < VFE_TABLE_HEADER_SIZE as usize {
        return Err(PmuError::MalformedTableHeader);
    }
    if table[0] != VFE_TABLE_HEADER_SIZE {
        return Err(PmuError::MalformedTableHeader);
    }
    if table[1] != VFE_TABLE_VERSION {
        return Err(PmuError::UnsupportedTableVersion(table[1]));
    }
    let var_count = table[2] as usize;
    let var_size = table[3] as usize;
    let equ_count = table[4] as usize;
    let equ_size = table[5] as usize;
    if var_size != VFE_VAR_ENTRY_SIZE as usize || equ_size != VFE_EQU_ENTRY_SIZE as usize {
        return Err(PmuError::MalformedTableHeader);
    }
    let needed = VFE_TABLE_HEADER_SIZE as usize + var_count * var_size + equ_count * equ_size;
    if table.len() < needed {
        return Err(PmuError::MalformedTableHeader);
    }

    let mut vars = BoardObjGroup::construct(E32_MAX_OBJECTS)?;
    let var_base = VFE_TABLE_HEADER_SIZE as usize;
    for index in 0..var_count {
        let entry = &table[var_base + index * var_size..var_base + (index + 1) * var_size];
        let kind = match entry[0] {
            VAR_TYPE_DISABLED => continue,
            VAR_TYPE_SENSED_TEMP => VfeVarKind::SingleSensedTemp {
                therm_channel_idx: entry[1],
            },
            VAR_TYPE_SENSED_FUSE => VfeVarKind::SingleSensedFuse { fuse_id: entry[1] },
            VAR_TYPE_FREQUENCY => VfeVarKind::SingleFrequency {
                clk_domain_idx: entry[1],
            },
            VAR_TYPE_VOLTAGE => VfeVarKind::SingleVoltage,
            VAR_TYPE_DERIVED_PRODUCT => VfeVarKind::DerivedProduct {
                var_idx0: entry[1],
                var_idx1: entry[2],
            },
            VAR_TYPE_DERIVED_SUM => VfeVarKind::DerivedSum {
                var_idx0: entry[1],
                var_idx1: entry[2],
            },
            _ => return Err(PmuError::InvalidTableEntry(index as u32)),
        };
        let var = VfeVar::new(kind, read_u32(entry, 4), read_u32(entry, 8));
        vars.insert(index as u8, var)?;
    }

    let mut equs = BoardObjGroup::construct(E255_MAX_OBJECTS)?;
    let equ_base = var_base + var_count * var_size;
    for index in 0..equ_count {
        let entry = &table[equ_base + index * equ_size..equ_base + (index + 1) * equ_size];
        let var_idx = entry[1];
        let equ_idx_next = entry[2];
        let output_type = VfeOutputType::from_wire(entry[3])
            .ok_or(PmuError::InvalidTableEntry(index as u32))?;
        let param0 = read_u32(entry, 4);
        let param1 = read_u32(entry, 8);
        let param2 = read_u32(entry, 12);

        let kind = match entry[0] {
            EQU_TYPE_DISABLED | EQU_TYPE_QUADRATIC_FXP | EQU_TYPE_MINMAX_FXP => {
                debug!("skipping vfe equ entry {} of retired type {}", index, entry[0]);
                continue;
            }
            EQU_TYPE_QUADRATIC => VfeEquKind::Quadratic {
                coeffs: [param0, param1, param2],
            },
            EQU_TYPE_MINMAX => VfeEquKind::MinMax {
                b_max: entry[16] != 0,
                equ_idx0: param0 as u8,
                equ_idx1: param1 as u8,
            },
            EQU_TYPE_COMPARE => {
                let func = match entry[16] {
                    1 => VfeCompareFunc::Equal,
                    2 => VfeCompareFunc::GreaterEq,
                    3 => VfeCompareFunc::Greater,
                    other => {
                        error!("invalid vfe compare function {} at entry {}", other, index);
                        return Err(PmuError::InvalidTableEntry(index as u32));
                    }
                };
                VfeEquKind::Compare {
                    func,
                    equ_idx_true: param1 as u8,
                    equ_idx_false: param2 as u8,
                    criteria: param0,
                }
            }
            EQU_TYPE_SCALAR => VfeEquKind::Scalar {
                equ_idx_to_scale: param0 as u8,
            },
            _ => return Err(PmuError::InvalidTableEntry(index as u32)),
        };
        equs.insert(index as u8, VfeEqu::new(var_idx, equ_idx_next, output_type, kind))?;
    }

    debug!(
        "vfe table parsed: {} vars, {} equs",
        vars.len(),
        equs.len()
    );
    Ok((vars, equs))
}
