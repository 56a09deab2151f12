//! VFE variables
//!
//! A variable is either a single sensed/configured quantity or a derived
//! combination of two other variables. Each variable carries two masks: the
//! variables it depends on (itself included) and, after the inversion pass in
//! [`super::equ::build_dependency_masks`], the equations that depend on it.

use crate::boardobj::{BoardObjGroup, BoardObjGrpMask};
use crate::error::{PmuError, Result};

/// Variable kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfeVarKind {
    /// Temperature from a thermal channel
    SingleSensedTemp { therm_channel_idx: u8 },
    /// Fuse value burned at manufacturing
    SingleSensedFuse { fuse_id: u8 },
    /// Frequency of a clock domain
    SingleFrequency { clk_domain_idx: u8 },
    /// Rail voltage
    SingleVoltage,
    /// Product of two other variables
    DerivedProduct { var_idx0: u8, var_idx1: u8 },
    /// Sum of two other variables
    DerivedSum { var_idx0: u8, var_idx1: u8 },
}

/// One VFE variable
#[derive(Debug, Clone, PartialEq)]
pub struct VfeVar {
    pub kind: VfeVarKind,
    pub out_range_min: u32,
    pub out_range_max: u32,
    /// Transitive set of variables this one reads, own bit included
    pub mask_depending_vars: BoardObjGrpMask,
    /// Equations whose value changes when this variable changes
    pub mask_dependent_equs: BoardObjGrpMask,
}

impl VfeVar {
    pub fn new(kind: VfeVarKind, out_range_min: u32, out_range_max: u32) -> Self {
        Self {
            kind,
            out_range_min,
            out_range_max,
            mask_depending_vars: BoardObjGrpMask::e32(),
            mask_dependent_equs: BoardObjGrpMask::e255(),
        }
    }
}

/// Compute `mask_depending_vars` for every variable
///
/// Single variables depend only on themselves; derived variables union in
/// their operands' masks. The walk keeps an on-stack marker so a derived
/// chain that loops back fails with `CyclicEquationGraph` instead of
/// recursing forever.
pub fn build_var_dependency_masks(vars: &mut BoardObjGroup<VfeVar>) -> Result<()> {
    let indices: Vec<u8> = vars.iter().map(|(idx, _)| idx).collect();
    let mut built: Vec<(u8, BoardObjGrpMask)> = Vec::with_capacity(indices.len());
    for idx in indices {
        let mut on_stack = BoardObjGrpMask::e32();
        let mask = var_mask(vars, idx, &mut on_stack)?;
        built.push((idx, mask));
    }
    for (idx, mask) in built {
        if let Some(var) = vars.get_mut(idx) {
            var.mask_depending_vars = mask;
        }
    }
    Ok(())
}

fn var_mask(
    vars: &BoardObjGroup<VfeVar>,
    idx: u8,
    on_stack: &mut BoardObjGrpMask,
) -> Result<BoardObjGrpMask> {
    if on_stack.bit_get(idx) {
        return Err(PmuError::CyclicEquationGraph(idx));
    }
    on_stack.bit_set(idx)?;

    let var = vars.get(idx).ok_or(PmuError::VfeVarNotFound(idx))?;
    let mut mask = BoardObjGrpMask::e32();
    mask.bit_set(idx)?;

    match var.kind {
        VfeVarKind::DerivedProduct { var_idx0, var_idx1 }
        | VfeVarKind::DerivedSum { var_idx0, var_idx1 } => {
            mask.or_assign(&var_mask(vars, var_idx0, on_stack)?)?;
            mask.or_assign(&var_mask(vars, var_idx1, on_stack)?)?;
        }
        _ => {}
    }

    on_stack.bit_clr(idx)?;
    Ok(mask)
}
