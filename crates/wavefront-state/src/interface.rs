//! Per-stage interface data produced by entry-point mutation.

use wavefront_ir::EntryArg;

/// One argument of the lowered entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryArgInfo {
    pub arg: EntryArg,
    /// Passed in uniform (scalar) registers.
    pub in_reg: bool,
    pub dwords: u32,
}

/// A root user-data node passed directly in registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserDataMapping {
    pub node: u32,
    /// First uniform register holding the node.
    pub first_reg: u32,
    pub dwords: u32,
}

/// Root nodes reached through the spill table pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpillTable {
    /// Index of the spill table pointer in the entry arguments.
    pub arg_index: u32,
    /// Spilled root node indices.
    pub nodes: Vec<u32>,
    /// Dword offset in user data of the first spilled node.
    pub threshold_in_dwords: u32,
}

/// Interface of one lowered stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceData {
    pub entry_args: Vec<EntryArgInfo>,
    pub user_data_map: Vec<UserDataMapping>,
    pub spill_table: Option<SpillTable>,
    /// Uniform registers consumed by user data, including the spill pointer.
    pub user_data_regs: u32,
}

impl InterfaceData {
    /// Position of `arg` in the entry arguments.
    pub fn arg_index(&self, arg: EntryArg) -> Option<u32> {
        self.entry_args
            .iter()
            .position(|a| a.arg == arg)
            .map(|i| i as u32)
    }

    /// Number of uniform-register arguments at the front of the signature.
    pub fn uniform_arg_count(&self) -> usize {
        self.entry_args.iter().take_while(|a| a.in_reg).count()
    }
}
