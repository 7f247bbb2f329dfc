//! Decoded instruction model.
//!
//! Only the instructions the analysis interprets get their own variant. The
//! remaining numeric instructions are folded into `Unary`/`Binary`, and
//! anything outside the supported proposals is kept as `Unknown` so the
//! dataflow pass can stop trusting the operand stack from that point on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::function::FuncIdx;
use crate::core::types::BlockType;

/// Constant values. Floats are stored as raw bits to keep `Eq`/`Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "i32.const {}", v),
            Val::I64(v) => write!(f, "i64.const {}", v),
            Val::F32(bits) => write!(f, "f32.const {}", f32::from_bits(*bits)),
            Val::F64(bits) => write!(f, "f64.const {}", f64::from_bits(*bits)),
        }
    }
}

/// Memory immediate of loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemArg {
    pub offset: u64,
    pub align: u8,
    pub memory: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadOp {
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
}

impl LoadOp {
    /// Bytes read from memory.
    pub fn size(self) -> u32 {
        match self {
            LoadOp::I32Load8S | LoadOp::I32Load8U | LoadOp::I64Load8S | LoadOp::I64Load8U => 1,
            LoadOp::I32Load16S | LoadOp::I32Load16U | LoadOp::I64Load16S | LoadOp::I64Load16U => 2,
            LoadOp::I32Load | LoadOp::F32Load | LoadOp::I64Load32S | LoadOp::I64Load32U => 4,
            LoadOp::I64Load | LoadOp::F64Load => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
}

/// Binary numeric operators. The i32 integer operators that show up in
/// address and index arithmetic are kept apart so they can be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    I32Add,
    I32Sub,
    I32Mul,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrU,
    Other,
}

impl BinaryOp {
    /// Evaluate with WebAssembly's wrapping semantics.
    pub fn eval_i32(self, lhs: i32, rhs: i32) -> Option<i32> {
        match self {
            BinaryOp::I32Add => Some(lhs.wrapping_add(rhs)),
            BinaryOp::I32Sub => Some(lhs.wrapping_sub(rhs)),
            BinaryOp::I32Mul => Some(lhs.wrapping_mul(rhs)),
            BinaryOp::I32And => Some(lhs & rhs),
            BinaryOp::I32Or => Some(lhs | rhs),
            BinaryOp::I32Xor => Some(lhs ^ rhs),
            BinaryOp::I32Shl => Some(lhs.wrapping_shl(rhs as u32)),
            BinaryOp::I32ShrU => Some(((lhs as u32).wrapping_shr(rhs as u32)) as i32),
            BinaryOp::Other => None,
        }
    }
}

/// Instructions that change which functions a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableWriteOp {
    Set,
    Grow,
    Fill,
    Copy,
    Init,
}

impl TableWriteOp {
    /// Operands popped and results pushed.
    pub fn stack_effect(self) -> (usize, usize) {
        match self {
            TableWriteOp::Set => (2, 0),
            TableWriteOp::Grow => (2, 1),
            TableWriteOp::Fill | TableWriteOp::Copy | TableWriteOp::Init => (3, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instr {
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(FuncIdx),
    CallIndirect { type_idx: u32, table: u32 },
    ReturnCall(FuncIdx),
    ReturnCallIndirect { type_idx: u32, table: u32 },
    /// Typed function-reference call; targets are never narrowed.
    CallRef { type_idx: u32 },
    Drop,
    /// `select` and typed `select t`
    Select,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    Load { op: LoadOp, memarg: MemArg },
    Store { op: StoreOp, memarg: MemArg },
    MemorySize,
    MemoryGrow,
    Const(Val),
    /// Any one-operand, one-result numeric instruction (tests, conversions).
    Unary,
    Binary(BinaryOp),
    RefNull,
    RefIsNull,
    RefFunc(FuncIdx),
    TableGet(u32),
    /// Write to `table` (the destination for `table.copy`).
    TableWrite { op: TableWriteOp, table: u32 },
    /// Bulk memory and table instructions: fixed stack effect, no value tracked.
    Effect { pops: u8, pushes: u8 },
    /// Instruction outside the modelled set.
    Unknown { name: String },
}

impl Instr {
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Instr::Call(_)
                | Instr::CallIndirect { .. }
                | Instr::ReturnCall(_)
                | Instr::ReturnCallIndirect { .. }
                | Instr::CallRef { .. }
        )
    }

    pub fn is_indirect_call(&self) -> bool {
        matches!(
            self,
            Instr::CallIndirect { .. } | Instr::ReturnCallIndirect { .. } | Instr::CallRef { .. }
        )
    }
}

/// An instruction with its byte offset in the original binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Located {
    pub offset: usize,
    pub instr: Instr,
}

/// Constant expressions used by globals and segment offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstExpr {
    Const(Val),
    GlobalGet(u32),
    RefNull,
    RefFunc(FuncIdx),
    /// Extended constant expressions; never evaluated statically.
    Unsupported,
}

impl ConstExpr {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ConstExpr::Const(Val::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConstExpr::Const(Val::I64(v)) => Some(*v),
            ConstExpr::Const(Val::I32(v)) => Some(*v as i64),
            _ => None,
        }
    }
}
