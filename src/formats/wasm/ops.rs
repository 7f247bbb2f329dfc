//! Conversion from `wasmparser` operators to the `Instr` model.

use wasmparser::Operator;

use crate::core::function::FuncIdx;
use crate::core::instruction::{BinaryOp, Instr, LoadOp, MemArg, StoreOp, TableWriteOp, Val};
use crate::core::types::{BlockType, ValType};

pub(crate) fn val_type(ty: wasmparser::ValType) -> ValType {
    match ty {
        wasmparser::ValType::I32 => ValType::I32,
        wasmparser::ValType::I64 => ValType::I64,
        wasmparser::ValType::F32 => ValType::F32,
        wasmparser::ValType::F64 => ValType::F64,
        wasmparser::ValType::V128 => ValType::V128,
        wasmparser::ValType::Ref(r) => ref_type(r),
    }
}

pub(crate) fn ref_type(r: wasmparser::RefType) -> ValType {
    if r.is_extern_ref() {
        ValType::ExternRef
    } else {
        ValType::FuncRef
    }
}

fn block_type(bt: wasmparser::BlockType) -> BlockType {
    match bt {
        wasmparser::BlockType::Empty => BlockType::Empty,
        wasmparser::BlockType::Type(ty) => BlockType::Value(val_type(ty)),
        wasmparser::BlockType::FuncType(idx) => BlockType::Func(idx),
    }
}

fn mem_arg(m: &wasmparser::MemArg) -> MemArg {
    MemArg {
        offset: m.offset,
        align: m.align,
        memory: m.memory,
    }
}

fn load(op: LoadOp, m: &wasmparser::MemArg) -> Instr {
    Instr::Load {
        op,
        memarg: mem_arg(m),
    }
}

fn store(op: StoreOp, m: &wasmparser::MemArg) -> Instr {
    Instr::Store {
        op,
        memarg: mem_arg(m),
    }
}

/// Variant name of an operator, for `Instr::Unknown`.
fn table_write(op: TableWriteOp, table: u32) -> Instr {
    Instr::TableWrite { op, table }
}

fn operator_name(op: &Operator<'_>) -> String {
    let dbg = format!("{:?}", op);
    dbg.split(|c: char| c == ' ' || c == '{' || c == '(')
        .next()
        .unwrap_or("unknown")
        .to_string()
}

/// Convert one operator. Only fails on malformed immediates (`br_table`).
pub(crate) fn convert(op: &Operator<'_>) -> wasmparser::Result<Instr> {
    use Operator as O;
    let instr = match op {
        O::Unreachable => Instr::Unreachable,
        O::Nop => Instr::Nop,
        O::Block { blockty } => Instr::Block(block_type(*blockty)),
        O::Loop { blockty } => Instr::Loop(block_type(*blockty)),
        O::If { blockty } => Instr::If(block_type(*blockty)),
        O::Else => Instr::Else,
        O::End => Instr::End,
        O::Br { relative_depth } => Instr::Br(*relative_depth),
        O::BrIf { relative_depth } => Instr::BrIf(*relative_depth),
        O::BrTable { targets } => {
            let mut depths = Vec::with_capacity(targets.len() as usize);
            for t in targets.targets() {
                depths.push(t?);
            }
            Instr::BrTable {
                targets: depths,
                default: targets.default(),
            }
        }
        O::Return => Instr::Return,
        O::Call { function_index } => Instr::Call(FuncIdx(*function_index)),
        O::CallIndirect {
            type_index,
            table_index,
            ..
        } => Instr::CallIndirect {
            type_idx: *type_index,
            table: *table_index,
        },
        O::ReturnCall { function_index } => Instr::ReturnCall(FuncIdx(*function_index)),
        O::ReturnCallIndirect {
            type_index,
            table_index,
            ..
        } => Instr::ReturnCallIndirect {
            type_idx: *type_index,
            table: *table_index,
        },
        O::CallRef { type_index } => Instr::CallRef {
            type_idx: *type_index,
        },
        O::Drop => Instr::Drop,
        O::Select | O::TypedSelect { .. } => Instr::Select,
        O::LocalGet { local_index } => Instr::LocalGet(*local_index),
        O::LocalSet { local_index } => Instr::LocalSet(*local_index),
        O::LocalTee { local_index } => Instr::LocalTee(*local_index),
        O::GlobalGet { global_index } => Instr::GlobalGet(*global_index),
        O::GlobalSet { global_index } => Instr::GlobalSet(*global_index),

        O::I32Load { memarg } => load(LoadOp::I32Load, memarg),
        O::I64Load { memarg } => load(LoadOp::I64Load, memarg),
        O::F32Load { memarg } => load(LoadOp::F32Load, memarg),
        O::F64Load { memarg } => load(LoadOp::F64Load, memarg),
        O::I32Load8S { memarg } => load(LoadOp::I32Load8S, memarg),
        O::I32Load8U { memarg } => load(LoadOp::I32Load8U, memarg),
        O::I32Load16S { memarg } => load(LoadOp::I32Load16S, memarg),
        O::I32Load16U { memarg } => load(LoadOp::I32Load16U, memarg),
        O::I64Load8S { memarg } => load(LoadOp::I64Load8S, memarg),
        O::I64Load8U { memarg } => load(LoadOp::I64Load8U, memarg),
        O::I64Load16S { memarg } => load(LoadOp::I64Load16S, memarg),
        O::I64Load16U { memarg } => load(LoadOp::I64Load16U, memarg),
        O::I64Load32S { memarg } => load(LoadOp::I64Load32S, memarg),
        O::I64Load32U { memarg } => load(LoadOp::I64Load32U, memarg),
        O::I32Store { memarg } => store(StoreOp::I32Store, memarg),
        O::I64Store { memarg } => store(StoreOp::I64Store, memarg),
        O::F32Store { memarg } => store(StoreOp::F32Store, memarg),
        O::F64Store { memarg } => store(StoreOp::F64Store, memarg),
        O::I32Store8 { memarg } => store(StoreOp::I32Store8, memarg),
        O::I32Store16 { memarg } => store(StoreOp::I32Store16, memarg),
        O::I64Store8 { memarg } => store(StoreOp::I64Store8, memarg),
        O::I64Store16 { memarg } => store(StoreOp::I64Store16, memarg),
        O::I64Store32 { memarg } => store(StoreOp::I64Store32, memarg),
        O::MemorySize { .. } => Instr::MemorySize,
        O::MemoryGrow { .. } => Instr::MemoryGrow,

        O::I32Const { value } => Instr::Const(Val::I32(*value)),
        O::I64Const { value } => Instr::Const(Val::I64(*value)),
        O::F32Const { value } => Instr::Const(Val::F32(value.bits())),
        O::F64Const { value } => Instr::Const(Val::F64(value.bits())),

        O::I32Add => Instr::Binary(BinaryOp::I32Add),
        O::I32Sub => Instr::Binary(BinaryOp::I32Sub),
        O::I32Mul => Instr::Binary(BinaryOp::I32Mul),
        O::I32And => Instr::Binary(BinaryOp::I32And),
        O::I32Or => Instr::Binary(BinaryOp::I32Or),
        O::I32Xor => Instr::Binary(BinaryOp::I32Xor),
        O::I32Shl => Instr::Binary(BinaryOp::I32Shl),
        O::I32ShrU => Instr::Binary(BinaryOp::I32ShrU),

        // Remaining two-operand numeric instructions
        O::I32Eq
        | O::I32Ne
        | O::I32LtS
        | O::I32LtU
        | O::I32GtS
        | O::I32GtU
        | O::I32LeS
        | O::I32LeU
        | O::I32GeS
        | O::I32GeU
        | O::I64Eq
        | O::I64Ne
        | O::I64LtS
        | O::I64LtU
        | O::I64GtS
        | O::I64GtU
        | O::I64LeS
        | O::I64LeU
        | O::I64GeS
        | O::I64GeU
        | O::F32Eq
        | O::F32Ne
        | O::F32Lt
        | O::F32Gt
        | O::F32Le
        | O::F32Ge
        | O::F64Eq
        | O::F64Ne
        | O::F64Lt
        | O::F64Gt
        | O::F64Le
        | O::F64Ge
        | O::I32DivS
        | O::I32DivU
        | O::I32RemS
        | O::I32RemU
        | O::I32ShrS
        | O::I32Rotl
        | O::I32Rotr
        | O::I64Add
        | O::I64Sub
        | O::I64Mul
        | O::I64DivS
        | O::I64DivU
        | O::I64RemS
        | O::I64RemU
        | O::I64And
        | O::I64Or
        | O::I64Xor
        | O::I64Shl
        | O::I64ShrS
        | O::I64ShrU
        | O::I64Rotl
        | O::I64Rotr
        | O::F32Add
        | O::F32Sub
        | O::F32Mul
        | O::F32Div
        | O::F32Min
        | O::F32Max
        | O::F32Copysign
        | O::F64Add
        | O::F64Sub
        | O::F64Mul
        | O::F64Div
        | O::F64Min
        | O::F64Max
        | O::F64Copysign => Instr::Binary(BinaryOp::Other),

        // One operand, one result
        O::I32Eqz
        | O::I64Eqz
        | O::I32Clz
        | O::I32Ctz
        | O::I32Popcnt
        | O::I64Clz
        | O::I64Ctz
        | O::I64Popcnt
        | O::F32Abs
        | O::F32Neg
        | O::F32Ceil
        | O::F32Floor
        | O::F32Trunc
        | O::F32Nearest
        | O::F32Sqrt
        | O::F64Abs
        | O::F64Neg
        | O::F64Ceil
        | O::F64Floor
        | O::F64Trunc
        | O::F64Nearest
        | O::F64Sqrt
        | O::I32WrapI64
        | O::I32TruncF32S
        | O::I32TruncF32U
        | O::I32TruncF64S
        | O::I32TruncF64U
        | O::I64ExtendI32S
        | O::I64ExtendI32U
        | O::I64TruncF32S
        | O::I64TruncF32U
        | O::I64TruncF64S
        | O::I64TruncF64U
        | O::F32ConvertI32S
        | O::F32ConvertI32U
        | O::F32ConvertI64S
        | O::F32ConvertI64U
        | O::F32DemoteF64
        | O::F64ConvertI32S
        | O::F64ConvertI32U
        | O::F64ConvertI64S
        | O::F64ConvertI64U
        | O::F64PromoteF32
        | O::I32ReinterpretF32
        | O::I64ReinterpretF64
        | O::F32ReinterpretI32
        | O::F64ReinterpretI64
        | O::I32Extend8S
        | O::I32Extend16S
        | O::I64Extend8S
        | O::I64Extend16S
        | O::I64Extend32S
        | O::I32TruncSatF32S
        | O::I32TruncSatF32U
        | O::I32TruncSatF64S
        | O::I32TruncSatF64U
        | O::I64TruncSatF32S
        | O::I64TruncSatF32U
        | O::I64TruncSatF64S
        | O::I64TruncSatF64U => Instr::Unary,

        O::RefNull { .. } => Instr::RefNull,
        O::RefIsNull => Instr::RefIsNull,
        O::RefFunc { function_index } => Instr::RefFunc(FuncIdx(*function_index)),
        O::TableGet { table } => Instr::TableGet(*table),

        // Bulk memory and table operations
        O::TableSet { table } => table_write(TableWriteOp::Set, *table),
        O::TableGrow { table } => table_write(TableWriteOp::Grow, *table),
        O::TableFill { table } => table_write(TableWriteOp::Fill, *table),
        O::TableCopy { dst_table, .. } => table_write(TableWriteOp::Copy, *dst_table),
        O::TableInit { table, .. } => table_write(TableWriteOp::Init, *table),
        O::TableSize { .. } => Instr::Effect { pops: 0, pushes: 1 },
        O::ElemDrop { .. } | O::DataDrop { .. } => Instr::Effect { pops: 0, pushes: 0 },
        O::MemoryInit { .. } | O::MemoryCopy { .. } | O::MemoryFill { .. } => {
            Instr::Effect { pops: 3, pushes: 0 }
        }

        other => Instr::Unknown {
            name: operator_name(other),
        },
    };
    Ok(instr)
}
