//! Operand producers for a function body.
//!
//! One forward pass simulates the operand stack abstractly and records, for
//! every instruction, which earlier instruction pushed each operand it pops.
//! Values that come out of a control-flow join (block results, loop
//! parameters) have no single producer and are `Opaque`. Code after an
//! unconditional branch is stack-polymorphic: missing operands are `Opaque`.
//! An instruction outside the modelled set stops the simulation; every
//! instruction from there on has no recorded operands.

use std::collections::HashMap;

use crate::core::function::Function;
use crate::core::instruction::Instr;
use crate::core::module::Module;
use crate::core::types::BlockType;

/// Source of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Producer {
    /// Pushed by the instruction at this position of `Body::instrs`
    Instr(usize),
    /// Merged or otherwise untracked value
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Stack height below the frame's own values
    height: usize,
    params: Vec<Producer>,
    results: usize,
    unreachable: bool,
}

/// Why the simulation stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poison {
    UnknownInstruction { at: usize, name: String },
    StackUnderflow { at: usize },
    BadBlockType { at: usize },
}

impl Poison {
    pub fn at(&self) -> usize {
        match self {
            Poison::UnknownInstruction { at, .. }
            | Poison::StackUnderflow { at }
            | Poison::BadBlockType { at } => *at,
        }
    }
}

impl std::fmt::Display for Poison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Poison::UnknownInstruction { name, .. } => {
                write!(f, "unmodelled instruction {} earlier in the function", name)
            }
            Poison::StackUnderflow { .. } => write!(f, "operand stack underflow"),
            Poison::BadBlockType { .. } => write!(f, "block type out of range"),
        }
    }
}

/// Per-instruction operand producers of one body.
#[derive(Debug, Default)]
pub struct ProducerGraph {
    /// Popped operands, bottom of stack first
    operands: Vec<Option<Vec<Producer>>>,
    poison: Option<Poison>,
}

struct Sim<'m> {
    module: &'m Module,
    stack: Vec<Producer>,
    frames: Vec<Frame>,
}

impl<'m> Sim<'m> {
    fn pop(&mut self) -> Option<Producer> {
        let frame = self.frames.last()?;
        if self.stack.len() > frame.height {
            self.stack.pop()
        } else if frame.unreachable {
            Some(Producer::Opaque)
        } else {
            None
        }
    }

    /// Pop `n` operands, returned bottom first.
    fn pop_n(&mut self, n: usize) -> Option<Vec<Producer>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.pop()?);
        }
        out.reverse();
        Some(out)
    }

    fn set_unreachable(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            self.stack.truncate(frame.height);
            frame.unreachable = true;
        }
    }

    fn block_arity(&self, bt: BlockType) -> Option<(usize, usize)> {
        match bt {
            BlockType::Empty => Some((0, 0)),
            BlockType::Value(_) => Some((0, 1)),
            BlockType::Func(idx) => self
                .module
                .func_type(idx)
                .map(|ty| (ty.params.len(), ty.results.len())),
        }
    }

    fn call_arity(&self, type_idx: u32) -> Option<(usize, usize)> {
        self.module
            .func_type(type_idx)
            .map(|ty| (ty.params.len(), ty.results.len()))
    }

    fn push_n(&mut self, n: usize, p: Producer) {
        self.stack.extend(std::iter::repeat(p).take(n));
    }
}

impl ProducerGraph {
    pub fn build(module: &Module, func: &Function) -> Self {
        let Some(body) = &func.body else {
            return Self::default();
        };
        let mut graph = ProducerGraph {
            operands: vec![None; body.instrs.len()],
            poison: None,
        };
        let mut sim = Sim {
            module,
            stack: Vec::new(),
            frames: vec![Frame {
                kind: FrameKind::Function,
                height: 0,
                params: Vec::new(),
                results: func.ty.results.len(),
                unreachable: false,
            }],
        };

        for (i, located) in body.instrs.iter().enumerate() {
            if sim.frames.is_empty() {
                break;
            }
            let me = Producer::Instr(i);
            let popped = match Self::step(&mut sim, &located.instr, me, i) {
                Ok(popped) => popped,
                Err(poison) => {
                    graph.poison = Some(poison);
                    break;
                }
            };
            graph.operands[i] = Some(popped);
        }
        graph
    }

    /// Simulate one instruction; returns the popped operands.
    fn step(sim: &mut Sim<'_>, instr: &Instr, me: Producer, at: usize) -> Result<Vec<Producer>, Poison> {
        let underflow = Poison::StackUnderflow { at };
        let (pops, pushes) = match instr {
            Instr::Unreachable | Instr::Return => {
                sim.set_unreachable();
                return Ok(Vec::new());
            }
            Instr::Nop => (0, 0),
            Instr::Block(bt) | Instr::Loop(bt) | Instr::If(bt) => {
                let (params, results) = sim.block_arity(*bt).ok_or(Poison::BadBlockType { at })?;
                let cond = if matches!(instr, Instr::If(_)) {
                    vec![sim.pop().ok_or(underflow.clone())?]
                } else {
                    Vec::new()
                };
                let mut args = sim.pop_n(params).ok_or(underflow)?;
                let kind = match instr {
                    Instr::Loop(_) => FrameKind::Loop,
                    Instr::If(_) => FrameKind::If,
                    _ => FrameKind::Block,
                };
                // A loop header is a join point for its back edges.
                let inner: Vec<Producer> = if kind == FrameKind::Loop {
                    vec![Producer::Opaque; params]
                } else {
                    args.clone()
                };
                sim.frames.push(Frame {
                    kind,
                    height: sim.stack.len(),
                    params: inner.clone(),
                    results,
                    unreachable: false,
                });
                sim.stack.extend(inner);
                args.extend(cond);
                return Ok(args);
            }
            Instr::Else => {
                if let Some(frame) = sim.frames.last_mut() {
                    sim.stack.truncate(frame.height);
                    frame.unreachable = false;
                    let params = frame.params.clone();
                    sim.stack.extend(params);
                }
                return Ok(Vec::new());
            }
            Instr::End => {
                let Some(frame) = sim.frames.pop() else {
                    return Ok(Vec::new());
                };
                sim.stack.truncate(frame.height);
                if frame.kind != FrameKind::Function {
                    sim.push_n(frame.results, Producer::Opaque);
                }
                return Ok(Vec::new());
            }
            Instr::Br(_) => {
                sim.set_unreachable();
                return Ok(Vec::new());
            }
            Instr::BrIf(_) => (1, 0),
            Instr::BrTable { .. } => {
                let popped = vec![sim.pop().ok_or(underflow)?];
                sim.set_unreachable();
                return Ok(popped);
            }
            Instr::Call(f) | Instr::ReturnCall(f) => {
                let ty = sim.module.function(*f).map(|f| f.type_idx).ok_or(underflow.clone())?;
                let (params, results) = sim.call_arity(ty).ok_or(underflow.clone())?;
                let popped = sim.pop_n(params).ok_or(underflow)?;
                if matches!(instr, Instr::ReturnCall(_)) {
                    sim.set_unreachable();
                } else {
                    sim.push_n(results, me);
                }
                return Ok(popped);
            }
            Instr::CallIndirect { type_idx, .. }
            | Instr::ReturnCallIndirect { type_idx, .. }
            | Instr::CallRef { type_idx } => {
                let (params, results) = sim.call_arity(*type_idx).ok_or(underflow.clone())?;
                let popped = sim.pop_n(params + 1).ok_or(underflow)?;
                if matches!(instr, Instr::ReturnCallIndirect { .. }) {
                    sim.set_unreachable();
                } else {
                    sim.push_n(results, me);
                }
                return Ok(popped);
            }
            Instr::Drop => (1, 0),
            Instr::Select => (3, 1),
            Instr::LocalGet(_) | Instr::GlobalGet(_) => (0, 1),
            Instr::LocalSet(_) | Instr::GlobalSet(_) => (1, 0),
            Instr::LocalTee(_) => (1, 1),
            Instr::Load { .. } => (1, 1),
            Instr::Store { .. } => (2, 0),
            Instr::MemorySize => (0, 1),
            Instr::MemoryGrow => (1, 1),
            Instr::Const(_) => (0, 1),
            Instr::Unary => (1, 1),
            Instr::Binary(_) => (2, 1),
            Instr::RefNull | Instr::RefFunc(_) => (0, 1),
            Instr::RefIsNull | Instr::TableGet(_) => (1, 1),
            Instr::TableWrite { op, .. } => op.stack_effect(),
            Instr::Effect { pops, pushes } => (*pops as usize, *pushes as usize),
            Instr::Unknown { name } => {
                return Err(Poison::UnknownInstruction {
                    at,
                    name: name.clone(),
                })
            }
        };
        let popped = sim.pop_n(pops).ok_or(underflow)?;
        sim.push_n(pushes, me);
        Ok(popped)
    }

    /// Operands popped by instruction `index`, bottom of stack first.
    /// `None` when the instruction was not simulated.
    pub fn operands(&self, index: usize) -> Option<&[Producer]> {
        self.operands.get(index)?.as_deref()
    }

    /// Operand `k` (0 = deepest) of instruction `index`.
    pub fn operand(&self, index: usize, k: usize) -> Option<Producer> {
        self.operands(index)?.get(k).copied()
    }

    /// The last operand popped, i.e. the value on top of the stack.
    pub fn top_operand(&self, index: usize) -> Option<Producer> {
        self.operands(index)?.last().copied()
    }

    pub fn poison(&self) -> Option<&Poison> {
        self.poison.as_ref()
    }
}

/// Positions of every `local.set`/`local.tee`, per local index.
pub fn local_assignments(func: &Function) -> HashMap<u32, Vec<usize>> {
    let mut defs: HashMap<u32, Vec<usize>> = HashMap::new();
    if let Some(body) = &func.body {
        for (i, l) in body.instrs.iter().enumerate() {
            if let Instr::LocalSet(x) | Instr::LocalTee(x) = l.instr {
                defs.entry(x).or_default().push(i);
            }
        }
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::function::{Body, FuncIdx};
    use crate::core::instruction::{BinaryOp, LoadOp, Located, MemArg, Val};
    use crate::core::types::{FunctionType, ValType};

    fn func(instrs: Vec<Instr>) -> (Module, Function) {
        let ty = FunctionType::new(vec![ValType::I32], vec![]);
        let mut f = Function::new_defined(FuncIdx(0), 0, ty.clone());
        f.body = Some(Body {
            locals: vec![ValType::I32],
            instrs: instrs
                .into_iter()
                .enumerate()
                .map(|(i, instr)| Located { offset: i, instr })
                .collect(),
            raw: Vec::new(),
        });
        let module = Module {
            types: vec![ty],
            functions: vec![f.clone()],
            ..Module::default()
        };
        (module, f)
    }

    fn load() -> Instr {
        Instr::Load {
            op: LoadOp::I32Load,
            memarg: MemArg {
                offset: 8,
                align: 2,
                memory: 0,
            },
        }
    }

    #[test]
    fn links_call_operands() {
        let (m, f) = func(vec![
            Instr::LocalGet(0),                // 0
            Instr::LocalGet(0),                // 1
            load(),                            // 2
            load(),                            // 3
            Instr::CallIndirect { type_idx: 0, table: 0 }, // 4
            Instr::End,
        ]);
        let g = ProducerGraph::build(&m, &f);
        assert!(g.poison().is_none());
        assert_eq!(g.operands(4).unwrap(), &[Producer::Instr(0), Producer::Instr(3)]);
        assert_eq!(g.top_operand(3), Some(Producer::Instr(2)));
        assert_eq!(g.top_operand(2), Some(Producer::Instr(1)));
    }

    #[test]
    fn block_results_are_opaque_and_branches_polymorphic() {
        let (m, f) = func(vec![
            Instr::Block(BlockType::Value(ValType::I32)), // 0
            Instr::Const(Val::I32(1)),                     // 1
            Instr::Br(0),                                  // 2
            Instr::Binary(BinaryOp::I32Add),               // 3 (unreachable)
            Instr::End,                                    // 4
            Instr::LocalGet(0),                            // 5
            Instr::CallIndirect { type_idx: 0, table: 0 }, // 6
            Instr::End,
        ]);
        let g = ProducerGraph::build(&m, &f);
        assert!(g.poison().is_none());
        assert_eq!(g.operands(3).unwrap(), &[Producer::Opaque, Producer::Opaque]);
        assert_eq!(g.operands(6).unwrap(), &[Producer::Opaque, Producer::Instr(5)]);
    }

    #[test]
    fn if_else_restarts_from_params() {
        let (m, f) = func(vec![
            Instr::LocalGet(0),                         // 0
            Instr::If(BlockType::Empty),                // 1
            Instr::Const(Val::I32(1)),                  // 2
            Instr::Drop,                                // 3
            Instr::Else,                                // 4
            Instr::Const(Val::I32(2)),                  // 5
            Instr::Drop,                                // 6
            Instr::End,                                 // 7
            Instr::End,
        ]);
        let g = ProducerGraph::build(&m, &f);
        assert_eq!(g.operands(1).unwrap(), &[Producer::Instr(0)]);
        assert_eq!(g.operands(6).unwrap(), &[Producer::Instr(5)]);
    }

    #[test]
    fn unknown_instruction_poisons_the_rest() {
        let (m, f) = func(vec![
            Instr::Const(Val::I32(0)),
            Instr::Unknown {
                name: "V128Not".into(),
            },
            Instr::CallIndirect { type_idx: 0, table: 0 },
            Instr::End,
        ]);
        let g = ProducerGraph::build(&m, &f);
        assert_eq!(g.poison().map(|p| p.at()), Some(1));
        assert!(g.operands(2).is_none());
        assert!(g.operands(0).is_some());
    }

    #[test]
    fn collects_local_assignments() {
        let (_, f) = func(vec![
            Instr::Const(Val::I32(4)),
            Instr::LocalSet(1),
            Instr::Const(Val::I32(5)),
            Instr::LocalTee(1),
            Instr::Drop,
            Instr::End,
        ]);
        let defs = local_assignments(&f);
        assert_eq!(defs[&1], vec![1, 3]);
        assert!(!defs.contains_key(&0));
    }
}
