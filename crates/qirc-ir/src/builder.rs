//! Incremental construction of a [`Function`].

use crate::error::{IrError, IrResult};
use crate::instruction::{BinaryOp, FloatPredicate, Instruction, IntPredicate, Terminator};
use crate::module::{BasicBlock, Function, Linkage};
use crate::types::{Operand, Type};

/// Builds one function block by block.
///
/// Value and block names are `hint.N` with `N` drawn from a single counter.
/// The counter can be seeded with [`FunctionBuilder::with_first_id`] and read
/// back with [`FunctionBuilder::next_id`], so several builders used in
/// sequence produce module-unique names. Parameter names never contain a
/// `.` and so cannot collide with generated ones.
#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    current: usize,
    next_id: u32,
}

impl FunctionBuilder {
    /// Start a function with an empty `entry` block.
    pub fn new(name: impl Into<String>, params: Vec<(String, Type)>, ret: Type) -> Self {
        Self {
            function: Function {
                name: name.into(),
                params,
                ret,
                linkage: Linkage::External,
                attributes: None,
                blocks: vec![BasicBlock::new("entry")],
            },
            current: 0,
            next_id: 0,
        }
    }

    #[must_use]
    pub fn with_first_id(mut self, id: u32) -> Self {
        self.next_id = id;
        self
    }

    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.function.linkage = linkage;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, group: u32) -> Self {
        self.function.attributes = Some(group);
        self
    }

    /// The id the next generated name will use.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn ret_type(&self) -> &Type {
        &self.function.ret
    }

    /// A fresh value name derived from `hint`.
    pub fn fresh_name(&mut self, hint: &str) -> String {
        let name = format!("{hint}.{}", self.next_id);
        self.next_id += 1;
        name
    }

    /// Append a new empty block and return its label. The insertion point is unchanged.
    pub fn add_block(&mut self, hint: &str) -> String {
        let label = self.fresh_name(hint);
        self.function.blocks.push(BasicBlock::new(label.clone()));
        label
    }

    /// Move the insertion point to the end of `label`.
    pub fn position_at(&mut self, label: &str) -> IrResult<()> {
        let index = self
            .function
            .blocks
            .iter()
            .position(|b| b.label == label)
            .ok_or_else(|| IrError::UnknownBlock {
                function: self.function.name.clone(),
                block: label.to_string(),
            })?;
        self.current = index;
        Ok(())
    }

    /// Label of the block at the insertion point.
    pub fn current_block(&self) -> &str {
        &self.function.blocks[self.current].label
    }

    /// Whether the block at the insertion point already has a terminator.
    pub fn is_terminated(&self) -> bool {
        self.function.blocks[self.current].terminator.is_some()
    }

    /// Append an instruction at the insertion point.
    pub fn push(&mut self, inst: Instruction) -> IrResult<()> {
        let block = &mut self.function.blocks[self.current];
        if block.terminator.is_some() {
            return Err(IrError::BlockTerminated {
                block: block.label.clone(),
            });
        }
        block.instructions.push(inst);
        Ok(())
    }

    /// Terminate the block at the insertion point.
    pub fn terminate(&mut self, term: Terminator) -> IrResult<()> {
        let block = &mut self.function.blocks[self.current];
        if block.terminator.is_some() {
            return Err(IrError::BlockTerminated {
                block: block.label.clone(),
            });
        }
        block.terminator = Some(term);
        Ok(())
    }

    /// Emit a call. Returns the result value unless `ret` is `void`.
    pub fn call(&mut self, callee: &str, ret: Type, args: Vec<Operand>) -> IrResult<Option<Operand>> {
        let dest = if ret == Type::Void {
            None
        } else {
            Some(self.fresh_name("call"))
        };
        self.push(Instruction::Call {
            dest: dest.clone(),
            ret: ret.clone(),
            callee: callee.to_string(),
            args,
        })?;
        Ok(dest.map(|name| Operand::local(name, ret)))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> IrResult<Operand> {
        let ty = lhs.ty();
        let dest = self.fresh_name("v");
        self.push(Instruction::Binary {
            dest: dest.clone(),
            op,
            lhs,
            rhs,
        })?;
        Ok(Operand::local(dest, ty))
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Operand, rhs: Operand) -> IrResult<Operand> {
        let dest = self.fresh_name("cmp");
        self.push(Instruction::ICmp {
            dest: dest.clone(),
            pred,
            lhs,
            rhs,
        })?;
        Ok(Operand::local(dest, Type::I1))
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Operand, rhs: Operand) -> IrResult<Operand> {
        let dest = self.fresh_name("cmp");
        self.push(Instruction::FCmp {
            dest: dest.clone(),
            pred,
            lhs,
            rhs,
        })?;
        Ok(Operand::local(dest, Type::I1))
    }

    pub fn phi(&mut self, hint: &str, ty: Type, incoming: Vec<(Operand, String)>) -> IrResult<Operand> {
        let dest = self.fresh_name(hint);
        self.push(Instruction::Phi {
            dest: dest.clone(),
            ty: ty.clone(),
            incoming,
        })?;
        Ok(Operand::local(dest, ty))
    }

    /// Reserve a stack slot; returns a pointer operand.
    pub fn alloca(&mut self, hint: &str, ty: Type) -> IrResult<Operand> {
        let dest = self.fresh_name(hint);
        self.push(Instruction::Alloca {
            dest: dest.clone(),
            ty: ty.clone(),
        })?;
        Ok(Operand::local(dest, Type::ptr(ty)))
    }

    /// Like [`FunctionBuilder::alloca`] but placed ahead of every other
    /// instruction in the entry block, wherever the insertion point is.
    pub fn entry_alloca(&mut self, hint: &str, ty: Type) -> Operand {
        let dest = self.fresh_name(hint);
        let entry = &mut self.function.blocks[0];
        let at = entry
            .instructions
            .iter()
            .take_while(|i| matches!(i, Instruction::Alloca { .. }))
            .count();
        entry.instructions.insert(
            at,
            Instruction::Alloca {
                dest: dest.clone(),
                ty: ty.clone(),
            },
        );
        Operand::local(dest, Type::ptr(ty))
    }

    pub fn load(&mut self, hint: &str, ty: Type, ptr: Operand) -> IrResult<Operand> {
        let dest = self.fresh_name(hint);
        self.push(Instruction::Load {
            dest: dest.clone(),
            ty: ty.clone(),
            ptr,
        })?;
        Ok(Operand::local(dest, ty))
    }

    pub fn store(&mut self, value: Operand, ptr: Operand) -> IrResult<()> {
        self.push(Instruction::Store { value, ptr })
    }

    pub fn bitcast(&mut self, value: Operand, to: Type) -> IrResult<Operand> {
        let dest = self.fresh_name("cast");
        self.push(Instruction::Bitcast {
            dest: dest.clone(),
            value,
            to: to.clone(),
        })?;
        Ok(Operand::local(dest, to))
    }

    pub fn sitofp(&mut self, value: Operand) -> IrResult<Operand> {
        let dest = self.fresh_name("v");
        self.push(Instruction::SIToFP {
            dest: dest.clone(),
            value,
        })?;
        Ok(Operand::local(dest, Type::Double))
    }

    pub fn fneg(&mut self, value: Operand) -> IrResult<Operand> {
        let dest = self.fresh_name("v");
        self.push(Instruction::FNeg {
            dest: dest.clone(),
            value,
        })?;
        Ok(Operand::local(dest, Type::Double))
    }

    pub fn br(&mut self, target: &str) -> IrResult<()> {
        self.terminate(Terminator::Br(target.to_string()))
    }

    pub fn cond_br(&mut self, cond: Operand, then_block: &str, else_block: &str) -> IrResult<()> {
        self.terminate(Terminator::CondBr {
            cond,
            then_block: then_block.to_string(),
            else_block: else_block.to_string(),
        })
    }

    pub fn ret(&mut self, value: Option<Operand>) -> IrResult<()> {
        self.terminate(Terminator::Ret(value))
    }

    /// Finish construction. Blocks left unterminated are reported by
    /// [`crate::cfg::verify`], not here.
    pub fn finish(self) -> Function {
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let a = b.fresh_name("x");
        let c = b.fresh_name("x");
        assert_ne!(a, c);
        assert_eq!(b.next_id(), 2);
    }

    #[test]
    fn test_seeded_counter() {
        let mut b = FunctionBuilder::new("g", vec![], Type::Void).with_first_id(10);
        assert_eq!(b.fresh_name("v"), "v.10");
    }

    #[test]
    fn test_push_after_terminator_fails() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        b.ret(None).unwrap();
        let err = b.store(Operand::i64(1), Operand::local("p", Type::ptr(Type::I64)));
        assert!(matches!(err, Err(IrError::BlockTerminated { .. })));
        assert!(matches!(b.ret(None), Err(IrError::BlockTerminated { .. })));
    }

    #[test]
    fn test_blocks_and_positioning() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let next = b.add_block("next");
        assert_eq!(b.current_block(), "entry");
        b.br(&next).unwrap();
        b.position_at(&next).unwrap();
        b.ret(None).unwrap();
        let f = b.finish();
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(f.blocks[0].successors(), vec![next.as_str()]);
    }

    #[test]
    fn test_position_at_unknown() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        assert!(matches!(
            b.position_at("nope"),
            Err(IrError::UnknownBlock { .. })
        ));
    }

    #[test]
    fn test_void_call_has_no_result() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let r = b
            .call("__quantum__qis__h__body", Type::Void, vec![Operand::QubitId(0)])
            .unwrap();
        assert!(r.is_none());
        let q = b
            .call("__quantum__rt__qubit_allocate", Type::Qubit, vec![])
            .unwrap();
        assert_eq!(q.unwrap().ty(), Type::Qubit);
    }

    #[test]
    fn test_entry_alloca_hoisted() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let body = b.add_block("body");
        b.br(&body).unwrap();
        b.position_at(&body).unwrap();
        let first = b.entry_alloca("x", Type::I64);
        let second = b.entry_alloca("y", Type::Double);
        b.store(Operand::i64(1), first).unwrap();
        b.ret(None).unwrap();
        let f = b.finish();
        let entry = &f.blocks[0];
        assert_eq!(entry.instructions.len(), 2);
        assert!(entry.instructions.iter().all(|i| matches!(i, Instruction::Alloca { .. })));
        assert!(entry.terminator.is_some());
        assert_eq!(second.ty(), Type::ptr(Type::Double));
    }
}
