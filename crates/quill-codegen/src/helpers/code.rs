//! Expression language for generated code.
//!
//! Helper bodies and many inline sequences are easiest to state as nested
//! instruction applications over stack slots, e.g.
//! `sstore(slot, or(and(sload(slot), mask), value))`. [`Word`] is that tree
//! and the methods in this module evaluate it onto the stack: instruction
//! arguments are evaluated last-to-first so the first argument ends on top,
//! which is the operand order the machine expects. Helper call arguments are
//! evaluated first-to-last, matching the helper calling convention.
//!
//! Structured control flow (`if_`, `if_else`, `while_`) restores the stack
//! height at join points, so locals introduced inside a branch must be
//! dropped before it ends.

use num_bigint::BigUint;
use quill_core::CompilationError;

use crate::asm::{Instruction, Tag};
use crate::context::CompilerContext;

type Result<T> = std::result::Result<T, CompilationError>;

/// A value computed on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    /// Copy of an absolute stack slot of the current frame.
    Slot(usize),
    /// Constant.
    Lit(BigUint),
    /// Code offset of a tag.
    Tag(Tag),
    /// Instruction applied to its arguments, first argument on top.
    Op(Instruction, Vec<Word>),
    /// Single-result helper call.
    Call(Tag, Vec<Word>),
}

/// Copy of a stack slot.
#[inline]
pub fn slot(index: usize) -> Word {
    Word::Slot(index)
}

/// A constant.
#[inline]
pub fn lit(value: impl Into<BigUint>) -> Word {
    Word::Lit(value.into())
}

/// Instruction application.
#[inline]
pub fn op(instruction: Instruction, args: impl IntoIterator<Item = Word>) -> Word {
    Word::Op(instruction, args.into_iter().collect())
}

/// Single-result helper call.
#[inline]
pub fn call(tag: Tag, args: impl IntoIterator<Item = Word>) -> Word {
    Word::Call(tag, args.into_iter().collect())
}

macro_rules! instructions {
    ($($name:ident => $instruction:ident($($arg:ident),*);)*) => {
        $(
            #[doc = concat!("`", stringify!($name), "`")]
            #[inline]
            pub fn $name($($arg: Word),*) -> Word {
                Word::Op(Instruction::$instruction, vec![$($arg),*])
            }
        )*
    };
}

instructions! {
    add => Add(a, b);
    sub => Sub(a, b);
    mul => Mul(a, b);
    div => Div(a, b);
    sdiv => SDiv(a, b);
    mod_ => Mod(a, b);
    smod => SMod(a, b);
    exp => Exp(base, exponent);
    signextend => SignExtend(byte, value);
    lt => Lt(a, b);
    gt => Gt(a, b);
    slt => Slt(a, b);
    sgt => Sgt(a, b);
    eq => Eq(a, b);
    iszero => IsZero(a);
    and => And(a, b);
    or => Or(a, b);
    xor => Xor(a, b);
    not => Not(a);
    byte => Byte(index, value);
    shl => Shl(shift, value);
    shr => Shr(shift, value);
    sar => Sar(shift, value);
    keccak256 => Keccak256(offset, size);
    mload => MLoad(offset);
    mstore => MStore(offset, value);
    mstore8 => MStore8(offset, value);
    sload => SLoad(key);
    sstore => SStore(key, value);
    calldataload => CallDataLoad(offset);
    calldatasize => CallDataSize();
    calldatacopy => CallDataCopy(dst, src, size);
    codecopy => CodeCopy(dst, src, size);
    returndatasize => ReturnDataSize();
    returndatacopy => ReturnDataCopy(dst, src, size);
    extcodesize => ExtCodeSize(address);
    revert => Revert(offset, size);
    return_ => Return(offset, size);
}

impl CompilerContext<'_> {
    fn emit_word(&mut self, word: &Word) -> Result<usize> {
        match word {
            Word::Slot(index) => {
                self.dup_slot(*index)?;
                Ok(1)
            }
            Word::Lit(value) => {
                self.push(value.clone());
                Ok(1)
            }
            Word::Tag(tag) => {
                self.push_tag(*tag);
                Ok(1)
            }
            Word::Op(instruction, args) => {
                if args.len() != instruction.args() {
                    return Err(CompilationError::internal(format!(
                        "{} takes {} arguments, got {}",
                        instruction.name(),
                        instruction.args(),
                        args.len()
                    )));
                }
                for arg in args.iter().rev() {
                    self.eval(arg)?;
                }
                self.op(*instruction);
                Ok(instruction.rets())
            }
            Word::Call(tag, args) => {
                for arg in args {
                    self.eval(arg)?;
                }
                self.call_helper(*tag, args.len(), 1)?;
                Ok(1)
            }
        }
    }

    /// Push the value of `word`.
    pub fn eval(&mut self, word: &Word) -> Result<()> {
        match self.emit_word(word)? {
            1 => Ok(()),
            n => Err(CompilationError::internal(format!(
                "expression yields {n} words where one is expected"
            ))),
        }
    }

    /// Evaluate `word` for its effect, discarding any result.
    pub fn exec(&mut self, word: Word) -> Result<()> {
        let pushed = self.emit_word(&word)?;
        self.pop(pushed);
        Ok(())
    }

    /// Push the value of `word` as a new local and return its slot.
    pub fn let_(&mut self, word: Word) -> Result<usize> {
        self.eval(&word)?;
        Ok(self.stack_height() - 1)
    }

    /// Overwrite a local.
    pub fn assign(&mut self, target: usize, word: Word) -> Result<()> {
        self.eval(&word)?;
        self.store_slot(target)
    }

    /// Call a helper, returning the slots of its results.
    pub fn call_with(
        &mut self,
        tag: Tag,
        args: impl IntoIterator<Item = Word>,
        returns: usize,
    ) -> Result<Vec<usize>> {
        let mut params = 0;
        for arg in args {
            self.eval(&arg)?;
            params += 1;
        }
        self.call_helper(tag, params, returns)?;
        let height = self.stack_height();
        Ok((height - returns..height).collect())
    }

    /// Drop locals created in a branch body so the height matches `height`.
    fn join(&mut self, height: usize) -> Result<()> {
        if self.terminated() {
            self.set_stack_height(height);
            return Ok(());
        }
        let current = self.stack_height();
        if current < height {
            return Err(CompilationError::internal(format!(
                "branch consumed {} words it did not push",
                height - current
            )));
        }
        self.pop_to(height);
        Ok(())
    }

    /// Run `body` when `condition` is non-zero.
    pub fn if_<F>(&mut self, condition: Word, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let skip = self.new_tag();
        self.eval(&iszero(condition))?;
        self.jump_if(skip);
        let height = self.stack_height();
        body(self)?;
        self.join(height)?;
        self.place_tag(skip);
        Ok(())
    }

    /// Two-armed conditional.
    pub fn if_else<T, E>(&mut self, condition: Word, then_body: T, else_body: E) -> Result<()>
    where
        T: FnOnce(&mut Self) -> Result<()>,
        E: FnOnce(&mut Self) -> Result<()>,
    {
        let otherwise = self.new_tag();
        let end = self.new_tag();
        self.eval(&iszero(condition))?;
        self.jump_if(otherwise);
        let height = self.stack_height();
        then_body(self)?;
        self.join(height)?;
        if !self.terminated() {
            self.jump(end);
        }
        self.set_stack_height(height);
        self.place_tag(otherwise);
        else_body(self)?;
        self.join(height)?;
        self.place_tag(end);
        Ok(())
    }

    /// Loop while `condition` is non-zero; the condition is re-evaluated
    /// before every iteration.
    pub fn while_<F>(&mut self, condition: Word, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let start = self.new_tag();
        let end = self.new_tag();
        let height = self.stack_height();
        self.place_tag(start);
        self.eval(&iszero(condition))?;
        self.jump_if(end);
        body(self)?;
        self.join(height)?;
        self.jump(start);
        self.set_stack_height(height);
        self.place_tag(end);
        Ok(())
    }

    /// Panic with `code` when `condition` is non-zero.
    pub fn panic_if(&mut self, condition: Word, code: u8) -> Result<()> {
        let panic = self.panic_helper(code)?;
        self.eval(&condition)?;
        self.jump_if(panic);
        Ok(())
    }

    /// Revert without data when `condition` is non-zero.
    pub fn revert_if(&mut self, condition: Word) -> Result<()> {
        let revert = self.revert_helper("")?;
        self.eval(&condition)?;
        self.jump_if(revert);
        Ok(())
    }
}
