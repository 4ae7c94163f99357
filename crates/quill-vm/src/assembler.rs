//! Assembly to byte code.
//!
//! Layout rules:
//!
//! - `Push(v)` uses the shortest `PUSHn` (`PUSH1 0` for zero).
//! - Every code offset (tags, sub-assembly offsets and sizes, the program
//!   size) is a fixed-width `PUSH2`, so item sizes are known before tag
//!   positions are.
//! - Sub-assemblies are assembled recursively and appended as data after
//!   the code, in id order.
//! - `PushImmutable` is a `PUSH32` of zero whose immediate position is
//!   recorded. `AssignImmutable` expands into one memory store per recorded
//!   position of the variable in the direct sub-assemblies, relative to the
//!   code offset it is given.

use std::rc::Rc;

use num_bigint::BigUint;
use num_traits::Zero;
use quill_codegen::{Assembly, AssemblyItem, Instruction};
use quill_core::VariableId;
use quill_core::num::word_to_bytes;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::VmError;

/// Byte code of one assembly.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<u8>,
    /// Positions of the 32-byte immediate of every `PushImmutable`.
    pub immutables: FxHashMap<VariableId, Vec<usize>>,
}

impl Program {
    /// Program bytes followed by ABI-encoded constructor arguments.
    pub fn with_arguments(&self, arguments: &[u8]) -> Vec<u8> {
        let mut code = self.code.clone();
        code.extend_from_slice(arguments);
        code
    }
}

const OFFSET_WIDTH: usize = 2;

/// Turn `assembly` and its sub-assemblies into byte code.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn assemble(assembly: &Assembly) -> Result<Program, VmError> {
    let mut cache = FxHashMap::default();
    assemble_cached(assembly, &mut cache)
}

fn assemble_cached(assembly: &Assembly, cache: &mut FxHashMap<*const Assembly, Rc<Program>>) -> Result<Program, VmError> {
    let subs = assembly
        .subs()
        .iter()
        .map(|sub| {
            let key = Rc::as_ptr(sub);
            if let Some(program) = cache.get(&key) {
                return Ok(Rc::clone(program));
            }
            let program = Rc::new(assemble_cached(sub, cache)?);
            cache.insert(key, Rc::clone(&program));
            Ok(program)
        })
        .collect::<Result<Vec<_>, VmError>>()?;

    let item_size = |item: &AssemblyItem| -> usize {
        match item {
            AssemblyItem::Operation(_) | AssemblyItem::Tag(_) => 1,
            AssemblyItem::Push(value) => 1 + push_width(value),
            AssemblyItem::PushTag(_)
            | AssemblyItem::PushSub(_)
            | AssemblyItem::PushSubSize(_)
            | AssemblyItem::PushProgramSize => 1 + OFFSET_WIDTH,
            AssemblyItem::PushImmutable(_) => 33,
            AssemblyItem::AssignImmutable(variable) => {
                let refs: usize = subs
                    .iter()
                    .map(|sub| sub.immutables.get(variable).map_or(0, Vec::len))
                    .sum();
                refs * (5 + OFFSET_WIDTH) + 2
            }
        }
    };

    let mut tags = FxHashMap::default();
    let mut position = 0;
    for item in assembly.items() {
        if let AssemblyItem::Tag(tag) = item {
            tags.insert(*tag, position);
        }
        position += item_size(item);
    }
    let code_size = position;
    let mut sub_offsets = Vec::with_capacity(subs.len());
    let mut program_size = code_size;
    for sub in &subs {
        sub_offsets.push(program_size);
        program_size += sub.code.len();
    }
    if program_size > usize::from(u16::MAX) {
        return Err(VmError::ProgramTooLarge { size: program_size });
    }

    let mut program = Program {
        code: Vec::with_capacity(program_size),
        immutables: FxHashMap::default(),
    };
    let code = &mut program.code;
    for item in assembly.items() {
        match item {
            AssemblyItem::Operation(op) => code.push(u8::from(*op)),
            AssemblyItem::Tag(_) => code.push(u8::from(Instruction::JumpDest)),
            AssemblyItem::Push(value) => {
                let width = push_width(value);
                code.push(0x5f + width as u8);
                code.extend_from_slice(&word_to_bytes(value)[32 - width..]);
            }
            AssemblyItem::PushTag(tag) => {
                let target = *tags.get(tag).ok_or(VmError::UndefinedTag(*tag))?;
                push_offset(code, target);
            }
            AssemblyItem::PushSub(id) => {
                let offset = *sub_offsets.get(id.0).ok_or(VmError::UnknownSub(id.0))?;
                push_offset(code, offset);
            }
            AssemblyItem::PushSubSize(id) => {
                let sub = subs.get(id.0).ok_or(VmError::UnknownSub(id.0))?;
                push_offset(code, sub.code.len());
            }
            AssemblyItem::PushProgramSize => push_offset(code, program_size),
            AssemblyItem::PushImmutable(variable) => {
                code.push(u8::from(Instruction::Push32));
                program.immutables.entry(*variable).or_default().push(code.len());
                code.extend_from_slice(&[0u8; 32]);
            }
            AssemblyItem::AssignImmutable(variable) => {
                // value, code_offset -> memory[code_offset + ref] = value
                for sub in &subs {
                    for position in sub.immutables.get(variable).into_iter().flatten() {
                        code.push(u8::from(Instruction::Dup2));
                        code.push(u8::from(Instruction::Dup2));
                        push_offset(code, *position);
                        code.push(u8::from(Instruction::Add));
                        code.push(u8::from(Instruction::MStore));
                    }
                }
                code.push(u8::from(Instruction::Pop));
                code.push(u8::from(Instruction::Pop));
            }
        }
    }
    for sub in &subs {
        code.extend_from_slice(&sub.code);
    }
    debug!(
        items = assembly.len(),
        code = code_size,
        total = program_size,
        subs = subs.len(),
        "assembled program"
    );
    Ok(program)
}

fn push_width(value: &BigUint) -> usize {
    if value.is_zero() {
        1
    } else {
        (value.bits().div_ceil(8) as usize).min(32)
    }
}

fn push_offset(code: &mut Vec<u8>, offset: usize) {
    code.push(u8::from(Instruction::Push2));
    code.extend_from_slice(&(offset as u16).to_be_bytes());
}

/// Positions holding a `JUMPDEST` opcode, skipping push immediates.
pub fn jump_destinations(code: &[u8]) -> Vec<bool> {
    let mut valid = vec![false; code.len()];
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        if byte == u8::from(Instruction::JumpDest) {
            valid[pc] = true;
        }
        pc += 1;
        if (0x60..=0x7f).contains(&byte) {
            pc += usize::from(byte - 0x5f);
        }
    }
    valid
}

/// Mnemonic listing of byte code, one instruction per line.
pub fn disassemble(code: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        let _ = match Instruction::from_u8(byte) {
            Some(op) if op.immediate_size() > 0 => {
                let end = (pc + 1 + op.immediate_size()).min(code.len());
                let immediate: String = code[pc + 1..end].iter().map(|b| format!("{b:02x}")).collect();
                let line = writeln!(out, "{pc:04x} {} 0x{immediate}", op.name());
                pc = end;
                line
            }
            Some(op) => {
                let line = writeln!(out, "{pc:04x} {}", op.name());
                pc += 1;
                line
            }
            None => {
                let line = writeln!(out, "{pc:04x} 0x{byte:02x}");
                pc += 1;
                line
            }
        };
    }
    out
}
