//! Compiler context.
//!
//! [`CompilerContext`] owns everything that lives for the compilation of one
//! code image (creation code or runtime code): the assembly being emitted,
//! the compile-time model of the stack height, stack slots of locals, entry
//! tags of internal functions, reserved memory of immutables, embedded
//! sub-assemblies and the runtime helper registry.
//!
//! Stack slots are addressed absolutely: slot 0 is the bottom of the current
//! frame (the return label of a function or helper) and the assembly's
//! deposit is the frame height. `DUPn`/`SWAPn` distances are derived from
//! the difference, and a distance beyond the configured stack limit is a
//! "stack too deep" error.

use std::collections::VecDeque;
use std::rc::Rc;

use num_bigint::BigUint;
use quill_core::ast::LocalId;
use quill_core::{CompilationError, ContractId, FunctionId, Span, TypeEnv, VariableId};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::asm::{Assembly, AssemblyItem, Instruction, SubId, Tag};
use crate::helpers::HelperRegistry;
use crate::settings::CompilerSettings;

type Result<T> = std::result::Result<T, CompilationError>;

/// Memory word holding the free memory pointer.
pub const FREE_MEMORY_POINTER: u64 = 0x40;

/// Memory word that is always zero; empty dynamic memory arrays point here.
pub const ZERO_SLOT: u64 = 0x60;

/// First byte of allocatable memory.
pub const GENERAL_MEMORY_START: u64 = 0x80;

/// State of the compilation of one code image.
pub struct CompilerContext<'env> {
    env: &'env TypeEnv,
    settings: CompilerSettings,
    scope: Option<ContractId>,
    creation: bool,

    asm: Assembly,
    next_tag: u32,
    helpers: HelperRegistry,

    locals: FxHashMap<LocalId, usize>,
    function_entries: FxHashMap<FunctionId, Tag>,
    function_queue: VecDeque<FunctionId>,

    immutables: FxHashMap<VariableId, u64>,
    subs: Vec<Rc<Assembly>>,
    contracts: FxHashMap<ContractId, Rc<Assembly>>,
}

impl<'env> CompilerContext<'env> {
    /// Create a context compiling code of contract `scope`.
    pub fn new(env: &'env TypeEnv, settings: CompilerSettings, scope: Option<ContractId>) -> Self {
        Self {
            env,
            settings,
            scope,
            creation: false,
            asm: Assembly::new(),
            next_tag: 1,
            helpers: HelperRegistry::new(),
            locals: FxHashMap::default(),
            function_entries: FxHashMap::default(),
            function_queue: VecDeque::new(),
            immutables: FxHashMap::default(),
            subs: Vec::new(),
            contracts: FxHashMap::default(),
        }
    }

    /// Make creation code of other contracts available to `new`.
    pub fn with_compiled_contracts(mut self, contracts: FxHashMap<ContractId, Rc<Assembly>>) -> Self {
        self.contracts = contracts;
        self
    }

    /// Declarations.
    #[inline]
    pub fn env(&self) -> &'env TypeEnv {
        self.env
    }

    /// Settings of the run.
    #[inline]
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Contract whose code is compiled, used as member lookup scope.
    #[inline]
    pub fn scope(&self) -> Option<ContractId> {
        self.scope
    }

    /// Whether creation code (constructor context) is compiled.
    #[inline]
    pub fn is_creation(&self) -> bool {
        self.creation
    }

    /// Switch between creation and runtime code.
    pub fn set_creation(&mut self, creation: bool) {
        self.creation = creation;
    }

    /// Creation code of another contract.
    pub fn compiled_contract(&self, id: ContractId) -> Option<Rc<Assembly>> {
        self.contracts.get(&id).cloned()
    }

    /// Deployed address of a library.
    pub fn library_address(&self, id: ContractId) -> Option<&BigUint> {
        self.settings.library_addresses.get(&id)
    }

    // =========================================================================
    // Basic Emission
    // =========================================================================

    /// Emit an instruction.
    #[inline]
    pub fn op(&mut self, op: Instruction) {
        self.asm.op(op);
    }

    /// Emit a constant push.
    #[inline]
    pub fn push(&mut self, value: impl Into<BigUint>) {
        self.asm.push(value);
    }

    /// Emit a tag push.
    #[inline]
    pub fn push_tag(&mut self, tag: Tag) {
        self.asm.push_tag(tag);
    }

    /// Emit an arbitrary item.
    pub fn append(&mut self, item: AssemblyItem) {
        self.asm.append(item);
    }

    /// Allocate a fresh tag.
    pub fn new_tag(&mut self) -> Tag {
        let tag = Tag(self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Place a jump destination.
    #[inline]
    pub fn place_tag(&mut self, tag: Tag) {
        self.asm.place_tag(tag);
    }

    /// Unconditional jump.
    pub fn jump(&mut self, tag: Tag) {
        self.push_tag(tag);
        self.op(Instruction::Jump);
    }

    /// Jump when the word on top of the stack is non-zero; consumes it.
    pub fn jump_if(&mut self, tag: Tag) {
        self.push_tag(tag);
        self.op(Instruction::JumpI);
    }

    /// The assembly emitted so far.
    pub fn assembly(&self) -> &Assembly {
        &self.asm
    }

    /// Whether the last emitted item ends control flow.
    pub fn terminated(&self) -> bool {
        matches!(
            self.asm.items().last(),
            Some(AssemblyItem::Operation(op)) if op.terminates()
        )
    }

    // =========================================================================
    // Stack Height
    // =========================================================================

    /// Words in the current frame.
    pub fn stack_height(&self) -> usize {
        usize::try_from(self.asm.deposit()).unwrap_or(0)
    }

    /// Set the frame height, e.g. at a join point.
    pub fn set_stack_height(&mut self, height: usize) {
        self.asm.set_deposit(height as i64);
    }

    /// Adjust the frame height for control flow the items do not show.
    pub fn adjust_stack(&mut self, delta: i64) {
        self.asm.adjust_deposit(delta);
    }

    fn reach(&self, n: usize, family: fn(usize) -> Option<Instruction>) -> Result<Instruction> {
        if n > self.settings.stack_limit {
            return Err(CompilationError::stack_too_deep(
                format!("a stack slot is {n} words deep"),
                Span::default(),
            ));
        }
        family(n).ok_or_else(|| CompilationError::internal(format!("no instruction reaches stack depth {n}")))
    }

    /// `DUPn`.
    pub fn dup(&mut self, n: usize) -> Result<()> {
        let op = self.reach(n, Instruction::dup)?;
        self.op(op);
        Ok(())
    }

    /// `SWAPn`.
    pub fn swap(&mut self, n: usize) -> Result<()> {
        let op = self.reach(n, Instruction::swap)?;
        self.op(op);
        Ok(())
    }

    /// Discard `n` words.
    pub fn pop(&mut self, n: usize) {
        for _ in 0..n {
            self.op(Instruction::Pop);
        }
    }

    /// Discard words until the frame has `height` words.
    pub fn pop_to(&mut self, height: usize) {
        while self.stack_height() > height {
            self.op(Instruction::Pop);
        }
    }

    /// Copy the word at an absolute frame slot to the top.
    pub fn dup_slot(&mut self, slot: usize) -> Result<()> {
        let height = self.stack_height();
        if slot >= height {
            return Err(CompilationError::internal(format!(
                "slot {slot} is above the stack height {height}"
            )));
        }
        self.dup(height - slot)
    }

    /// Move the top word into an absolute frame slot.
    pub fn store_slot(&mut self, slot: usize) -> Result<()> {
        let height = self.stack_height();
        if slot + 1 >= height {
            return Err(CompilationError::internal(format!(
                "cannot store into slot {slot} at stack height {height}"
            )));
        }
        self.swap(height - 1 - slot)?;
        self.op(Instruction::Pop);
        Ok(())
    }

    /// Move the top word below the `depth` words under it.
    pub fn rotate_down(&mut self, depth: usize) -> Result<()> {
        for i in (1..=depth).rev() {
            self.swap(i)?;
        }
        Ok(())
    }

    /// Move the word below `depth` others to the top, keeping their order.
    pub fn rotate_up(&mut self, depth: usize) -> Result<()> {
        for i in 1..=depth {
            self.swap(i)?;
        }
        Ok(())
    }

    /// Permute and drop the top `layout.len()` words: the word at position
    /// `i` (counted from the lowest) moves to `layout[i]`, or is dropped when
    /// `None`. Targets must be distinct and below the number of kept words.
    pub fn shuffle(&mut self, mut layout: Vec<Option<usize>>) -> Result<()> {
        let kept = layout.iter().flatten().count();
        if layout.iter().flatten().any(|target| *target >= kept) {
            return Err(CompilationError::internal("stack shuffle target out of range"));
        }
        while let Some(&top) = layout.last() {
            let top_index = layout.len() - 1;
            match top {
                None => {
                    self.op(Instruction::Pop);
                    layout.pop();
                }
                Some(target) if target == top_index => {
                    match (0..top_index).rev().find(|i| layout[*i] != Some(*i)) {
                        Some(misplaced) => {
                            self.swap(top_index - misplaced)?;
                            layout.swap(misplaced, top_index);
                        }
                        None => break,
                    }
                }
                Some(target) => {
                    self.swap(top_index - target)?;
                    layout.swap(target, top_index);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Locals
    // =========================================================================

    /// Record the first stack slot of a local.
    pub fn add_local(&mut self, id: LocalId, slot: usize) {
        self.locals.insert(id, slot);
    }

    /// First stack slot of a local.
    pub fn local_slot(&self, id: LocalId) -> Result<usize> {
        self.locals
            .get(&id)
            .copied()
            .ok_or_else(|| CompilationError::internal(format!("local {} has no stack slot", id.0)))
    }

    /// Forget all locals at the end of a frame.
    pub fn clear_locals(&mut self) {
        self.locals.clear();
    }

    // =========================================================================
    // Internal Functions
    // =========================================================================

    /// Entry tag of an internal function. The first request queues the
    /// function for compilation.
    pub fn function_entry_label(&mut self, id: FunctionId) -> Tag {
        if let Some(tag) = self.function_entries.get(&id) {
            return *tag;
        }
        let tag = self.new_tag();
        self.function_entries.insert(id, tag);
        self.function_queue.push_back(id);
        tag
    }

    /// Next function whose entry tag was handed out but whose body was not compiled.
    pub fn next_queued_function(&mut self) -> Option<FunctionId> {
        self.function_queue.pop_front()
    }

    // =========================================================================
    // Immutables
    // =========================================================================

    /// Reserve a memory word holding an immutable during construction.
    pub fn reserve_immutable(&mut self, variable: VariableId) -> u64 {
        let next = GENERAL_MEMORY_START + 32 * self.immutables.len() as u64;
        *self.immutables.entry(variable).or_insert(next)
    }

    /// Memory word of an immutable during construction.
    pub fn immutable_offset(&self, variable: VariableId) -> Option<u64> {
        self.immutables.get(&variable).copied()
    }

    /// First byte after the reserved immutable words.
    pub fn reserved_memory_end(&self) -> u64 {
        GENERAL_MEMORY_START + 32 * self.immutables.len() as u64
    }

    // =========================================================================
    // Sub-assemblies
    // =========================================================================

    /// Embed an assembly, returning its index.
    pub fn add_sub(&mut self, sub: Rc<Assembly>) -> SubId {
        if let Some(index) = self.subs.iter().position(|s| Rc::ptr_eq(s, &sub)) {
            return SubId(index);
        }
        self.subs.push(sub);
        SubId(self.subs.len() - 1)
    }

    // =========================================================================
    // Runtime Helpers
    // =========================================================================

    /// Registered helpers.
    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    /// Entry tag of the helper `name`, generating its body on first request.
    ///
    /// The body starts with the return label in slot 0 and the `params`
    /// arguments in slots `1..=params`, and must end by returning `returns`
    /// words (see [`CompilerContext::helper_return`]).
    pub fn helper<F>(&mut self, name: &str, params: usize, returns: usize, generate: F) -> Result<Tag>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if let Some(tag) = self.helpers.tag_of(name) {
            return Ok(tag);
        }
        let tag = self.new_tag();
        self.helpers.reserve(name, tag, params, returns);
        let generated = self.generate_body(tag, params + 1, generate).and_then(|body| {
            if body.deposit() == returns as i64 {
                Ok(body)
            } else {
                Err(CompilationError::internal(format!(
                    "helper {name} leaves {} words instead of {returns}",
                    body.deposit()
                )))
            }
        });
        let mut body = match generated {
            Ok(body) => body,
            Err(err) => {
                self.helpers.release(name);
                return Err(err);
            }
        };
        self.helpers.finish(name, body.take_items());
        debug!(helper = name, params, returns, "synthesized runtime helper");
        Ok(tag)
    }

    /// Entry tag of a helper that never returns (panics and reverts). It is
    /// entered with a plain jump and finds nothing of its own on the stack.
    pub fn abort_helper<F>(&mut self, name: &str, generate: F) -> Result<Tag>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if let Some(tag) = self.helpers.tag_of(name) {
            return Ok(tag);
        }
        let tag = self.new_tag();
        self.helpers.reserve(name, tag, 0, 0);
        let generated = self.generate_body(tag, 0, generate).and_then(|body| {
            if matches!(body.items().last(), Some(AssemblyItem::Operation(op)) if op.terminates()) {
                Ok(body)
            } else {
                Err(CompilationError::internal(format!("abort helper {name} falls through")))
            }
        });
        let mut body = match generated {
            Ok(body) => body,
            Err(err) => {
                self.helpers.release(name);
                return Err(err);
            }
        };
        self.helpers.finish(name, body.take_items());
        debug!(helper = name, "synthesized abort helper");
        Ok(tag)
    }

    /// Compile a function or accessor entered at `tag` with `height` words
    /// on the stack. A failed body is replaced by `INVALID` so that jumps to
    /// `tag` still resolve.
    pub fn function_body<F>(&mut self, tag: Tag, height: usize, generate: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        match self.generate_body(tag, height, generate) {
            Ok(mut body) => {
                self.asm.splice(body.take_items());
                Ok(())
            }
            Err(error) => {
                self.asm.splice(vec![AssemblyItem::Tag(tag), AssemblyItem::Operation(Instruction::Invalid)]);
                Err(error)
            }
        }
    }

    fn generate_body<F>(&mut self, tag: Tag, height: usize, generate: F) -> Result<Assembly>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let outer = std::mem::replace(&mut self.asm, Assembly::with_deposit(height));
        let outer_locals = std::mem::take(&mut self.locals);
        self.asm.place_tag(tag);
        let result = generate(self);
        self.locals = outer_locals;
        let body = std::mem::replace(&mut self.asm, outer);
        result.map(|()| body)
    }

    /// Call a helper whose `params` arguments are on top of the stack.
    pub fn call_helper(&mut self, tag: Tag, params: usize, returns: usize) -> Result<()> {
        let return_tag = self.new_tag();
        self.push_tag(return_tag);
        self.rotate_down(params)?;
        self.jump(tag);
        self.adjust_stack(returns as i64 - params as i64 - 1);
        self.place_tag(return_tag);
        trace!(%tag, params, returns, height = self.stack_height(), "returned from helper");
        Ok(())
    }

    /// Return from a helper or internal function: keep the words at `results`
    /// (absolute slots, in order), drop everything else, and jump to the
    /// return label in slot 0.
    pub fn helper_return(&mut self, results: &[usize]) -> Result<()> {
        let height = self.stack_height();
        let mut layout = vec![None; height];
        if let Some(first) = layout.first_mut() {
            *first = Some(results.len());
        }
        for (position, slot) in results.iter().enumerate() {
            match layout.get_mut(*slot) {
                Some(entry @ None) if *slot != 0 => *entry = Some(position),
                _ => {
                    return Err(CompilationError::internal(format!(
                        "invalid result slot {slot} at stack height {height}"
                    )));
                }
            }
        }
        self.shuffle(layout)?;
        self.op(Instruction::Jump);
        Ok(())
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// The finished assembly: emitted code, helper bodies and sub-assemblies.
    pub fn finish(mut self) -> Assembly {
        let bodies = self.helpers.take_bodies();
        let mut asm = self.asm;
        asm.splice(bodies);
        for sub in self.subs {
            asm.add_sub(sub);
        }
        asm
    }
}
