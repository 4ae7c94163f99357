//! Symbolic assembly.
//!
//! An [`Assembly`] is a flat list of [`AssemblyItem`]s plus the nested
//! assemblies it embeds (the runtime code inside creation code, creation
//! code of contracts created with `new`). Jump targets are symbolic
//! [`Tag`]s resolved when the assembly is linked into bytes.
//!
//! The assembly tracks its stack *deposit*: the net number of words the
//! emitted code has pushed so far. The code generator addresses stack
//! variables relative to it.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigUint;
use quill_core::VariableId;

use super::Instruction;

/// A symbolic jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag_{}", self.0)
    }
}

/// Index of an embedded assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubId(pub usize);

/// One element of an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyItem {
    /// A plain instruction.
    Operation(Instruction),
    /// Push a constant with the shortest `PUSHn`.
    Push(BigUint),
    /// Push the code offset of a tag.
    PushTag(Tag),
    /// A jump destination.
    Tag(Tag),
    /// Push the code offset of an embedded assembly.
    PushSub(SubId),
    /// Push the byte size of an embedded assembly.
    PushSubSize(SubId),
    /// Push the size of the whole program including embedded data.
    PushProgramSize,
    /// Push an immutable's value, patched into runtime code at deployment.
    PushImmutable(VariableId),
    /// Write an immutable's value into a memory copy of the runtime code:
    /// pops `code_offset, value`.
    AssignImmutable(VariableId),
}

impl AssemblyItem {
    /// Net change of the stack height.
    pub fn stack_effect(&self) -> i64 {
        match self {
            AssemblyItem::Operation(op) => op.stack_effect(),
            AssemblyItem::Tag(_) => 0,
            AssemblyItem::AssignImmutable(_) => -2,
            AssemblyItem::Push(_)
            | AssemblyItem::PushTag(_)
            | AssemblyItem::PushSub(_)
            | AssemblyItem::PushSubSize(_)
            | AssemblyItem::PushProgramSize
            | AssemblyItem::PushImmutable(_) => 1,
        }
    }
}

impl fmt::Display for AssemblyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyItem::Operation(op) => f.write_str(op.name()),
            AssemblyItem::Push(value) => write!(f, "PUSH {value:#x}"),
            AssemblyItem::PushTag(tag) => write!(f, "PUSH [{tag}]"),
            AssemblyItem::Tag(tag) => write!(f, "{tag}:"),
            AssemblyItem::PushSub(sub) => write!(f, "PUSH [$sub{}]", sub.0),
            AssemblyItem::PushSubSize(sub) => write!(f, "PUSH #[$sub{}]", sub.0),
            AssemblyItem::PushProgramSize => f.write_str("PUSHSIZE"),
            AssemblyItem::PushImmutable(id) => write!(f, "PUSHIMMUTABLE {}", id.0),
            AssemblyItem::AssignImmutable(id) => write!(f, "ASSIGNIMMUTABLE {}", id.0),
        }
    }
}

/// A list of assembly items with embedded sub-assemblies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    items: Vec<AssemblyItem>,
    subs: Vec<Rc<Assembly>>,
    deposit: i64,
}

impl Assembly {
    /// Create an empty assembly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty assembly whose code starts with `deposit` words on the stack.
    pub fn with_deposit(deposit: usize) -> Self {
        Self {
            deposit: deposit as i64,
            ..Self::default()
        }
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Append an item, tracking the stack deposit.
    pub fn append(&mut self, item: AssemblyItem) {
        self.deposit += item.stack_effect();
        self.items.push(item);
    }

    /// Append an instruction.
    #[inline]
    pub fn op(&mut self, op: Instruction) {
        self.append(AssemblyItem::Operation(op));
    }

    /// Append a constant push.
    #[inline]
    pub fn push(&mut self, value: impl Into<BigUint>) {
        self.append(AssemblyItem::Push(value.into()));
    }

    /// Append a tag push.
    #[inline]
    pub fn push_tag(&mut self, tag: Tag) {
        self.append(AssemblyItem::PushTag(tag));
    }

    /// Place a jump destination.
    #[inline]
    pub fn place_tag(&mut self, tag: Tag) {
        self.append(AssemblyItem::Tag(tag));
    }

    /// Append all items of another assembly's code (not its subs) without
    /// touching the deposit.
    pub fn splice(&mut self, items: Vec<AssemblyItem>) {
        self.items.extend(items);
    }

    /// Embed an assembly, returning its index. Embedding the same `Rc`
    /// twice yields the same index.
    pub fn add_sub(&mut self, sub: Rc<Assembly>) -> SubId {
        if let Some(index) = self.subs.iter().position(|s| Rc::ptr_eq(s, &sub)) {
            return SubId(index);
        }
        self.subs.push(sub);
        SubId(self.subs.len() - 1)
    }

    // =========================================================================
    // Stack Deposit
    // =========================================================================

    /// Net words pushed by the code so far.
    #[inline]
    pub fn deposit(&self) -> i64 {
        self.deposit
    }

    /// Override the deposit, e.g. at a jump target reached from elsewhere.
    pub fn set_deposit(&mut self, deposit: i64) {
        self.deposit = deposit;
    }

    /// Adjust the deposit for control flow the item list does not show,
    /// such as a subroutine consuming its arguments.
    pub fn adjust_deposit(&mut self, delta: i64) {
        self.deposit += delta;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// The items.
    pub fn items(&self) -> &[AssemblyItem] {
        &self.items
    }

    /// Take the items out, leaving the assembly empty.
    pub fn take_items(&mut self) -> Vec<AssemblyItem> {
        std::mem::take(&mut self.items)
    }

    /// Embedded assemblies.
    pub fn subs(&self) -> &[Rc<Assembly>] {
        &self.subs
    }

    /// Embedded assembly by index.
    pub fn sub(&self, id: SubId) -> Option<&Rc<Assembly>> {
        self.subs.get(id.0)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no item was emitted.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count occurrences of an instruction.
    pub fn count_op(&self, op: Instruction) -> usize {
        self.items
            .iter()
            .filter(|item| **item == AssemblyItem::Operation(op))
            .count()
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            match item {
                AssemblyItem::Tag(_) => writeln!(f, "{item}")?,
                _ => writeln!(f, "    {item}")?,
            }
        }
        for (index, sub) in self.subs.iter().enumerate() {
            writeln!(f, "sub_{index}:")?;
            write!(f, "{sub}")?;
        }
        Ok(())
    }
}
