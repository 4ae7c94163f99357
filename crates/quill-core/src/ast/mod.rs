//! Type-annotated expression tree.
//!
//! The tree is what the semantic phase hands to the code generator: every
//! node carries the interned [`TypeIdx`] of its value and every identifier is
//! already resolved to the declaration it names. Nodes are allocated in a
//! `bumpalo` arena and borrow their children, so a whole function body is
//! freed at once when the arena goes away.
//!
//! [`AstBuilder`] constructs well-typed trees for tests and tools that do not
//! run a front end; it performs the small amount of type inference needed to
//! attach types (operator results, member lookup, call returns).

mod builder;
mod ops;

pub use builder::AstBuilder;
pub use ops::{AssignOp, BinaryOp, UnaryOp};

use crate::Span;
use crate::env::{ContractId, EnumId, EventId, FunctionId, StructId, TypeIdx, VariableId};

/// Local variable or parameter slot of a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    /// Position in the body's local table.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A local declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    /// Source name.
    pub name: String,
    /// Declared type.
    pub ty: TypeIdx,
}

/// The declaration an identifier resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decl {
    /// Local variable or parameter.
    Local(LocalId),
    /// State variable (storage or immutable).
    StateVariable(VariableId),
    /// Function of the current contract hierarchy or a library.
    Function(FunctionId),
    /// Event, callable through `emit`.
    Event(EventId),
    /// Contract or library name.
    Contract(ContractId),
    /// Struct type name.
    Struct(StructId),
    /// Enum type name.
    Enum(EnumId),
    /// Builtin function or magic variable (`keccak256`, `msg`, `abi`, ...);
    /// what it is follows from the node's type.
    Builtin,
    /// `this`.
    This,
    /// `super`.
    Super,
    /// Elementary type name such as `uint8` or `address`.
    TypeName,
}

/// An expression node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expr<'ast> {
    /// Node payload.
    pub kind: ExprKind<'ast>,
    /// Type of the value.
    pub ty: TypeIdx,
    /// Source location.
    pub span: Span,
}

/// Expression payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprKind<'ast> {
    /// Number or string literal; the value lives in the literal type.
    Literal,
    /// `true` / `false`.
    Bool(bool),
    /// Resolved identifier.
    Ident(Decl),
    /// Binary operation.
    Binary(&'ast BinaryExpr<'ast>),
    /// Prefix or postfix unary operation.
    Unary(&'ast UnaryExpr<'ast>),
    /// Plain or compound assignment.
    Assign(&'ast AssignExpr<'ast>),
    /// `cond ? a : b`.
    Conditional(&'ast ConditionalExpr<'ast>),
    /// `(a, b, ...)` or `[a, b, ...]`.
    Tuple(&'ast TupleExpr<'ast>),
    /// Call of a function value, type conversion or struct constructor.
    Call(&'ast CallExpr<'ast>),
    /// `base.name`.
    Member(&'ast MemberExpr<'ast>),
    /// `base[index]`, or `T[]` when used as a type.
    Index(&'ast IndexExpr<'ast>),
    /// `new T`; the node type is the creation function.
    New,
}

/// A binary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryExpr<'ast> {
    /// Left operand.
    pub left: &'ast Expr<'ast>,
    /// Operator.
    pub op: BinaryOp,
    /// Right operand.
    pub right: &'ast Expr<'ast>,
    /// Type both operands are converted to before the operation.
    pub common: TypeIdx,
}

/// A unary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnaryExpr<'ast> {
    /// Operator.
    pub op: UnaryOp,
    /// Operand.
    pub operand: &'ast Expr<'ast>,
    /// `++x` rather than `x++`.
    pub prefix: bool,
}

/// An assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignExpr<'ast> {
    /// Destination.
    pub target: &'ast Expr<'ast>,
    /// `=` or a compound operator.
    pub op: AssignOp,
    /// Source.
    pub value: &'ast Expr<'ast>,
}

/// A conditional expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionalExpr<'ast> {
    /// Condition.
    pub condition: &'ast Expr<'ast>,
    /// Value when true.
    pub then_branch: &'ast Expr<'ast>,
    /// Value when false.
    pub else_branch: &'ast Expr<'ast>,
}

/// Tuple or inline array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TupleExpr<'ast> {
    /// Components; `None` for wildcards on the left of an assignment.
    pub components: &'ast [Option<&'ast Expr<'ast>>],
    /// `[a, b]` rather than `(a, b)`.
    pub inline_array: bool,
}

/// A call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallExpr<'ast> {
    /// Function value, type name or struct name.
    pub callee: &'ast Expr<'ast>,
    /// Positional arguments.
    pub args: &'ast [&'ast Expr<'ast>],
    /// External call whose failure yields `false` plus empty results
    /// instead of reverting.
    pub recoverable: bool,
}

/// A member access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberExpr<'ast> {
    /// Object.
    pub base: &'ast Expr<'ast>,
    /// Member name.
    pub name: &'ast str,
}

/// An index access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexExpr<'ast> {
    /// Indexed object.
    pub base: &'ast Expr<'ast>,
    /// Index; absent for array type names like `uint[]`.
    pub index: Option<&'ast Expr<'ast>>,
}

/// A statement of a function body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt<'ast> {
    /// Expression evaluated for its effects.
    Expr(&'ast Expr<'ast>),
    /// `T a = init;` or `(T a, , T c) = init;`.
    VarDecl {
        /// Declared locals; `None` skips a component.
        locals: &'ast [Option<LocalId>],
        /// Initial value.
        init: Option<&'ast Expr<'ast>>,
    },
    /// `return` with an optional value.
    Return(Option<&'ast Expr<'ast>>),
}

/// Compiled form of a function definition's body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody<'ast> {
    /// The definition.
    pub function: FunctionId,
    /// Locals of the body, parameters and named returns included.
    pub locals: Vec<LocalDecl>,
    /// Parameter locals in order.
    pub params: Vec<LocalId>,
    /// Return variable locals in order.
    pub returns: Vec<LocalId>,
    /// Statements.
    pub statements: &'ast [Stmt<'ast>],
}

/// Everything the contract assembler needs besides the declarations in [`crate::TypeEnv`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractSource<'ast> {
    /// Function bodies, constructor included.
    pub functions: Vec<FunctionBody<'ast>>,
    /// State variable initializers in declaration order.
    pub initializers: Vec<(VariableId, &'ast Expr<'ast>)>,
    /// Locals used by initializer expressions.
    pub initializer_locals: Vec<LocalDecl>,
}

impl<'ast> ContractSource<'ast> {
    /// Body of `function`, if present.
    pub fn body(&self, function: FunctionId) -> Option<&FunctionBody<'ast>> {
        self.functions.iter().find(|b| b.function == function)
    }
}
