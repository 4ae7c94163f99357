//! Typed tree construction.

use bumpalo::Bump;

use super::{
    AssignExpr, AssignOp, BinaryExpr, BinaryOp, CallExpr, ConditionalExpr, Decl, Expr, ExprKind, FunctionBody,
    IndexExpr, LocalDecl, LocalId, MemberExpr, Stmt, TupleExpr, UnaryExpr, UnaryOp,
};
use crate::Span;
use crate::env::{ContractId, EnumId, EventId, FunctionId, StructId, TypeEnv, TypeIdx, VariableId};
use crate::error::TypeError;
use crate::rational::{SubDenomination, parse_number};
use crate::types::{
    ContractType, DataLocation, FunctionKind, FunctionType, MagicKind, StateMutability, Type,
};
use crate::types::function::FunctionOrigin;

/// Builds type-annotated trees into an arena.
///
/// Every constructor checks the operation against the type system and
/// attaches the result type, so trees built here are as well-typed as the
/// ones a front end produces.
pub struct AstBuilder<'ast, 'env> {
    arena: &'ast Bump,
    env: &'env mut TypeEnv,
    scope: Option<ContractId>,
    locals: Vec<LocalDecl>,
    span: Span,
}

impl<'ast, 'env> AstBuilder<'ast, 'env> {
    /// Builder for code inside `scope` (the contract whose members are visible).
    pub fn new(arena: &'ast Bump, env: &'env mut TypeEnv, scope: Option<ContractId>) -> Self {
        Self {
            arena,
            env,
            scope,
            locals: Vec::new(),
            span: Span::default(),
        }
    }

    /// The declaration arena.
    pub fn env(&self) -> &TypeEnv {
        self.env
    }

    /// Mutable declaration arena, for registering declarations mid-build.
    pub fn env_mut(&mut self) -> &mut TypeEnv {
        self.env
    }

    /// Attach `span` to the nodes built from now on.
    pub fn at(&mut self, span: Span) -> &mut Self {
        self.span = span;
        self
    }

    fn node(&mut self, kind: ExprKind<'ast>, ty: Type) -> &'ast Expr<'ast> {
        let ty = self.env.intern(ty);
        self.arena.alloc(Expr {
            kind,
            ty,
            span: self.span,
        })
    }

    fn type_of(&self, expr: &Expr<'_>) -> Type {
        self.env.ty(expr.ty).clone()
    }

    fn name_of(&self, ty: &Type) -> String {
        ty.name(self.env)
    }

    // ------------------------------------------------------------------------
    // Locals
    // ------------------------------------------------------------------------

    /// Declare a local variable of the current body.
    pub fn declare_local(&mut self, name: impl Into<String>, ty: Type) -> LocalId {
        let ty = self.env.intern(ty);
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalDecl { name: name.into(), ty });
        id
    }

    /// Locals declared so far, leaving the builder with none.
    pub fn take_locals(&mut self) -> Vec<LocalDecl> {
        std::mem::take(&mut self.locals)
    }

    /// Reference to a local.
    pub fn local(&mut self, id: LocalId) -> &'ast Expr<'ast> {
        let ty = self.locals[id.index()].ty;
        self.arena.alloc(Expr {
            kind: ExprKind::Ident(Decl::Local(id)),
            ty,
            span: self.span,
        })
    }

    // ------------------------------------------------------------------------
    // Literals and names
    // ------------------------------------------------------------------------

    /// Number literal such as `42`, `0xff`, `1e18` or `2.5`.
    pub fn number(&mut self, text: &str) -> Result<&'ast Expr<'ast>, TypeError> {
        self.number_with(text, SubDenomination::None)
    }

    /// Number literal with a unit suffix.
    pub fn number_with(&mut self, text: &str, sub: SubDenomination) -> Result<&'ast Expr<'ast>, TypeError> {
        let literal = parse_number(text, sub).map_err(|e| e.with_span(self.span))?;
        let mut ty = Type::rational(literal.value);
        if let Type::RationalNumber(rational) = &mut ty {
            rational.compatible_bytes = literal.compatible_bytes;
        }
        Ok(self.node(ExprKind::Literal, ty))
    }

    /// Integer literal.
    pub fn int(&mut self, value: i128) -> &'ast Expr<'ast> {
        self.node(ExprKind::Literal, Type::rational_int(value))
    }

    /// String literal.
    pub fn string(&mut self, value: impl AsRef<[u8]>) -> &'ast Expr<'ast> {
        self.node(ExprKind::Literal, Type::string_literal(value.as_ref()))
    }

    /// `true` / `false`.
    pub fn boolean(&mut self, value: bool) -> &'ast Expr<'ast> {
        self.node(ExprKind::Bool(value), Type::Bool)
    }

    /// State variable reference.
    pub fn state_variable(&mut self, id: VariableId) -> &'ast Expr<'ast> {
        let ty = self.env.variable(id).ty.clone();
        self.node(ExprKind::Ident(Decl::StateVariable(id)), ty)
    }

    /// Internal reference to a function.
    pub fn function(&mut self, id: FunctionId) -> &'ast Expr<'ast> {
        let ty = Type::function(FunctionType::from_declaration(self.env, id, false));
        self.node(ExprKind::Ident(Decl::Function(id)), ty)
    }

    /// Event name, callable through `emit`.
    pub fn event(&mut self, id: EventId) -> &'ast Expr<'ast> {
        let def = self.env.event(id);
        let mut ty = FunctionType::builtin(
            FunctionKind::Event,
            def.params.iter().map(|p| p.ty.clone()).collect(),
            Vec::new(),
            StateMutability::NonPayable,
        );
        ty.param_names = def.params.iter().map(|p| p.name.clone()).collect();
        ty.origin = Some(FunctionOrigin::Event(id));
        self.node(ExprKind::Ident(Decl::Event(id)), Type::function(ty))
    }

    /// Contract or library name.
    pub fn contract(&mut self, id: ContractId) -> &'ast Expr<'ast> {
        self.node(
            ExprKind::Ident(Decl::Contract(id)),
            Type::TypeType(Box::new(Type::contract(id))),
        )
    }

    /// Struct name.
    pub fn struct_name(&mut self, id: StructId) -> &'ast Expr<'ast> {
        self.node(
            ExprKind::Ident(Decl::Struct(id)),
            Type::TypeType(Box::new(Type::struct_type(id, DataLocation::Storage))),
        )
    }

    /// Enum name.
    pub fn enum_name(&mut self, id: EnumId) -> &'ast Expr<'ast> {
        self.node(ExprKind::Ident(Decl::Enum(id)), Type::TypeType(Box::new(Type::Enum(id))))
    }

    /// Elementary type name such as `uint8`, `address` or `bytes`.
    pub fn type_name(&mut self, ty: Type) -> &'ast Expr<'ast> {
        self.node(ExprKind::Ident(Decl::TypeName), Type::TypeType(Box::new(ty)))
    }

    /// `this`.
    pub fn this(&mut self) -> Result<&'ast Expr<'ast>, TypeError> {
        let scope = self.scope.ok_or_else(|| TypeError::invalid("\"this\" outside of a contract").with_span(self.span))?;
        Ok(self.node(ExprKind::Ident(Decl::This), Type::contract(scope)))
    }

    /// `super`.
    pub fn super_(&mut self) -> Result<&'ast Expr<'ast>, TypeError> {
        let scope = self.scope.ok_or_else(|| TypeError::invalid("\"super\" outside of a contract").with_span(self.span))?;
        Ok(self.node(
            ExprKind::Ident(Decl::Super),
            Type::Contract(ContractType {
                id: scope,
                is_super: true,
            }),
        ))
    }

    /// `block`, `msg`, `tx` or `abi`.
    pub fn magic(&mut self, kind: MagicKind) -> &'ast Expr<'ast> {
        self.node(ExprKind::Ident(Decl::Builtin), Type::Magic(kind))
    }

    /// `type(T)`.
    pub fn meta_type(&mut self, ty: Type) -> &'ast Expr<'ast> {
        self.node(ExprKind::Ident(Decl::Builtin), Type::Magic(MagicKind::MetaType(Box::new(ty))))
    }

    /// Global builtin function by name.
    pub fn builtin(&mut self, name: &str) -> Result<&'ast Expr<'ast>, TypeError> {
        let ty = builtin_function(name).ok_or_else(|| TypeError::Invalid {
            message: format!("undeclared identifier \"{name}\""),
            span: self.span,
        })?;
        Ok(self.node(ExprKind::Ident(Decl::Builtin), Type::function(ty)))
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    /// Binary operation.
    pub fn binary(
        &mut self,
        left: &'ast Expr<'ast>,
        op: BinaryOp,
        right: &'ast Expr<'ast>,
    ) -> Result<&'ast Expr<'ast>, TypeError> {
        let left_ty = self.type_of(left);
        let right_ty = self.type_of(right);
        let common = left_ty
            .binary_operator_result(self.env, op, &right_ty)
            .map_err(|e| e.with_span(self.span))?;
        let result = if op.is_comparison() { Type::Bool } else { common.clone() };
        let common = self.env.intern(common);
        let node = self.arena.alloc(BinaryExpr { left, op, right, common });
        Ok(self.node(ExprKind::Binary(node), result))
    }

    /// Prefix or postfix unary operation.
    pub fn unary(&mut self, op: UnaryOp, operand: &'ast Expr<'ast>, prefix: bool) -> Result<&'ast Expr<'ast>, TypeError> {
        let operand_ty = self.type_of(operand);
        let result = operand_ty
            .unary_operator_result(self.env, op)
            .map_err(|e| e.with_span(self.span))?;
        let node = self.arena.alloc(UnaryExpr { op, operand, prefix });
        Ok(self.node(ExprKind::Unary(node), result))
    }

    /// `target = value` or `target op= value`.
    pub fn assign(
        &mut self,
        target: &'ast Expr<'ast>,
        op: AssignOp,
        value: &'ast Expr<'ast>,
    ) -> Result<&'ast Expr<'ast>, TypeError> {
        let target_ty = self.type_of(target);
        let value_ty = self.type_of(value);
        let source = match op.binary() {
            Some(binary) => {
                let result = target_ty
                    .binary_operator_result(self.env, binary, &value_ty)
                    .map_err(|e| e.with_span(self.span))?;
                if binary.is_shift() { target_ty.clone() } else { result }
            }
            None => value_ty,
        };
        let convertible = match (&source, &target_ty) {
            (Type::Tuple(_), Type::Tuple(_)) => tuple_assignable(self.env, &source, &target_ty),
            _ => source.is_implicitly_convertible_to(self.env, &target_ty),
        };
        if !convertible {
            return Err(TypeError::NotConvertible {
                from: self.name_of(&source),
                to: self.name_of(&target_ty),
                explicit: false,
                span: self.span,
            });
        }
        let node = self.arena.alloc(AssignExpr { target, op, value });
        Ok(self.node(ExprKind::Assign(node), target_ty))
    }

    /// `condition ? a : b`.
    pub fn conditional(
        &mut self,
        condition: &'ast Expr<'ast>,
        then_branch: &'ast Expr<'ast>,
        else_branch: &'ast Expr<'ast>,
    ) -> Result<&'ast Expr<'ast>, TypeError> {
        let cond_ty = self.type_of(condition);
        if !cond_ty.is_implicitly_convertible_to(self.env, &Type::Bool) {
            return Err(TypeError::NotConvertible {
                from: self.name_of(&cond_ty),
                to: "bool".into(),
                explicit: false,
                span: self.span,
            });
        }
        let a = self.type_of(then_branch);
        let b = self.type_of(else_branch);
        let common = a
            .mobile_type(self.env)
            .zip(b.mobile_type(self.env))
            .and_then(|(a, b)| Type::common_type(self.env, &a, &b))
            .ok_or_else(|| TypeError::Invalid {
                message: format!(
                    "True expression's type {} does not match false expression's type {}.",
                    self.name_of(&a),
                    self.name_of(&b)
                ),
                span: self.span,
            })?;
        let node = self.arena.alloc(ConditionalExpr {
            condition,
            then_branch,
            else_branch,
        });
        Ok(self.node(ExprKind::Conditional(node), common))
    }

    /// `(a, b, ...)`; a single present component is just that expression.
    pub fn tuple(&mut self, components: &[Option<&'ast Expr<'ast>>]) -> &'ast Expr<'ast> {
        if let [Some(single)] = components {
            return single;
        }
        let types = components.iter().map(|c| c.map(|c| self.type_of(c))).collect();
        let components = self.arena.alloc_slice_copy(components);
        let node = self.arena.alloc(TupleExpr {
            components,
            inline_array: false,
        });
        self.node(ExprKind::Tuple(node), Type::Tuple(types))
    }

    /// `[a, b, ...]`, a static memory array of the elements' common type.
    pub fn inline_array(&mut self, elements: &[&'ast Expr<'ast>]) -> Result<&'ast Expr<'ast>, TypeError> {
        let mut base: Option<Type> = None;
        for element in elements {
            let ty = self.type_of(element);
            let mobile = ty
                .mobile_type(self.env)
                .ok_or_else(|| TypeError::invalid("Invalid mobile type in inline array.").with_span(self.span))?;
            base = Some(match base {
                None => mobile,
                Some(current) => Type::common_type(self.env, &current, &mobile).ok_or_else(|| {
                    TypeError::invalid("Unable to deduce common type for array elements.").with_span(self.span)
                })?,
            });
        }
        let base = base.ok_or_else(|| TypeError::invalid("Unable to deduce common type for array elements.").with_span(self.span))?;
        let components: Vec<Option<&'ast Expr<'ast>>> = elements.iter().map(|e| Some(*e)).collect();
        let components = self.arena.alloc_slice_copy(&components);
        let node = self.arena.alloc(TupleExpr {
            components,
            inline_array: true,
        });
        let ty = Type::array(base, Some(elements.len() as u64), DataLocation::Memory);
        Ok(self.node(ExprKind::Tuple(node), ty))
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    /// `base.name`.
    pub fn member(&mut self, base: &'ast Expr<'ast>, name: &str) -> Result<&'ast Expr<'ast>, TypeError> {
        let base_ty = self.type_of(base);
        let members = self.env.members(&base_ty, self.scope);
        let ty = members
            .lookup(name)
            .next()
            .map(|m| m.ty.clone())
            .ok_or_else(|| TypeError::MemberNotFound {
                member: name.to_string(),
                ty: self.name_of(&base_ty),
                span: self.span,
            })?;
        let name = self.arena.alloc_str(name);
        let node = self.arena.alloc(MemberExpr { base, name });
        Ok(self.node(ExprKind::Member(node), ty))
    }

    /// `base[index]`.
    pub fn index(&mut self, base: &'ast Expr<'ast>, index: &'ast Expr<'ast>) -> Result<&'ast Expr<'ast>, TypeError> {
        let base_ty = self.type_of(base);
        let index_ty = self.type_of(index);
        let result = match &base_ty {
            Type::Array(array) => {
                if array.is_string() {
                    return Err(TypeError::invalid("Index access for string is not possible.").with_span(self.span));
                }
                self.expect_convertible(&index_ty, &Type::uint256())?;
                if array.is_byte_array() {
                    Type::fixed_bytes(1)
                } else {
                    array.base.with_location_if_reference(array.location)
                }
            }
            Type::Mapping(mapping) => {
                let key = if mapping.key.is_reference_type() {
                    mapping.key.with_location(DataLocation::Memory, true)
                } else {
                    (*mapping.key).clone()
                };
                self.expect_convertible(&index_ty, &key)?;
                (*mapping.value).clone()
            }
            Type::FixedBytes(_) => {
                self.expect_convertible(&index_ty, &Type::uint256())?;
                Type::fixed_bytes(1)
            }
            Type::TypeType(inner) => {
                let length = match &index_ty {
                    Type::RationalNumber(rational) => crate::rational::literal_value(&rational.value)
                        .and_then(|v| crate::num::to_u64(&v))
                        .ok_or_else(|| TypeError::invalid("Invalid array length, expected integer literal.").with_span(self.span))?,
                    _ => {
                        return Err(TypeError::invalid("Invalid array length, expected integer literal.").with_span(self.span));
                    }
                };
                Type::TypeType(Box::new(Type::array((**inner).clone(), Some(length), DataLocation::Memory)))
            }
            other => {
                return Err(TypeError::Invalid {
                    message: format!("Indexed expression has to be a type, mapping or array (is {})", self.name_of(other)),
                    span: self.span,
                });
            }
        };
        let node = self.arena.alloc(IndexExpr {
            base,
            index: Some(index),
        });
        Ok(self.node(ExprKind::Index(node), result))
    }

    /// `T[]` used as a type, e.g. in `new T[](n)` or `abi.decode(data, (T[]))`.
    pub fn array_type(&mut self, base: &'ast Expr<'ast>) -> Result<&'ast Expr<'ast>, TypeError> {
        let Type::TypeType(inner) = self.type_of(base) else {
            return Err(TypeError::invalid("Expected a type name.").with_span(self.span));
        };
        let node = self.arena.alloc(IndexExpr { base, index: None });
        Ok(self.node(
            ExprKind::Index(node),
            Type::TypeType(Box::new(Type::array(*inner, None, DataLocation::Memory))),
        ))
    }

    fn expect_convertible(&self, from: &Type, to: &Type) -> Result<(), TypeError> {
        if from.is_implicitly_convertible_to(self.env, to) {
            Ok(())
        } else {
            Err(TypeError::NotConvertible {
                from: self.name_of(from),
                to: self.name_of(to),
                explicit: false,
                span: self.span,
            })
        }
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// `new C` (contract creation) or `new T[]` (memory array allocation).
    pub fn new_expr(&mut self, ty: Type) -> Result<&'ast Expr<'ast>, TypeError> {
        let function = match &ty {
            Type::Contract(contract) => {
                let def = self.env.contract(contract.id);
                if def.kind != crate::env::ContractKind::Contract {
                    return Err(TypeError::invalid("Cannot instantiate an interface or library.").with_span(self.span));
                }
                FunctionType::for_creation(self.env, contract.id)
            }
            Type::Array(array) if array.is_dynamically_sized() => FunctionType::builtin(
                FunctionKind::ObjectCreation,
                vec![Type::uint256()],
                vec![ty.with_location(DataLocation::Memory, true)],
                StateMutability::Pure,
            ),
            other => {
                return Err(TypeError::Invalid {
                    message: format!("Contract or array type expected, got {}", self.name_of(other)),
                    span: self.span,
                });
            }
        };
        Ok(self.node(ExprKind::New, Type::function(function)))
    }

    /// Call that reverts on failure.
    pub fn call(&mut self, callee: &'ast Expr<'ast>, args: &[&'ast Expr<'ast>]) -> Result<&'ast Expr<'ast>, TypeError> {
        self.build_call(callee, args, false)
    }

    /// External call that yields a success flag before its results instead
    /// of reverting.
    pub fn try_call(&mut self, callee: &'ast Expr<'ast>, args: &[&'ast Expr<'ast>]) -> Result<&'ast Expr<'ast>, TypeError> {
        match self.type_of(callee) {
            Type::Function(f) if matches!(f.kind, FunctionKind::External | FunctionKind::DelegateCall | FunctionKind::Creation) => {}
            _ => {
                return Err(TypeError::invalid("Only external calls and contract creation can be recovered.").with_span(self.span));
            }
        }
        self.build_call(callee, args, true)
    }

    fn build_call(
        &mut self,
        callee: &'ast Expr<'ast>,
        args: &[&'ast Expr<'ast>],
        recoverable: bool,
    ) -> Result<&'ast Expr<'ast>, TypeError> {
        let callee_ty = self.type_of(callee);
        let arg_types: Vec<Type> = args.iter().map(|a| self.type_of(a)).collect();
        let mut result = match &callee_ty {
            Type::Function(f) => self.function_call_result(f, &arg_types)?,
            Type::TypeType(inner) => match &**inner {
                Type::Struct(s) => {
                    let members = self.env.struct_memory_members(s.id);
                    if members.len() != args.len() {
                        return Err(TypeError::invalid("Wrong argument count for struct constructor.").with_span(self.span));
                    }
                    for ((_, member), arg) in members.iter().zip(&arg_types) {
                        self.expect_convertible(arg, &member.with_location(DataLocation::Memory, true))?;
                    }
                    Type::struct_type(s.id, DataLocation::Memory)
                }
                target => {
                    let [arg] = arg_types.as_slice() else {
                        return Err(TypeError::invalid("Exactly one argument expected for explicit type conversion.").with_span(self.span));
                    };
                    let target = match arg.data_location() {
                        Some(location) if target.is_reference_type() => target.with_location(location, arg.is_pointer() || location != DataLocation::Storage),
                        _ => target.clone(),
                    };
                    if !arg.is_explicitly_convertible_to(self.env, &target) {
                        return Err(TypeError::NotConvertible {
                            from: self.name_of(arg),
                            to: self.name_of(&target),
                            explicit: true,
                            span: self.span,
                        });
                    }
                    target
                }
            },
            other => {
                return Err(TypeError::Invalid {
                    message: format!("Type is not callable: {}", self.name_of(other)),
                    span: self.span,
                });
            }
        };
        if recoverable {
            let mut components = vec![Some(Type::Bool)];
            if result != Type::empty_tuple() {
                components.extend(result.components());
            }
            result = Type::Tuple(components);
        }
        let args = self.arena.alloc_slice_copy(args);
        let node = self.arena.alloc(CallExpr {
            callee,
            args,
            recoverable,
        });
        Ok(self.node(ExprKind::Call(node), result))
    }

    fn function_call_result(&self, f: &FunctionType, args: &[Type]) -> Result<Type, TypeError> {
        match f.kind {
            FunctionKind::AbiDecode => {
                let [data, types] = args else {
                    return Err(TypeError::invalid("This function takes two arguments.").with_span(self.span));
                };
                self.expect_convertible(data, &Type::bytes(DataLocation::Memory))?;
                let decoded = types
                    .components()
                    .into_iter()
                    .map(|c| match c {
                        Some(Type::TypeType(inner)) => Ok(inner.with_location(DataLocation::Memory, true)),
                        _ => Err(TypeError::invalid("Argument has to be a type name.").with_span(self.span)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(match decoded.len() {
                    1 => decoded.into_iter().next().unwrap_or_else(Type::empty_tuple),
                    _ => Type::tuple(decoded),
                });
            }
            FunctionKind::ArrayPush | FunctionKind::ByteArrayPush if args.is_empty() => {
                // a zero element is appended and the result refers to it
                let element = f
                    .params
                    .first()
                    .ok_or_else(|| TypeError::invalid("push without an element type").with_span(self.span))?;
                return Ok(element.with_location_if_reference(DataLocation::Storage));
            }
            FunctionKind::Require if !(1..=2).contains(&args.len()) => {
                return Err(TypeError::invalid("require takes a condition and an optional reason.").with_span(self.span));
            }
            FunctionKind::Revert if args.len() > 1 => {
                return Err(TypeError::invalid("revert takes an optional reason.").with_span(self.span));
            }
            _ => {}
        }
        if !f.can_take_arguments(self.env, args) {
            let names: Vec<String> = args.iter().map(|a| self.name_of(a)).collect();
            return Err(TypeError::Invalid {
                message: format!("Invalid type for argument in function call: ({})", names.join(",")),
                span: self.span,
            });
        }
        let reason_position = match f.kind {
            FunctionKind::Require => Some(1),
            FunctionKind::Revert => Some(0),
            _ => None,
        };
        if let Some(position) = reason_position
            && let Some(reason) = args.get(position)
        {
            self.expect_convertible(reason, &Type::string(DataLocation::Memory))?;
        }
        Ok(match f.returns.as_slice() {
            [single] => single.clone(),
            many => Type::tuple(many.to_vec()),
        })
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    /// Allocate a statement list.
    pub fn statements(&self, statements: Vec<Stmt<'ast>>) -> &'ast [Stmt<'ast>] {
        self.arena.alloc_slice_fill_iter(statements)
    }

    /// Allocate the local list of a declaration statement.
    pub fn declared(&self, locals: &[Option<LocalId>]) -> &'ast [Option<LocalId>] {
        self.arena.alloc_slice_copy(locals)
    }

    /// Build the body of `function`: parameters and return variables are
    /// declared as locals and handed to `build`, which returns the statements.
    pub fn function_body<F>(&mut self, function: FunctionId, build: F) -> Result<FunctionBody<'ast>, TypeError>
    where
        F: FnOnce(&mut Self, &[LocalId], &[LocalId]) -> Result<Vec<Stmt<'ast>>, TypeError>,
    {
        let saved = std::mem::take(&mut self.locals);
        let def = self.env.function(function).clone();
        let params: Vec<LocalId> = def
            .params
            .iter()
            .map(|p| {
                let ty = if def.visibility == crate::env::Visibility::External && p.ty.is_reference_type() {
                    p.ty.with_location(DataLocation::CallData, true)
                } else {
                    p.ty.clone()
                };
                self.declare_local(p.name.clone(), ty)
            })
            .collect();
        let returns: Vec<LocalId> = def
            .returns
            .iter()
            .map(|p| self.declare_local(p.name.clone(), p.ty.clone()))
            .collect();
        let statements = build(self, &params, &returns);
        let locals = std::mem::replace(&mut self.locals, saved);
        let statements = statements?;
        Ok(FunctionBody {
            function,
            locals,
            params,
            returns,
            statements: self.statements(statements),
        })
    }

    /// Interned index of a type.
    pub fn intern(&mut self, ty: Type) -> TypeIdx {
        self.env.intern(ty)
    }
}

fn tuple_assignable(env: &TypeEnv, source: &Type, target: &Type) -> bool {
    let (Type::Tuple(from), Type::Tuple(to)) = (source, target) else {
        return false;
    };
    let present: Vec<bool> = to.iter().map(Option::is_some).collect();
    let Some(alignment) = crate::types::tuple_alignment(&present, from.len()) else {
        return false;
    };
    alignment.iter().enumerate().all(|(dest, src)| match (src, &to[dest]) {
        (Some(src), Some(target)) => from
            .get(*src)
            .and_then(Option::as_ref)
            .is_some_and(|value| value.is_implicitly_convertible_to(env, target)),
        _ => true,
    })
}

/// Types of the global builtin functions.
fn builtin_function(name: &str) -> Option<FunctionType> {
    use FunctionKind as K;
    use StateMutability::{NonPayable, Pure, View};
    let bytes32 = || Type::fixed_bytes(32);
    let ty = match name {
        "keccak256" => FunctionType::builtin(K::Keccak256, vec![Type::bytes(DataLocation::Memory)], vec![bytes32()], Pure),
        "sha256" => FunctionType::builtin(K::Sha256, vec![Type::bytes(DataLocation::Memory)], vec![bytes32()], Pure),
        "ripemd160" => FunctionType::builtin(
            K::Ripemd160,
            vec![Type::bytes(DataLocation::Memory)],
            vec![Type::fixed_bytes(20)],
            Pure,
        ),
        "ecrecover" => FunctionType::builtin(
            K::EcRecover,
            vec![bytes32(), Type::uint(8), bytes32(), bytes32()],
            vec![Type::address()],
            Pure,
        ),
        "gasleft" => FunctionType::builtin(K::GasLeft, vec![], vec![Type::uint256()], View),
        "blockhash" => FunctionType::builtin(K::BlockHash, vec![Type::uint256()], vec![bytes32()], View),
        "addmod" => FunctionType::builtin(K::AddMod, vec![Type::uint256(); 3], vec![Type::uint256()], Pure),
        "mulmod" => FunctionType::builtin(K::MulMod, vec![Type::uint256(); 3], vec![Type::uint256()], Pure),
        "assert" => FunctionType::builtin(K::Assert, vec![Type::Bool], vec![], Pure),
        "require" => FunctionType::builtin(K::Require, vec![Type::Bool], vec![], Pure).with_arbitrary_parameters(),
        "revert" => FunctionType::builtin(K::Revert, vec![], vec![], Pure).with_arbitrary_parameters(),
        "selfdestruct" => FunctionType::builtin(K::SelfDestruct, vec![Type::address_payable()], vec![], NonPayable),
        "log0" | "log1" | "log2" | "log3" | "log4" => {
            let topics: u8 = name[3..].parse().ok()?;
            FunctionType::builtin(K::Log(topics), vec![bytes32(); usize::from(topics) + 1], vec![], NonPayable)
        }
        _ => return None,
    };
    Some(ty)
}
