//! Contract assembly.
//!
//! [`ContractCompiler`] turns the declarations of one contract and its
//! [`ContractSource`] into two code images:
//!
//! - **runtime code**: a selector dispatcher over the external interface,
//!   followed by the function bodies and accessors it reaches and the
//!   runtime helpers they use;
//! - **creation code**: the state variable initializers and the
//!   constructor, followed by copying the runtime code (with immutables
//!   written into it) to memory and returning it.
//!
//! Structural errors (unsupported constructs, stack too deep, storage too
//! large) are collected per function: the function's entry is replaced by
//! `INVALID` and compilation goes on. Internal errors abort the run.
//!
//! # Dispatch stubs
//!
//! ```text
//! [callvalue check]
//! params... := abi_decode_tuple(4, calldatasize())
//! results... := entry(params...)
//! return(pos, abi_encode_tuple(results..., pos) - pos)
//! ```

use std::rc::Rc;

use quill_core::ast::{ContractSource, LocalId};
use quill_core::env::{InterfaceEntry, InterfaceFunction};
use quill_core::{
    CompilationError, ContractId, ContractKind, DataLocation, FunctionDef, FunctionType, Span,
    StateMutability, Type, TypeEnv, VariableId, Visibility,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::accessor::compile_accessor;
use crate::asm::{Assembly, AssemblyItem, Instruction, Tag};
use crate::context::{CompilerContext, FREE_MEMORY_POINTER, GENERAL_MEMORY_START};
use crate::expr::ExprCompiler;
use crate::function::{compile_body, declare_zeroed};
use crate::helpers::abi::{abi_decode_tuple, abi_encode_tuple, in_memory};
use crate::helpers::code::*;
use crate::helpers::memory::{allocate_memory, allocate_unbounded};
use crate::lvalue::{LValue, storage_item};
use crate::settings::CompilerSettings;

type Result<T> = std::result::Result<T, CompilationError>;

/// Output of compiling one contract.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    /// Code run once at deployment; returns the runtime code. The runtime
    /// assembly is its first sub-assembly.
    pub creation: Assembly,
    /// Code stored at the contract's address.
    pub runtime: Rc<Assembly>,
    /// Structural errors, at most one per function.
    pub errors: Vec<CompilationError>,
}

impl CompiledContract {
    /// Whether every function compiled.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compiles the code images of one contract.
pub struct ContractCompiler<'env> {
    env: &'env TypeEnv,
    settings: CompilerSettings,
    contract: ContractId,
    compiled: FxHashMap<ContractId, Rc<Assembly>>,
    errors: Vec<CompilationError>,
}

impl<'env> ContractCompiler<'env> {
    /// Create a compiler for `contract`.
    pub fn new(env: &'env TypeEnv, settings: CompilerSettings, contract: ContractId) -> Self {
        Self {
            env,
            settings,
            contract,
            compiled: FxHashMap::default(),
            errors: Vec::new(),
        }
    }

    /// Creation code of contracts instantiated with `new`.
    pub fn with_compiled_contracts(mut self, compiled: FxHashMap<ContractId, Rc<Assembly>>) -> Self {
        self.compiled = compiled;
        self
    }

    /// Compile both code images.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn compile(mut self, source: &ContractSource<'_>) -> Result<CompiledContract> {
        let def = self.env.contract(self.contract);
        if def.kind == ContractKind::Interface {
            return Err(CompilationError::internal(format!("interface {} has no code", def.name)));
        }
        match self.env.contract_layout(self.contract) {
            Ok(layout) => debug!(contract = %def.name, slots = %layout.storage_size(), "laid out storage"),
            Err(error) => self.record(CompilationError::from(error))?,
        }

        let runtime = Rc::new(self.compile_runtime(source)?);
        let creation = self.compile_creation(source, Rc::clone(&runtime))?;
        debug!(
            contract = %def.name,
            runtime = runtime.len(),
            creation = creation.len(),
            errors = self.errors.len(),
            "compiled contract"
        );
        Ok(CompiledContract {
            creation,
            runtime,
            errors: self.errors,
        })
    }

    fn context(&self, creation: bool) -> CompilerContext<'env> {
        let mut ctx = CompilerContext::new(self.env, self.settings.clone(), Some(self.contract))
            .with_compiled_contracts(self.compiled.clone());
        ctx.set_creation(creation);
        ctx
    }

    /// Keep a structural error; internal errors end the run.
    fn record(&mut self, error: CompilationError) -> Result<()> {
        if error.is_internal() {
            return Err(error);
        }
        warn!(%error, "collected compilation error");
        self.errors.push(error);
        Ok(())
    }

    // =========================================================================
    // Runtime Code
    // =========================================================================

    fn compile_runtime(&mut self, source: &ContractSource<'_>) -> Result<Assembly> {
        let env = self.env;
        let mut ctx = self.context(false);
        ctx.exec(mstore(lit(FREE_MEMORY_POINTER), lit(GENERAL_MEMORY_START)))?;

        let interface = env.interface_functions(self.contract);
        let stubs: Vec<Tag> = interface.iter().map(|_| ctx.new_tag()).collect();
        let fallback = ctx.new_tag();
        if !interface.is_empty() {
            ctx.eval(&lt(calldatasize(), lit(4u32)))?;
            ctx.jump_if(fallback);
            let selector = ctx.let_(shr(lit(224u32), calldataload(lit(0u32))))?;
            for (entry, stub) in interface.iter().zip(&stubs) {
                ctx.eval(&eq(slot(selector), lit(entry.selector)))?;
                ctx.jump_if(*stub);
            }
            ctx.pop(1);
        }
        ctx.place_tag(fallback);
        if env.contract(self.contract).receives_ether {
            ctx.if_(iszero(calldatasize()), |ctx| {
                ctx.op(Instruction::Stop);
                Ok(())
            })?;
        }
        ctx.exec(revert(lit(0u32), lit(0u32)))?;

        let mut accessors = Vec::new();
        for (entry, stub) in interface.iter().zip(stubs) {
            ctx.place_tag(stub);
            ctx.set_stack_height(1);
            ctx.pop(1);
            if let Err(error) = self.dispatch(&mut ctx, entry, &mut accessors) {
                self.record(error)?;
                ctx.set_stack_height(0);
                ctx.op(Instruction::Invalid);
            }
        }

        for (variable, tag) in accessors {
            let height = FunctionType::for_getter(env, variable).params.len() + 1;
            if let Err(error) = ctx.function_body(tag, height, |ctx| compile_accessor(ctx, variable)) {
                self.record(error)?;
            }
        }
        self.compile_queued(&mut ctx, source)?;
        Ok(ctx.finish())
    }

    /// Decode the arguments of `entry`, call it and return its encoded results.
    fn dispatch(
        &self,
        ctx: &mut CompilerContext<'env>,
        entry: &InterfaceFunction,
        accessors: &mut Vec<(VariableId, Tag)>,
    ) -> Result<()> {
        let env = self.env;
        let (params, returns, payable, target) = match entry.entry {
            InterfaceEntry::Function(function) => {
                let def = env.function(function);
                (
                    parameter_types(def),
                    def.returns.iter().map(|p| p.ty.clone()).collect::<Vec<_>>(),
                    def.mutability == StateMutability::Payable,
                    ctx.function_entry_label(function),
                )
            }
            InterfaceEntry::Getter(variable) => {
                let getter = FunctionType::for_getter(env, variable);
                let tag = ctx.new_tag();
                accessors.push((variable, tag));
                (getter.params, getter.returns, false, tag)
            }
        };
        if !payable {
            ctx.revert_if(op(Instruction::CallValue, []))?;
        }

        let param_words: usize = params.iter().map(|ty| ty.size_on_stack(env)).sum();
        let decode = abi_decode_tuple(ctx, &params, false)?;
        ctx.call_with(decode, [lit(4u32), calldatasize()], param_words)?;

        let return_words: usize = returns.iter().map(|ty| ty.size_on_stack(env)).sum();
        ctx.call_helper(target, param_words, return_words)?;

        let encoded = returns
            .iter()
            .map(|ty| {
                ty.encoding_type(env).map(|encoded| in_memory(&encoded)).ok_or_else(|| {
                    CompilationError::unimplemented(format!("ABI encoding of {}", ty.name(env)), Span::default())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let encode = abi_encode_tuple(ctx, &returns, &encoded)?;
        let pos = ctx.let_(allocate_unbounded())?;
        let args = (0..return_words).map(slot).chain([slot(pos)]);
        let end = ctx.call_with(encode, args, 1)?[0];
        ctx.exec(return_(slot(pos), sub(slot(end), slot(pos))))?;
        debug!(signature = %entry.signature, selector = format_args!("{:#010x}", entry.selector), "dispatch stub");
        Ok(())
    }

    /// Compile every function whose entry tag was handed out, including
    /// those first referenced by bodies compiled here.
    fn compile_queued(&mut self, ctx: &mut CompilerContext<'env>, source: &ContractSource<'_>) -> Result<()> {
        let env = self.env;
        while let Some(function) = ctx.next_queued_function() {
            let def = env.function(function);
            let tag = ctx.function_entry_label(function);
            let height = 1 + parameter_types(def)
                .iter()
                .map(|ty| ty.size_on_stack(env))
                .sum::<usize>();
            let result = ctx.function_body(tag, height, |ctx| {
                let body = source.body(function).ok_or_else(|| {
                    CompilationError::unimplemented(format!("function {} has no body", display_name(def)), Span::default())
                })?;
                compile_body(ctx, body)
            });
            match result {
                Ok(()) => debug!(function = %display_name(def), %tag, creation = ctx.is_creation(), "compiled function"),
                Err(error) => self.record(error)?,
            }
        }
        Ok(())
    }

    // =========================================================================
    // Creation Code
    // =========================================================================

    fn compile_creation(&mut self, source: &ContractSource<'_>, runtime: Rc<Assembly>) -> Result<Assembly> {
        let env = self.env;
        let mut ctx = self.context(true);
        let immutables = env.immutables_of(self.contract);
        for variable in &immutables {
            ctx.reserve_immutable(*variable);
        }
        let memory_start = ctx.reserved_memory_end();
        ctx.exec(mstore(lit(FREE_MEMORY_POINTER), lit(memory_start)))?;

        let constructor = env.constructor_of(self.contract);
        let payable = constructor.is_some_and(|c| env.function(c).mutability == StateMutability::Payable);
        if !payable {
            ctx.revert_if(op(Instruction::CallValue, []))?;
        }

        // 1. State variable initializers
        let initializers = ctx.new_tag();
        ctx.call_helper(initializers, 0, 0)?;

        // 2. Constructor, arguments appended to the creation code
        if let Some(constructor) = constructor {
            let entry = ctx.function_entry_label(constructor);
            let params = parameter_types(env.function(constructor));
            if params.is_empty() {
                ctx.call_helper(entry, 0, 0)?;
            } else {
                let words: usize = params.iter().map(|ty| ty.size_on_stack(env)).sum();
                ctx.append(AssemblyItem::PushProgramSize);
                let program_size = ctx.stack_height() - 1;
                let size = ctx.let_(sub(op(Instruction::CodeSize, []), slot(program_size)))?;
                let allocate = allocate_memory(&mut ctx)?;
                let pos = ctx.let_(call(allocate, [slot(size)]))?;
                ctx.exec(codecopy(slot(pos), slot(program_size), slot(size)))?;
                let decode = abi_decode_tuple(&mut ctx, &params, true)?;
                ctx.call_with(decode, [slot(pos), add(slot(pos), slot(size))], words)?;
                ctx.call_helper(entry, words, 0)?;
                ctx.pop(3);
            }
        }

        // 3. Runtime code with immutables filled in
        let sub_id = ctx.add_sub(runtime);
        ctx.append(AssemblyItem::PushSubSize(sub_id));
        let size = ctx.stack_height() - 1;
        let pos = ctx.let_(allocate_unbounded())?;
        ctx.append(AssemblyItem::PushSub(sub_id));
        let offset = ctx.stack_height() - 1;
        ctx.exec(codecopy(slot(pos), slot(offset), slot(size)))?;
        for variable in &immutables {
            let word = ctx.immutable_offset(*variable).ok_or_else(|| {
                CompilationError::internal(format!("no memory reserved for {}", env.variable(*variable).name))
            })?;
            ctx.eval(&mload(lit(word)))?;
            ctx.dup_slot(pos)?;
            ctx.append(AssemblyItem::AssignImmutable(*variable));
        }
        ctx.exec(return_(slot(pos), slot(size)))?;

        if let Err(error) = ctx.function_body(initializers, 1, |ctx| {
            compile_initializers(ctx, source)?;
            ctx.helper_return(&[])
        }) {
            self.record(error)?;
        }
        self.compile_queued(&mut ctx, source)?;
        Ok(ctx.finish())
    }
}

/// Run the state variable initializers in order.
fn compile_initializers(ctx: &mut CompilerContext<'_>, source: &ContractSource<'_>) -> Result<()> {
    let env = ctx.env();
    for (index, decl) in source.initializer_locals.iter().enumerate() {
        declare_zeroed(ctx, LocalId(index as u32), env.ty(decl.ty))?;
    }
    for (variable, value) in &source.initializers {
        let def = env.variable(*variable);
        let from = env.ty(value.ty);
        let lvalue = if def.immutable {
            LValue::Immutable {
                variable: *variable,
                ty: def.ty.clone(),
            }
        } else {
            storage_item(&def.ty)
        };
        let source_type = if lvalue.copies_into_storage() {
            from.mobile_type(env).unwrap_or_else(|| from.clone())
        } else {
            def.ty.clone()
        };
        ExprCompiler::new(ctx).compile_to(value, &source_type).map_err(|e| e.at(value.span))?;
        if !def.immutable {
            let scope = ctx.scope().unwrap_or(def.contract);
            let layout = env.contract_layout(scope)?;
            let position = layout
                .slot_of(*variable)
                .ok_or_else(|| CompilationError::internal(format!("{} has no storage slot", def.name)))?;
            ctx.push(position.slot.clone());
            ctx.push(position.offset);
        }
        lvalue.store_value(ctx, &source_type, true)?;
        debug!(variable = %def.name, "compiled initializer");
    }
    Ok(())
}

/// Parameter types as seen by the body: reference parameters of external
/// functions stay in calldata.
fn parameter_types(def: &FunctionDef) -> Vec<Type> {
    def.params
        .iter()
        .map(|p| {
            if def.visibility == Visibility::External && p.ty.is_reference_type() {
                p.ty.with_location(DataLocation::CallData, true)
            } else {
                p.ty.clone()
            }
        })
        .collect()
}

fn display_name(def: &FunctionDef) -> &str {
    if def.is_constructor { "constructor" } else { &def.name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use quill_core::ast::{AssignOp, AstBuilder, BinaryOp, Stmt};
    use quill_core::{FunctionId, Param};

    fn function(env: &mut TypeEnv, c: ContractId, name: &str, params: Vec<Param>, returns: Vec<Param>) -> FunctionId {
        env.add_function(FunctionDef {
            name: name.into(),
            contract: Some(c),
            params,
            returns,
            visibility: Visibility::Public,
            mutability: StateMutability::NonPayable,
            is_constructor: false,
        })
    }

    #[test]
    fn dispatcher_compares_every_selector() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let c = env.add_contract("Counter", ContractKind::Contract, &[]);
        let count = env.add_state_variable(c, "count", Type::uint256(), Visibility::Public, false);
        let inc = function(&mut env, c, "inc", vec![], vec![]);
        let body = AstBuilder::new(&arena, &mut env, Some(c))
            .function_body(inc, |b, _, _| {
                let target = b.state_variable(count);
                let one = b.number("1")?;
                let add = b.assign(target, AssignOp::Compound(BinaryOp::Add), one)?;
                Ok(vec![Stmt::Expr(add)])
            })
            .unwrap();
        let source = ContractSource {
            functions: vec![body],
            ..ContractSource::default()
        };
        let compiled = ContractCompiler::new(&env, CompilerSettings::default(), c)
            .compile(&source)
            .unwrap();
        assert!(compiled.is_success(), "{:?}", compiled.errors);
        assert_eq!(compiled.runtime.count_op(Instruction::Eq), 2);
        assert!(compiled.runtime.count_op(Instruction::SStore) >= 1);
        assert_eq!(compiled.creation.subs().len(), 1);
    }

    #[test]
    fn missing_body_is_collected() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        function(&mut env, c, "f", vec![], vec![Param::new("", Type::uint256())]);
        let compiled = ContractCompiler::new(&env, CompilerSettings::default(), c)
            .compile(&ContractSource::default())
            .unwrap();
        assert_eq!(compiled.errors.len(), 1);
        assert!(matches!(compiled.errors[0], CompilationError::Unimplemented { .. }));
        assert!(compiled.runtime.count_op(Instruction::Invalid) >= 1);
    }

    #[test]
    fn immutables_are_assigned_into_the_runtime_image() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let owner = env.add_state_variable(c, "owner", Type::address(), Visibility::Public, true);
        let mut builder = AstBuilder::new(&arena, &mut env, Some(c));
        let sender = builder.magic(quill_core::MagicKind::Message);
        let sender = builder.member(sender, "sender").unwrap();
        let source = ContractSource {
            initializers: vec![(owner, sender)],
            initializer_locals: builder.take_locals(),
            ..ContractSource::default()
        };
        let compiled = ContractCompiler::new(&env, CompilerSettings::default(), c)
            .compile(&source)
            .unwrap();
        assert!(compiled.is_success(), "{:?}", compiled.errors);
        assert!(
            compiled
                .creation
                .items()
                .contains(&AssemblyItem::AssignImmutable(owner))
        );
        assert!(compiled.runtime.items().contains(&AssemblyItem::PushImmutable(owner)));
    }

    #[test]
    fn constructor_arguments_are_decoded_from_the_code_tail() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let value = env.add_state_variable(c, "value", Type::uint256(), Visibility::Internal, false);
        let constructor = env.add_function(FunctionDef {
            name: String::new(),
            contract: Some(c),
            params: vec![Param::new("v", Type::uint256())],
            returns: vec![],
            visibility: Visibility::Public,
            mutability: StateMutability::NonPayable,
            is_constructor: true,
        });
        let body = AstBuilder::new(&arena, &mut env, Some(c))
            .function_body(constructor, |b, params, _| {
                let target = b.state_variable(value);
                let v = b.local(params[0]);
                Ok(vec![Stmt::Expr(b.assign(target, AssignOp::Assign, v)?)])
            })
            .unwrap();
        let source = ContractSource {
            functions: vec![body],
            ..ContractSource::default()
        };
        let compiled = ContractCompiler::new(&env, CompilerSettings::default(), c)
            .compile(&source)
            .unwrap();
        assert!(compiled.is_success(), "{:?}", compiled.errors);
        assert!(compiled.creation.items().contains(&AssemblyItem::PushProgramSize));
        assert!(compiled.creation.count_op(Instruction::CodeCopy) >= 2);
    }

    #[test]
    fn interfaces_have_no_code() {
        let mut env = TypeEnv::new();
        let i = env.add_contract("I", ContractKind::Interface, &[]);
        let err = ContractCompiler::new(&env, CompilerSettings::default(), i)
            .compile(&ContractSource::default())
            .unwrap_err();
        assert!(err.is_internal());
    }
}
