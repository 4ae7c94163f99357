//! Accessors of public state variables.
//!
//! The accessor of a variable takes one argument per mapping level (the
//! key) and per non-byte array level (a `uint256` index) and returns the
//! value found there. Structs are returned member-wise, leaving out
//! mappings and non-byte arrays.
//!
//! Accessors follow the internal calling convention: the body starts with
//! the return label in slot 0 and the arguments in slots `1..=n`.

use quill_core::{CompilationError, DataLocation, FunctionType, Span, Type, VariableId};
use tracing::debug;

use crate::context::CompilerContext;
use crate::helpers::code::*;
use crate::helpers::convert::convert_type;
use crate::helpers::storage::{mapping_index_access, storage_array_index_access};
use crate::lvalue::{LValue, storage_item};

type Result<T> = std::result::Result<T, CompilationError>;

/// Most stack words an accessor may return.
pub const MAX_RETURN_SLOTS: usize = 15;

/// Whether a struct member is left out of an accessor's results.
fn skipped_member(ty: &Type) -> bool {
    matches!(ty, Type::Mapping(_)) || matches!(ty, Type::Array(array) if !array.is_byte_array())
}

/// Emit the body of the accessor of `variable` at the current position.
/// The stack must hold exactly the return label and the arguments.
pub fn compile_accessor(ctx: &mut CompilerContext<'_>, variable: VariableId) -> Result<()> {
    let env = ctx.env();
    let def = env.variable(variable);
    let getter = FunctionType::for_getter(env, variable);

    let return_slots: usize = getter.returns.iter().map(|ty| ty.size_on_stack(env)).sum();
    if return_slots > MAX_RETURN_SLOTS {
        return Err(CompilationError::stack_too_deep(
            format!("accessor of {} returns {return_slots} stack slots", def.name),
            Span::default(),
        ));
    }
    if ctx.stack_height() != getter.params.len() + 1 {
        return Err(CompilationError::internal(format!(
            "accessor of {} entered at stack height {}",
            def.name,
            ctx.stack_height()
        )));
    }

    if def.immutable {
        LValue::Immutable {
            variable,
            ty: def.ty.clone(),
        }
        .retrieve_value(ctx, true)?;
        let result = ctx.stack_height() - 1;
        debug!(variable = %def.name, "compiled immutable accessor");
        return ctx.helper_return(&[result]);
    }

    let contract = ctx.scope().unwrap_or(def.contract);
    let layout = env.contract_layout(contract)?;
    let position = layout
        .slot_of(variable)
        .ok_or_else(|| CompilationError::internal(format!("{} has no storage slot", def.name)))?;
    let location = ctx.let_(lit(position.slot.clone()))?;
    let offset = ctx.let_(lit(position.offset))?;

    let mut ty = def.ty.clone();
    let mut argument = 1;
    loop {
        match &ty {
            Type::Mapping(mapping) => {
                let key = getter
                    .params
                    .get(argument - 1)
                    .ok_or_else(|| CompilationError::internal("accessor key count mismatch"))?;
                let access = mapping_index_access(ctx, &ty, key)?;
                ctx.assign(location, call(access, [slot(location), slot(argument)]))?;
                ctx.assign(offset, lit(0u32))?;
                ty = (*mapping.value).clone();
            }
            Type::Array(array) if !array.is_byte_array() => {
                let access = storage_array_index_access(ctx, &ty)?;
                let element = ctx.call_with(access, [slot(location), slot(argument)], 2)?;
                ctx.assign(location, slot(element[0]))?;
                ctx.assign(offset, slot(element[1]))?;
                ctx.pop(2);
                ty = (*array.base).clone();
            }
            _ => break,
        }
        argument += 1;
    }

    let mut results = Vec::new();
    match &ty {
        Type::Struct(s) => {
            let offsets = env.struct_layout(s.id)?;
            let members = env.struct_member_types(s.id, DataLocation::Storage);
            for (index, (_, member)) in members.iter().enumerate() {
                if skipped_member(member) {
                    continue;
                }
                let (member_slot, member_offset) = offsets
                    .offset(index)
                    .ok_or_else(|| CompilationError::internal("struct layout shorter than its members"))?;
                ctx.eval(&add(slot(location), lit(member_slot.clone())))?;
                ctx.push(member_offset);
                read_returned(ctx, member, &mut results)?;
            }
        }
        _ => {
            ctx.dup_slot(location)?;
            ctx.dup_slot(offset)?;
            read_returned(ctx, &ty, &mut results)?;
        }
    }
    debug!(
        variable = %def.name,
        params = getter.params.len(),
        returns = results.len(),
        "compiled accessor"
    );
    ctx.helper_return(&results)
}

/// Read the storage value whose `slot, offset` are on top of the stack,
/// copying reference types to memory, and record the slots it occupies.
fn read_returned(ctx: &mut CompilerContext<'_>, ty: &Type, results: &mut Vec<usize>) -> Result<()> {
    storage_item(ty).retrieve_value(ctx, true)?;
    if ty.is_reference_type() {
        convert_type(ctx, ty, &ty.with_location(DataLocation::Memory, true))?;
    }
    let size = ty.size_on_stack(ctx.env());
    let height = ctx.stack_height();
    results.extend(height - size..height);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Instruction;
    use crate::settings::CompilerSettings;
    use quill_core::{ContractKind, TypeEnv, Visibility};

    fn frame<'env>(env: &'env TypeEnv, contract: quill_core::ContractId, variable: VariableId) -> CompilerContext<'env> {
        let mut ctx = CompilerContext::new(env, CompilerSettings::default(), Some(contract));
        let params = FunctionType::for_getter(env, variable).params.len();
        ctx.set_stack_height(params + 1);
        ctx
    }

    #[test]
    fn scalar_accessor_reads_its_slot() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let x = env.add_state_variable(c, "x", Type::uint256(), Visibility::Public, false);
        let mut ctx = frame(&env, c, x);
        compile_accessor(&mut ctx, x).unwrap();
        assert!(ctx.helpers().contains("read_from_storage_t_uint256"));
        let asm = ctx.finish();
        assert!(asm.count_op(Instruction::SLoad) >= 1);
    }

    #[test]
    fn mapping_accessor_hashes_the_key() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let balances = env.add_state_variable(
            c,
            "balances",
            Type::mapping(Type::address(), Type::uint256()),
            Visibility::Public,
            false,
        );
        let mut ctx = frame(&env, c, balances);
        compile_accessor(&mut ctx, balances).unwrap();
        assert!(
            ctx.helpers()
                .iter()
                .any(|h| h.name.starts_with("mapping_index_access_") && h.name.ends_with("_of_t_address"))
        );
    }

    #[test]
    fn array_accessor_is_bounds_checked() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let values = env.add_state_variable(
            c,
            "values",
            Type::array(Type::uint(8), None, DataLocation::Storage),
            Visibility::Public,
            false,
        );
        let mut ctx = frame(&env, c, values);
        compile_accessor(&mut ctx, values).unwrap();
        assert!(ctx.helpers().iter().any(|h| h.name.starts_with("storage_array_index_access_")));
        assert!(ctx.helpers().contains("panic_error_0x32"));
    }

    #[test]
    fn struct_accessor_skips_mappings_and_arrays() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let s = env.add_struct(
            "S",
            Some(c),
            vec![
                ("a".into(), Type::uint(8)),
                ("m".into(), Type::mapping(Type::uint256(), Type::uint256())),
                ("b".into(), Type::Bool),
                ("list".into(), Type::array(Type::uint256(), None, DataLocation::Storage)),
                ("name".into(), Type::string(DataLocation::Storage)),
            ],
        );
        let v = env.add_state_variable(c, "v", Type::struct_type(s, DataLocation::Storage), Visibility::Public, false);
        assert_eq!(FunctionType::for_getter(&env, v).returns.len(), 3);
        let mut ctx = frame(&env, c, v);
        compile_accessor(&mut ctx, v).unwrap();
        assert!(ctx.helpers().iter().any(|h| h.name.starts_with("copy_array_to_memory_")));
    }

    #[test]
    fn too_many_returned_members_is_stack_too_deep() {
        let mut env = TypeEnv::new();
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        let members = (0..16).map(|i| (format!("f{i}"), Type::uint256())).collect();
        let s = env.add_struct("Wide", Some(c), members);
        let v = env.add_state_variable(c, "wide", Type::struct_type(s, DataLocation::Storage), Visibility::Public, false);
        let mut ctx = frame(&env, c, v);
        let err = compile_accessor(&mut ctx, v).unwrap_err();
        assert!(matches!(err, CompilationError::StackTooDeep { .. }));
    }
}
