//! Materialises compiled modules into runtime objects.
//!
//! Members are visited in order; a member may only refer to members that
//! precede it, which the compiled form guarantees (and the validation in
//! `tiro-core` has already checked). After all members exist the init
//! function runs eagerly, and only then is the export table populated: the
//! exported values are copies of the resolved member values, which is sound
//! because exports are constant after init.

use tiro_core::{
    CompiledModule, FunctionKind, MemberId, ModuleMember, MAX_MODULE_MEMBERS,
};

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::{Handle, Local, Scope};
use crate::objects::functions::{Code, Function, FunctionTemplate};
use crate::objects::hash_tables::HashTable;
use crate::objects::modules::Module;
use crate::objects::strings::{Symbol, TiroString};
use crate::objects::tuples::Tuple;
use crate::value::{TypedValue, Value};

pub(crate) fn load_module(
    ctx: &mut Context,
    compiled: &CompiledModule,
) -> Result<Module, RuntimeError> {
    if compiled.name().is_empty() {
        return Err(RuntimeError::module_load("Module definition without a valid module name."));
    }
    if compiled.members().len() > MAX_MODULE_MEMBERS {
        return Err(RuntimeError::module_load("Module definition is too large."));
    }

    tracing::trace!(
        target: "tiro::loader",
        module = compiled.name(),
        members = compiled.members().len(),
        "loading module"
    );

    let scope = Scope::new(ctx);

    let name = scope.local(ctx.get_interned_string(compiled.name()));
    let members = scope.local(Tuple::make(ctx, compiled.members().len()));
    let exported = scope.local(HashTable::make(ctx));
    let module =
        scope.local(Module::make(ctx, name.handle(), members.handle(), exported.handle()));

    for (index, member) in compiled.members().iter().enumerate() {
        let value = materialise_member(ctx, &scope, compiled, module.handle(), member, index)?;
        members.get().set(index, value);
    }

    if let Some(init_id) = compiled.init() {
        let init = member_value(members.handle(), compiled, init_id)?;
        module.get().set_init(init);
    }

    // Init runs before the exports are copied; exported values must be
    // resolved by the time they are snapshotted into the table.
    {
        let init = scope.local(module.get().init());
        if !init.value().is_null() {
            ctx.run(init.handle())?;
        }
    }

    for &(symbol_id, value_id) in compiled.exports() {
        create_export(ctx, &scope, compiled, members.handle(), exported.handle(), symbol_id, value_id)?;
    }

    Ok(module.get())
}

fn materialise_member(
    ctx: &mut Context,
    scope: &Scope,
    compiled: &CompiledModule,
    module: Handle<Module>,
    member: &ModuleMember,
    index: usize,
) -> Result<Value, RuntimeError> {
    match member {
        ModuleMember::Integer(value) => Ok(ctx.get_integer(*value)),
        ModuleMember::Float(value) => {
            Ok(crate::objects::primitives::Float::make(ctx, *value).value())
        }
        ModuleMember::String(value) => Ok(ctx.get_interned_string(value).value()),
        ModuleMember::Symbol { name } => {
            let name = member_string(module, compiled, *name)?;
            let name = scope.local(name);
            Ok(ctx.get_symbol_for(name.handle()).value())
        }
        ModuleMember::Import { module_name } => {
            let name = member_string(module, compiled, *module_name)?;
            let name = name.as_str().to_string();
            match ctx.find_module(&name) {
                Some(imported) => Ok(imported.value()),
                None => Err(RuntimeError::module_load(format!(
                    "Failed to import module {name}: the module was not found."
                ))),
            }
        }
        ModuleMember::Variable => Ok(ctx.get_undefined()),
        ModuleMember::Function { id } => {
            let function = compiled.function(*id).ok_or_else(|| {
                RuntimeError::module_load(format!(
                    "Module member at index {index} refers to an invalid function."
                ))
            })?;

            let name = match function.name {
                Some(name_id) => {
                    let name = member_string(module, compiled, name_id)?;
                    scope.local(name)
                }
                None => scope.local(ctx.get_interned_string("<UNNAMED>")),
            };

            let code = scope.local(Code::make(ctx, &function.code));
            let template = scope.local(FunctionTemplate::make(
                ctx,
                name.handle(),
                module,
                function.params,
                function.locals,
                code.handle(),
            ));

            match function.kind {
                FunctionKind::Normal => {
                    let no_environment = scope.local(Value::null());
                    Ok(Function::make(ctx, template.handle(), no_environment.handle()).value())
                }
                // Closure templates are paired with their environment at run
                // time by MkClosure.
                FunctionKind::Closure => Ok(template.value()),
            }
        }
    }
}

fn member_value(
    members: Handle<Tuple>,
    compiled: &CompiledModule,
    id: MemberId,
) -> Result<Value, RuntimeError> {
    if (id.0 as usize) >= compiled.members().len() {
        return Err(RuntimeError::module_load(format!(
            "Module member {} is out of bounds.",
            id.0
        )));
    }
    Ok(members.get().get(id.0 as usize))
}

// Reads an already materialised member that must be a string. Member
// references are forward-only, so the referenced slot is filled in.
fn member_string(
    module: Handle<Module>,
    compiled: &CompiledModule,
    id: MemberId,
) -> Result<TiroString, RuntimeError> {
    let members = module.get().members();
    if (id.0 as usize) >= compiled.members().len() {
        return Err(RuntimeError::module_load(format!(
            "Module member {} is out of bounds.",
            id.0
        )));
    }
    let value = members.get(id.0 as usize);
    TiroString::try_from_value(value).ok_or_else(|| {
        RuntimeError::module_load(format!("Module member at index {} is not a string.", id.0))
    })
}

fn create_export(
    ctx: &mut Context,
    scope: &Scope,
    compiled: &CompiledModule,
    members: Handle<Tuple>,
    exported: Handle<HashTable>,
    symbol_id: MemberId,
    value_id: MemberId,
) -> Result<(), RuntimeError> {
    let symbol = member_value(members, compiled, symbol_id)?;
    if !symbol.is::<Symbol>() {
        return Err(RuntimeError::module_load(format!(
            "Module member at index {} used as export name is not a symbol.",
            symbol_id.0
        )));
    }

    if exported.get().contains(symbol) {
        return Err(RuntimeError::module_load(format!(
            "The name '{}' is exported more than once.",
            Symbol::from_value_unchecked(symbol).name().as_str()
        )));
    }

    let symbol: Local<'_, Value> = scope.local(symbol);
    let value = scope.local(member_value(members, compiled, value_id)?);
    HashTable::set(exported, ctx, symbol.handle(), value.handle());
    Ok(())
}
