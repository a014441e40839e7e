//! Construction of native modules.
//!
//! Native modules (like the builtin `std`) expose native functions as module
//! members. The builder collects members into a table that becomes the
//! module's export surface; there is no bytecode and no init function.

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::{Global, Handle, Scope};
use crate::objects::hash_tables::HashTable;
use crate::objects::modules::Module;
use crate::objects::native::{
    NativeAsyncFunction, NativeAsyncFunctionPtr, NativeFunction, NativeFunctionPtr,
};
use crate::objects::tuples::Tuple;
use crate::value::{TypedValue, Value};

pub struct ModuleBuilder {
    name: Global<crate::objects::strings::TiroString>,
    members: Global<HashTable>,
}

impl ModuleBuilder {
    pub fn new(ctx: &mut Context, name: &str) -> ModuleBuilder {
        let scope = Scope::new(ctx);
        let name_string = scope.local(ctx.get_interned_string(name));
        let members = HashTable::make(ctx);
        ModuleBuilder {
            name: Global::new(ctx, name_string.get()),
            members: Global::new(ctx, members),
        }
    }

    /// Adds an arbitrary value member. Fails on duplicate names.
    pub fn add_member(
        &mut self,
        ctx: &mut Context,
        name: &str,
        member: Handle<Value>,
    ) -> Result<&mut Self, RuntimeError> {
        let scope = Scope::new(ctx);
        let symbol = scope.local(ctx.get_symbol(name));

        if self.members.get().contains(symbol.value()) {
            return Err(RuntimeError::module_load(format!(
                "Module member {name} defined twice."
            )));
        }

        HashTable::set(self.members.handle(), ctx, symbol.handle().erased(), member);
        Ok(self)
    }

    /// Adds a synchronous native function.
    pub fn add_function(
        &mut self,
        ctx: &mut Context,
        name: &str,
        params: u32,
        values: Handle<Value>,
        func: NativeFunctionPtr,
    ) -> Result<&mut Self, RuntimeError> {
        let scope = Scope::new(ctx);
        let func_name = scope.local(ctx.get_interned_string(name));
        let function = scope
            .local(NativeFunction::make(ctx, func_name.handle(), values, params, func).value());
        self.add_member(ctx, name, function.handle())
    }

    /// Adds an asynchronous native function.
    pub fn add_async_function(
        &mut self,
        ctx: &mut Context,
        name: &str,
        params: u32,
        values: Handle<Value>,
        func: NativeAsyncFunctionPtr,
    ) -> Result<&mut Self, RuntimeError> {
        let scope = Scope::new(ctx);
        let func_name = scope.local(ctx.get_interned_string(name));
        let function = scope.local(
            NativeAsyncFunction::make(ctx, func_name.handle(), values, params, func).value(),
        );
        self.add_member(ctx, name, function.handle())
    }

    /// Finishes the module.
    pub fn build(self, ctx: &mut Context) -> Module {
        let scope = Scope::new(ctx);
        let members_tuple = scope.local(Tuple::make(ctx, 0));
        let name = scope.local(self.name.get());
        let exported = scope.local(self.members.get());
        Module::make(ctx, name.handle(), members_tuple.handle(), exported.handle())
    }
}
