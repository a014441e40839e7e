//! Methods and dynamic objects.

use crate::context::Context;
use crate::handles::{Handle, Scope};
use crate::heap::Header;
use crate::objects::arrays::Array;
use crate::objects::hash_tables::HashTable;
use crate::objects::strings::Symbol;
use crate::objects::{alloc_fixed, heap_object};
use crate::value::{TypedValue, Value, ValueType};

#[repr(C)]
pub struct MethodData {
    header: Header,
    function: Value,
}

heap_object!(
    /// Wraps a function for a type-level method table. The method wrapper is
    /// what tells `LoadMethod` to pass the receiver as the first argument.
    Method,
    Method,
    MethodData
);

impl Method {
    pub fn make(ctx: &mut Context, function: Handle<Value>) -> Method {
        let data = alloc_fixed::<MethodData>(ctx, ValueType::Method);
        unsafe { (*data).function = function.value() };
        Method(Value::from_heap(data as *mut Header))
    }

    pub fn function(self) -> Value {
        unsafe { (*self.data()).function }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).function });
    }
}

#[repr(C)]
pub struct DynamicObjectData {
    header: Header,
    properties: Value,
}

heap_object!(
    /// An object with a free-form symbol-keyed property table. Storing null
    /// removes the property.
    DynamicObject,
    DynamicObject,
    DynamicObjectData
);

impl DynamicObject {
    pub fn make(ctx: &mut Context) -> DynamicObject {
        let scope = Scope::new(ctx);
        let object = {
            let data = alloc_fixed::<DynamicObjectData>(ctx, ValueType::DynamicObject);
            scope.local(DynamicObject(Value::from_heap(data as *mut Header)))
        };
        let properties = HashTable::make(ctx);
        unsafe { (*object.get().data()).properties = properties.value() };
        object.get()
    }

    fn properties(self) -> HashTable {
        HashTable::from_value_unchecked(unsafe { (*self.data()).properties })
    }

    pub fn get(self, name: Symbol) -> Value {
        self.properties().get(name.value()).unwrap_or(Value::null())
    }

    pub fn set(
        this: Handle<DynamicObject>,
        ctx: &mut Context,
        name: Handle<Symbol>,
        value: Handle<Value>,
    ) {
        if value.value().is_null() {
            this.get().properties().remove(name.value());
            return;
        }

        let scope = Scope::new(ctx);
        let table = scope.local(this.get().properties());
        HashTable::set(table.handle(), ctx, name.erased(), value);
    }

    /// Returns an array of the property symbols.
    pub fn names(this: Handle<DynamicObject>, ctx: &mut Context) -> Array {
        let scope = Scope::new(ctx);
        let array = scope.local(Array::make(ctx));
        let mut cursor = 0;
        loop {
            let table = this.get().properties();
            let Some((key, _)) = HashTable::iterate_storage(table.entries_for_iteration(), &mut cursor)
            else {
                break;
            };
            let key = scope.local(key);
            Array::push(array.handle(), ctx, key.handle());
        }
        array.get()
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).properties });
    }
}
