//! Module objects.

use crate::context::Context;
use crate::handles::Handle;
use crate::heap::Header;
use crate::objects::hash_tables::HashTable;
use crate::objects::strings::{Symbol, TiroString};
use crate::objects::tuples::Tuple;
use crate::objects::{alloc_fixed, heap_object};
use crate::value::{TypedValue, Value, ValueType};

#[repr(C)]
pub struct ModuleData {
    header: Header,
    name: Value,
    members: Value,
    exported: Value,
    init: Value,
}

heap_object!(
    /// A loaded module: name, member tuple, exported table and optional init
    /// function. The exported table holds copies of the resolved member
    /// values and is populated after init has run.
    Module,
    Module,
    ModuleData
);

impl Module {
    pub fn make(
        ctx: &mut Context,
        name: Handle<TiroString>,
        members: Handle<Tuple>,
        exported: Handle<HashTable>,
    ) -> Module {
        let data = alloc_fixed::<ModuleData>(ctx, ValueType::Module);
        unsafe {
            (*data).name = name.value();
            (*data).members = members.value();
            (*data).exported = exported.value();
        }
        Module(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub fn members(self) -> Tuple {
        Tuple::from_value_unchecked(unsafe { (*self.data()).members })
    }

    pub fn exported(self) -> HashTable {
        HashTable::from_value_unchecked(unsafe { (*self.data()).exported })
    }

    /// The init function, or null.
    pub fn init(self) -> Value {
        unsafe { (*self.data()).init }
    }

    pub fn set_init(self, init: Value) {
        unsafe { (*self.data()).init = init };
    }

    /// Looks up an exported member.
    pub fn exported_member(self, name: Symbol) -> Option<Value> {
        self.exported().get(name.value())
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).name);
            visit((*self.data()).members);
            visit((*self.data()).exported);
            visit((*self.data()).init);
        }
    }
}
