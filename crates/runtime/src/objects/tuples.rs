//! Fixed-length tuples.

use crate::context::Context;
use crate::heap::Header;
use crate::objects::{alloc_varsize, heap_object};
use crate::value::{Value, ValueType};

#[repr(C)]
pub struct TupleData {
    header: Header,
    size: usize,
    values: [Value; 0],
}

heap_object!(
    /// A value array whose length is frozen at allocation. Slots start out
    /// null.
    Tuple,
    Tuple,
    TupleData
);

impl Tuple {
    pub fn make(ctx: &mut Context, size: usize) -> Tuple {
        let data = alloc_varsize::<TupleData>(ctx, ValueType::Tuple, size * size_of::<Value>());
        unsafe { (*data).size = size };
        Tuple(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    fn slots(self) -> *mut Value {
        unsafe { (*self.data()).values.as_mut_ptr() }
    }

    pub fn get(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) }
    }

    pub fn set(self, index: usize, value: Value) {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) = value };
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<TupleData>(self.len() * size_of::<Value>())
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        for index in 0..self.len() {
            visit(self.get(index));
        }
    }
}
