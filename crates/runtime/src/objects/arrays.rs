//! Growable arrays.
//!
//! An `Array` is a small fixed header object pointing at a separate
//! `ArrayStorage` with (size, capacity, inline slots). Growing allocates a
//! replacement storage; only the occupied prefix of a storage is ever read
//! or traced, the uninitialized tail holds no hidden references (slots are
//! zeroed on allocation).

use crate::context::Context;
use crate::handles::Handle;
use crate::heap::Header;
use crate::objects::{alloc_fixed, alloc_varsize, heap_object};
use crate::value::{TypedValue, Value, ValueType};

const MIN_CAPACITY: usize = 8;

#[repr(C)]
pub struct ArrayStorageData {
    header: Header,
    size: usize,
    capacity: usize,
    values: [Value; 0],
}

heap_object!(
    /// Backing storage of an array: an occupied prefix of `size` slots
    /// within `capacity` allocated slots.
    ArrayStorage,
    ArrayStorage,
    ArrayStorageData
);

impl ArrayStorage {
    pub(crate) fn make(ctx: &mut Context, capacity: usize) -> ArrayStorage {
        let data = alloc_varsize::<ArrayStorageData>(
            ctx,
            ValueType::ArrayStorage,
            capacity * size_of::<Value>(),
        );
        unsafe {
            (*data).size = 0;
            (*data).capacity = capacity;
        }
        ArrayStorage(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn capacity(self) -> usize {
        unsafe { (*self.data()).capacity }
    }

    fn slots(self) -> *mut Value {
        unsafe { (*self.data()).values.as_mut_ptr() }
    }

    pub(crate) fn get(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) }
    }

    pub(crate) fn set(self, index: usize, value: Value) {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) = value };
    }

    pub(crate) fn push(self, value: Value) {
        debug_assert!(self.len() < self.capacity());
        unsafe {
            let size = (*self.data()).size;
            *self.slots().add(size) = value;
            (*self.data()).size = size + 1;
        }
    }

    pub(crate) fn pop(self) -> Value {
        debug_assert!(self.len() > 0);
        unsafe {
            (*self.data()).size -= 1;
            *self.slots().add((*self.data()).size)
        }
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<ArrayStorageData>(self.capacity() * size_of::<Value>())
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        // Occupied prefix only; the tail is never read.
        for index in 0..self.len() {
            visit(self.get(index));
        }
    }
}

#[repr(C)]
pub struct ArrayData {
    header: Header,
    storage: Value,
}

heap_object!(
    /// A growable value array.
    Array,
    Array,
    ArrayData
);

impl Array {
    pub fn make(ctx: &mut Context) -> Array {
        let data = alloc_fixed::<ArrayData>(ctx, ValueType::Array);
        Array(Value::from_heap(data as *mut Header))
    }

    fn storage(self) -> Option<ArrayStorage> {
        let storage = unsafe { (*self.data()).storage };
        if storage.is_null() { None } else { Some(ArrayStorage::from_value_unchecked(storage)) }
    }

    pub fn len(self) -> usize {
        self.storage().map_or(0, ArrayStorage::len)
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn capacity(self) -> usize {
        self.storage().map_or(0, ArrayStorage::capacity)
    }

    /// Reads the element at `index`, which must be in bounds.
    pub fn get(self, index: usize) -> Value {
        self.storage().expect("non-empty array").get(index)
    }

    /// Writes the element at `index`, which must be in bounds.
    pub fn set(self, index: usize, value: Value) {
        self.storage().expect("non-empty array").set(index, value)
    }

    /// Appends `value`, growing the storage when full.
    pub fn push(this: Handle<Array>, ctx: &mut Context, value: Handle<Value>) {
        let needs_growth = match this.get().storage() {
            None => true,
            Some(storage) => storage.len() == storage.capacity(),
        };

        if needs_growth {
            let required = this.get().len() + 1;
            let new_capacity = if required <= MIN_CAPACITY {
                MIN_CAPACITY
            } else {
                required.checked_next_power_of_two().unwrap_or_else(|| panic!("array too large"))
            };

            let new_storage = ArrayStorage::make(ctx, new_capacity);
            // Re-read the old storage after the allocation.
            if let Some(old) = this.get().storage() {
                for index in 0..old.len() {
                    new_storage.push(old.get(index));
                }
            }
            unsafe { (*this.get().data()).storage = new_storage.value() };
        }

        this.get().storage().expect("storage present").push(value.value());
    }

    /// Removes and returns the last element, or null when empty.
    pub fn pop(self) -> Value {
        match self.storage() {
            Some(storage) if storage.len() > 0 => storage.pop(),
            _ => Value::null(),
        }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).storage });
    }
}
