//! Raw byte buffers.

use crate::context::Context;
use crate::heap::Header;
use crate::objects::{alloc_varsize, heap_object};
use crate::value::{Value, ValueType};

#[repr(C)]
pub struct BufferData {
    header: Header,
    size: usize,
    data: [u8; 0],
}

heap_object!(
    /// A fixed-size sequence of raw bytes with no outgoing references.
    /// Also used internally as backing storage for string builders and for
    /// hash table index arrays.
    Buffer,
    Buffer,
    BufferData
);

impl Buffer {
    /// Allocates a zero-filled buffer of `size` bytes.
    pub fn make(ctx: &mut Context, size: usize) -> Buffer {
        let data = alloc_varsize::<BufferData>(ctx, ValueType::Buffer, size);
        unsafe { (*data).size = size };
        Buffer(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub(crate) fn data_ptr(self) -> *const u8 {
        unsafe { (*self.data()).data.as_ptr() }
    }

    pub(crate) fn data_ptr_mut(self) -> *mut u8 {
        unsafe { (*self.data()).data.as_mut_ptr() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    /// Reads the byte at `index`, which must be in bounds.
    pub fn get(self, index: usize) -> u8 {
        debug_assert!(index < self.len());
        unsafe { *self.data_ptr().add(index) }
    }

    /// Writes the byte at `index`, which must be in bounds.
    pub fn set(self, index: usize, byte: u8) {
        debug_assert!(index < self.len());
        unsafe { *self.data_ptr_mut().add(index) = byte };
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<BufferData>(self.len())
    }
}
