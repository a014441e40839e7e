//! Strings, string builders and symbols.
//!
//! Strings are immutable byte sequences (UTF-8 by convention). A string
//! caches its content hash and its "interned" flag in a single word: the top
//! bit is the flag, the remaining bits are the hash (0 = not yet computed).
//! Two interned strings with equal contents are the same object, so interned
//! strings compare by pointer.
//!
//! Symbols are unique name values backed by an interned string; only the
//! context's interner creates them. Symbol equality is pointer equality.

use crate::context::Context;
use crate::handles::{Handle, Scope};
use crate::heap::Header;
use crate::objects::buffers::Buffer;
use crate::objects::{alloc_fixed, alloc_varsize, heap_object};
use crate::value::{TypedValue, Value, ValueType};

const INTERNED_FLAG: usize = 1 << (usize::BITS - 1);
const HASH_MASK: usize = !INTERNED_FLAG;

#[repr(C)]
pub struct StringData {
    header: Header,
    size: usize,
    // Cached content hash plus the interned flag in the top bit.
    hash: usize,
    data: [u8; 0],
}

heap_object!(
    /// An immutable string.
    TiroString,
    String,
    StringData
);

impl TiroString {
    pub fn make(ctx: &mut Context, contents: &str) -> TiroString {
        Self::make_raw(ctx, contents.as_bytes())
    }

    pub(crate) fn make_raw(ctx: &mut Context, bytes: &[u8]) -> TiroString {
        let data = alloc_varsize::<StringData>(ctx, ValueType::String, bytes.len());
        unsafe {
            (*data).size = bytes.len();
            (*data).hash = 0;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), (*data).data.as_mut_ptr(), bytes.len());
        }
        TiroString(Value::from_heap(data as *mut Header))
    }

    /// Builds a string from the current contents of `builder`.
    pub fn from_builder(ctx: &mut Context, builder: Handle<StringBuilder>) -> TiroString {
        let len = builder.get().len();
        let data = alloc_varsize::<StringData>(ctx, ValueType::String, len);
        unsafe {
            (*data).size = len;
            (*data).hash = 0;
            // Re-read the source pointer after the allocation; the builder
            // handle kept the buffer alive.
            std::ptr::copy_nonoverlapping(builder.get().data_ptr(), (*data).data.as_mut_ptr(), len);
        }
        TiroString(Value::from_heap(data as *mut Header))
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

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    pub fn as_str(&self) -> &str {
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }

    /// The cached content hash; computed on first use. Never 0 and never
    /// colliding with the interned flag.
    pub fn hash(self) -> usize {
        unsafe {
            let d = self.data();
            if (*d).hash & HASH_MASK == 0 {
                let mut hash = crate::hash::byte_hash(self.as_bytes()) & HASH_MASK;
                if hash == 0 {
                    hash = 1;
                }
                (*d).hash = hash | ((*d).hash & !HASH_MASK);
            }
            (*d).hash & HASH_MASK
        }
    }

    pub fn interned(self) -> bool {
        unsafe { (*self.data()).hash & INTERNED_FLAG != 0 }
    }

    pub(crate) fn set_interned(self, interned: bool) {
        unsafe {
            if interned {
                (*self.data()).hash |= INTERNED_FLAG;
            } else {
                (*self.data()).hash &= !INTERNED_FLAG;
            }
        }
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<StringData>(self.len())
    }

    /// Content equality; pointer equality suffices when both are interned.
    pub fn equal(self, other: TiroString) -> bool {
        if self.interned() && other.interned() {
            return self.value().same(other.value());
        }
        self.as_bytes() == other.as_bytes()
    }
}

#[repr(C)]
pub struct SymbolData {
    header: Header,
    name: Value,
}

heap_object!(
    /// A unique name value backed by an interned string.
    Symbol,
    Symbol,
    SymbolData
);

impl Symbol {
    /// Creates a new symbol. Callers outside the interner must go through
    /// [`Context::get_symbol`](crate::Context::get_symbol) instead.
    pub(crate) fn make(ctx: &mut Context, name: Handle<TiroString>) -> Symbol {
        let data = alloc_fixed::<SymbolData>(ctx, ValueType::Symbol);
        unsafe { (*data).name = name.value() };
        Symbol(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).name });
    }
}

/// First capacity of a builder's backing buffer.
const BUILDER_MIN_CAPACITY: usize = 64;

#[repr(C)]
pub struct StringBuilderData {
    header: Header,
    // Backing byte buffer (or null while empty).
    buffer: Value,
    size: usize,
}

heap_object!(
    /// A resizable byte buffer with amortized O(1) append; backs template
    /// formatting and interpolation.
    StringBuilder,
    StringBuilder,
    StringBuilderData
);

impl StringBuilder {
    pub fn make(ctx: &mut Context) -> StringBuilder {
        let data = alloc_fixed::<StringBuilderData>(ctx, ValueType::StringBuilder);
        StringBuilder(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn capacity(self) -> usize {
        let buffer = unsafe { (*self.data()).buffer };
        if buffer.is_null() { 0 } else { Buffer::from_value_unchecked(buffer).len() }
    }

    pub(crate) fn data_ptr(self) -> *const u8 {
        let buffer = unsafe { (*self.data()).buffer };
        debug_assert!(!buffer.is_null() || self.len() == 0);
        if buffer.is_null() {
            std::ptr::NonNull::<u8>::dangling().as_ptr()
        } else {
            Buffer::from_value_unchecked(buffer).data_ptr()
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    pub fn as_str(&self) -> &str {
        unsafe { std::str::from_utf8_unchecked(self.as_bytes()) }
    }

    pub fn clear(self) {
        unsafe { (*self.data()).size = 0 };
    }

    /// Appends plain bytes. The bytes must not alias unrooted heap storage;
    /// use [`append_string`](Self::append_string) for heap strings.
    pub fn append_bytes(this: Handle<StringBuilder>, ctx: &mut Context, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        Self::reserve_free(this, ctx, bytes.len());
        unsafe { this.get().append_raw(bytes.as_ptr(), bytes.len()) };
    }

    pub fn append_str(this: Handle<StringBuilder>, ctx: &mut Context, text: &str) {
        Self::append_bytes(this, ctx, text.as_bytes());
    }

    pub fn append_string(this: Handle<StringBuilder>, ctx: &mut Context, string: Handle<TiroString>) {
        let len = string.get().len();
        if len == 0 {
            return;
        }
        Self::reserve_free(this, ctx, len);
        // Source pointer taken after reservation; the handle kept it alive.
        unsafe { this.get().append_raw(string.get().data_ptr(), len) };
    }

    pub fn append_builder(this: Handle<StringBuilder>, ctx: &mut Context, other: Handle<StringBuilder>) {
        let len = other.get().len();
        if len == 0 {
            return;
        }
        Self::reserve_free(this, ctx, len);
        unsafe { this.get().append_raw(other.get().data_ptr(), len) };
    }

    /// Finishes the builder into an interned string. The builder keeps its
    /// contents and can continue appending.
    pub fn make_string(this: Handle<StringBuilder>, ctx: &mut Context) -> TiroString {
        let scope = Scope::new(ctx);
        let string = scope.local(TiroString::from_builder(ctx, this));
        ctx.intern_string(string.handle())
    }

    // Ensures space for n more bytes. Capacity grows to the next power of
    // two >= required, with a floor of 64.
    fn reserve_free(this: Handle<StringBuilder>, ctx: &mut Context, n: usize) {
        let required = this
            .get()
            .len()
            .checked_add(n)
            .unwrap_or_else(|| panic!("string builder size overflow"));
        if required <= this.get().capacity() {
            return;
        }

        let new_capacity = if required <= BUILDER_MIN_CAPACITY {
            BUILDER_MIN_CAPACITY
        } else {
            required.checked_next_power_of_two().unwrap_or_else(|| panic!("string too large"))
        };

        let scope = Scope::new(ctx);
        let old_buffer = scope.local(unsafe { (*this.get().data()).buffer });
        let new_buffer = Buffer::make(ctx, new_capacity);
        unsafe {
            if !old_buffer.value().is_null() {
                let old = Buffer::from_value_unchecked(old_buffer.value());
                std::ptr::copy_nonoverlapping(
                    old.data_ptr(),
                    new_buffer.data_ptr() as *mut u8,
                    this.get().len(),
                );
            }
            (*this.get().data()).buffer = new_buffer.value();
        }
    }

    unsafe fn append_raw(self, source: *const u8, len: usize) {
        debug_assert!(self.capacity() - self.len() >= len);
        unsafe {
            let buffer = Buffer::from_value_unchecked((*self.data()).buffer);
            let dest = (buffer.data_ptr() as *mut u8).add(self.len());
            std::ptr::copy_nonoverlapping(source, dest, len);
            (*self.data()).size += len;
        }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).buffer });
    }
}
