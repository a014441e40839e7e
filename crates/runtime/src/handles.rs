//! Rooting discipline for mutator code.
//!
//! Every allocation may collect, so any value that lives across a potential
//! allocation must be discoverable by the collector. Three root categories
//! exist:
//!
//! - **Scoped locals**: a page-based stack of value slots owned by the
//!   context. A [`Scope`] reserves slots and releases them when dropped;
//!   [`Local`] is a typed handle into one slot and cannot outlive its scope.
//! - **Globals**: individually allocated slots registered in a pointer set on
//!   the context, for roots with arbitrary lifetime (module tables held by
//!   embedders, async keepalives).
//! - **Interpreter registers**: a small fixed bank inside the interpreter,
//!   reset at every instruction boundary.
//!
//! [`Handle`] is a read-only view of *some* rooted slot (a local, a global, a
//! register or a traced slot inside a coroutine stack). Handles are plain
//! slot pointers; the caller guarantees the slot outlives the handle and
//! stays rooted. This is the same contract the interpreter and object
//! constructors are written against.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::context::Context;
use crate::value::{TypedValue, Value};

/// Slots per rooted-stack page.
const PAGE_SLOTS: usize = 512;

struct Page {
    slots: [Value; PAGE_SLOTS],
}

impl Page {
    fn new() -> Box<Page> {
        Box::new(Page { slots: [Value::null(); PAGE_SLOTS] })
    }
}

/// Page-based stack of rooted value slots.
///
/// Pages are boxed and never move, so slot addresses remain stable while the
/// slot is live. One spare page is buffered after deallocation so tight
/// scope churn does not thrash the allocator.
pub(crate) struct RootedStack {
    pages: Vec<Box<Page>>,
    used: usize,
    spare: Option<Box<Page>>,
}

impl RootedStack {
    pub(crate) fn new() -> RootedStack {
        RootedStack { pages: Vec::new(), used: 0, spare: None }
    }

    pub(crate) fn depth(&self) -> usize {
        self.used
    }

    fn alloc_slot(&mut self, value: Value) -> NonNull<Value> {
        let page_index = self.used / PAGE_SLOTS;
        let slot_index = self.used % PAGE_SLOTS;
        if page_index == self.pages.len() {
            let page = self.spare.take().unwrap_or_else(Page::new);
            self.pages.push(page);
        }
        self.used += 1;

        let slot = &mut self.pages[page_index].slots[slot_index];
        *slot = value;
        NonNull::from(slot)
    }

    fn shrink_to(&mut self, depth: usize) {
        debug_assert!(depth <= self.used);
        self.used = depth;

        let needed_pages = self.used.div_ceil(PAGE_SLOTS);
        while self.pages.len() > needed_pages {
            let page = self.pages.pop().expect("page present");
            if self.spare.is_none() {
                self.spare = Some(page);
            }
        }
    }

    pub(crate) fn walk(&self, visit: &mut dyn FnMut(Value)) {
        let mut remaining = self.used;
        for page in &self.pages {
            let count = remaining.min(PAGE_SLOTS);
            for slot in &page.slots[..count] {
                visit(*slot);
            }
            remaining -= count;
            if remaining == 0 {
                break;
            }
        }
    }
}

/// Registry of long-lived root slots.
pub(crate) struct GlobalSet {
    slots: HashSet<*mut Value>,
}

impl GlobalSet {
    pub(crate) fn new() -> Box<GlobalSet> {
        Box::new(GlobalSet { slots: HashSet::new() })
    }

    fn register(&mut self, slot: *mut Value) {
        let inserted = self.slots.insert(slot);
        debug_assert!(inserted, "global slot registered twice");
    }

    fn unregister(&mut self, slot: *mut Value) {
        let removed = self.slots.remove(&slot);
        debug_assert!(removed, "global slot was not registered");
    }

    pub(crate) fn walk(&self, visit: &mut dyn FnMut(Value)) {
        for &slot in &self.slots {
            visit(unsafe { *slot });
        }
    }
}

/// A read-only reference to a rooted value slot.
///
/// The wrapped pointer must address a slot the collector traces (a local, a
/// global, an interpreter register or a coroutine stack slot), and the slot
/// must outlive the handle. Handles are created by the rooting primitives in
/// this module and by the interpreter from coroutine stack slots.
pub struct Handle<T = Value> {
    slot: NonNull<Value>,
    _marker: PhantomData<*const T>,
}

impl<T: TypedValue> Handle<T> {
    /// Wraps a raw slot.
    ///
    /// # Safety
    /// `slot` must point to a live, traced value slot containing an instance
    /// of `T`, and must remain valid for the lifetime of the handle.
    pub(crate) unsafe fn from_slot(slot: *mut Value) -> Handle<T> {
        debug_assert!(T::is_instance(unsafe { *slot }));
        Handle { slot: unsafe { NonNull::new_unchecked(slot) }, _marker: PhantomData }
    }

    pub fn get(self) -> T {
        T::from_value_unchecked(unsafe { *self.slot.as_ptr() })
    }

    pub fn value(self) -> Value {
        unsafe { *self.slot.as_ptr() }
    }

    /// Reinterprets the handle as a handle to the untyped value.
    pub fn erased(self) -> Handle<Value> {
        Handle { slot: self.slot, _marker: PhantomData }
    }

    /// Casts to a different typed handle. The slot must hold an instance of
    /// `U`, which is checked in debug builds.
    pub fn cast<U: TypedValue>(self) -> Handle<U> {
        debug_assert!(U::is_instance(self.value()));
        Handle { slot: self.slot, _marker: PhantomData }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

/// RAII region of rooted local slots.
///
/// Dropping the scope releases every slot allocated through it. The scope
/// keeps a raw pointer to the context's rooted stack: the context must
/// outlive the scope and must not be moved while scopes are live (the
/// context API upholds this by never handing out owned contexts during a
/// run).
pub struct Scope {
    stack: NonNull<RootedStack>,
    saved_depth: usize,
}

impl Scope {
    pub fn new(ctx: &mut Context) -> Scope {
        let stack = ctx.rooted_stack_mut();
        let saved_depth = stack.depth();
        Scope { stack: NonNull::from(stack), saved_depth }
    }

    /// Reserves a slot holding `value`.
    pub fn local<T: TypedValue>(&self, value: T) -> Local<'_, T> {
        let slot = unsafe { (*self.stack.as_ptr()).alloc_slot(value.value()) };
        Local { slot, _marker: PhantomData }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        unsafe { (*self.stack.as_ptr()).shrink_to(self.saved_depth) };
    }
}

/// A typed handle into a scope-owned slot.
pub struct Local<'s, T = Value> {
    slot: NonNull<Value>,
    _marker: PhantomData<(&'s Scope, *const T)>,
}

impl<'s, T: TypedValue> Local<'s, T> {
    pub fn get(&self) -> T {
        T::from_value_unchecked(unsafe { *self.slot.as_ptr() })
    }

    pub fn set(&self, value: T) {
        unsafe { *self.slot.as_ptr() = value.value() };
    }

    pub fn value(&self) -> Value {
        unsafe { *self.slot.as_ptr() }
    }

    pub fn handle(&self) -> Handle<T> {
        unsafe { Handle::from_slot(self.slot.as_ptr()) }
    }

    /// Retypes the local. The slot must hold an instance of `U`.
    pub fn cast<U: TypedValue>(self) -> Local<'s, U> {
        debug_assert!(U::is_instance(self.value()));
        Local { slot: self.slot, _marker: PhantomData }
    }
}

impl<T> Clone for Local<'_, T> {
    fn clone(&self) -> Self {
        Local { slot: self.slot, _marker: PhantomData }
    }
}

impl<T> Copy for Local<'_, T> {}

/// A root with arbitrary lifetime.
///
/// The slot is heap-allocated and registered with the context's global set;
/// dropping the global unregisters and frees it. Globals are not `Send`: the
/// async bridge wraps them in a token that is only ever dereferenced on the
/// runtime thread.
pub struct Global<T = Value> {
    slot: NonNull<Value>,
    set: NonNull<GlobalSet>,
    _marker: PhantomData<*const T>,
}

impl<T: TypedValue> Global<T> {
    pub fn new(ctx: &mut Context, value: T) -> Global<T> {
        let slot = Box::into_raw(Box::new(value.value()));
        let set = ctx.global_set_mut();
        set.register(slot);
        Global {
            slot: unsafe { NonNull::new_unchecked(slot) },
            set: NonNull::from(&mut *set),
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> T {
        T::from_value_unchecked(unsafe { *self.slot.as_ptr() })
    }

    pub fn set(&self, value: T) {
        unsafe { *self.slot.as_ptr() = value.value() };
    }

    pub fn handle(&self) -> Handle<T> {
        unsafe { Handle::from_slot(self.slot.as_ptr()) }
    }
}

impl<T> Drop for Global<T> {
    fn drop(&mut self) {
        unsafe {
            self.set.as_mut().unregister(self.slot.as_ptr());
            drop(Box::from_raw(self.slot.as_ptr()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_stack_allocates_and_releases_pages() {
        let mut stack = RootedStack::new();
        let depth = stack.depth();
        for _ in 0..PAGE_SLOTS + 10 {
            stack.alloc_slot(Value::null());
        }
        assert_eq!(stack.pages.len(), 2);

        stack.shrink_to(depth);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.pages.len(), 0);
        assert!(stack.spare.is_some(), "one page is buffered");
    }

    #[test]
    fn rooted_stack_walks_used_slots_only() {
        let mut stack = RootedStack::new();
        stack.alloc_slot(Value::from_embedded_integer(1));
        stack.alloc_slot(Value::from_embedded_integer(2));

        let mut seen = Vec::new();
        stack.walk(&mut |v| seen.push(v.embedded_integer()));
        assert_eq!(seen, [1, 2]);
    }

    #[test]
    fn spare_page_is_reused() {
        let mut stack = RootedStack::new();
        for _ in 0..PAGE_SLOTS {
            stack.alloc_slot(Value::null());
        }
        stack.shrink_to(0);
        assert!(stack.spare.is_some());

        stack.alloc_slot(Value::null());
        assert!(stack.spare.is_none(), "spare page was taken back");
    }
}
