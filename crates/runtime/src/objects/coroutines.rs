//! Coroutines and their stacks.
//!
//! A coroutine stack is a single byte arena in which call frames and value
//! slots share the address space, growing from low to high offsets. All
//! internal links (stack top, top frame, frame caller) are byte offsets into
//! the arena rather than raw pointers, so growing the stack is a copy of the
//! used prefix plus bookkeeping; nothing needs to be rewritten. The program
//! counter is a byte offset into the function's code object, which lives on
//! the heap and is likewise unaffected by stack growth.
//!
//! Frame layout: a frame struct sits at its base offset, immediately
//! followed by `locals` value slots (initialized to undefined for user
//! frames) and then the frame's value stack. The arguments of a call sit
//! directly below the frame base and belong to the caller's value region.

use crate::context::Context;
use crate::handles::Handle;
use crate::heap::Header;
use crate::objects::functions::FunctionTemplate;
use crate::objects::native::NativeAsyncFunction;
use crate::objects::strings::TiroString;
use crate::objects::{alloc_fixed, alloc_varsize, heap_object};
use crate::value::{TypedValue, Value, ValueType};

/// Default size (bytes) of a fresh coroutine stack arena.
pub const INITIAL_STACK_SIZE: u32 = 1 << 9;

/// Hard limit (bytes) for a coroutine stack arena.
pub const MAX_STACK_SIZE: u32 = 1 << 24;

/// Sentinel offset meaning "no frame".
const NO_FRAME: u32 = u32::MAX;

const VALUE_SIZE: u32 = size_of::<Value>() as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    User,
    Async,
}

/// Set when returning must pop one extra slot: a plain function was called
/// through the LoadMethod/CallMethod pair and the unused `this` slot is
/// still sitting below the arguments.
pub(crate) const FRAME_POP_ONE_MORE: u8 = 1 << 0;

const FRAME_KIND_USER: u8 = 0;
const FRAME_KIND_ASYNC: u8 = 1;

#[repr(C)]
struct FrameCommon {
    kind: u8,
    flags: u8,
    // Number of argument values on the stack directly below this frame.
    args: u32,
    // Number of local slots directly after this frame.
    locals: u32,
    // Byte offset of the caller frame, or NO_FRAME.
    caller: u32,
}

#[repr(C)]
struct UserFrame {
    common: FrameCommon,
    template: Value,
    environment: Value,
    // Byte offset into the template's code.
    pc: u32,
}

#[repr(C)]
struct AsyncFrame {
    common: FrameCommon,
    function: Value,
    return_value: Value,
}

const fn frame_struct_size(kind: u8) -> u32 {
    match kind {
        FRAME_KIND_USER => size_of::<UserFrame>() as u32,
        _ => size_of::<AsyncFrame>() as u32,
    }
}

#[repr(C)]
pub struct CoroutineStackData {
    header: Header,
    // Undefined singleton, kept here so locals can be initialized without
    // reaching for the context.
    undef: Value,
    top: u32,
    top_frame: u32,
    capacity: u32,
    // Pads `data` up to an 8-byte aligned offset so Value slots written
    // into the arena are properly aligned.
    _pad: u32,
    data: [u8; 0],
}

heap_object!(
    /// The byte arena holding a coroutine's frames and value stack.
    CoroutineStack,
    CoroutineStack,
    CoroutineStackData
);

impl CoroutineStack {
    /// Creates an empty stack with a `capacity`-byte arena.
    pub fn make(ctx: &mut Context, capacity: u32) -> CoroutineStack {
        let undefined = ctx.get_undefined();
        let data = alloc_varsize::<CoroutineStackData>(
            ctx,
            ValueType::CoroutineStack,
            capacity as usize,
        );
        unsafe {
            (*data).undef = undefined;
            (*data).top = 0;
            (*data).top_frame = NO_FRAME;
            (*data).capacity = capacity;
        }
        CoroutineStack(Value::from_heap(data as *mut Header))
    }

    /// Creates a larger copy of `old`. Offsets stay valid, so the copy is a
    /// plain memcpy of the used prefix; the old stack is left untouched and
    /// becomes unreachable once the coroutine points at the new one.
    pub fn grow(ctx: &mut Context, old: Handle<CoroutineStack>, new_capacity: u32) -> CoroutineStack {
        debug_assert!(new_capacity > old.get().capacity());

        let new_stack = CoroutineStack::make(ctx, new_capacity);
        let old_stack = old.get();
        unsafe {
            std::ptr::copy_nonoverlapping(
                old_stack.base_ptr(),
                new_stack.base_ptr(),
                old_stack.used() as usize,
            );
            (*new_stack.data()).top = (*old_stack.data()).top;
            (*new_stack.data()).top_frame = (*old_stack.data()).top_frame;
        }
        new_stack
    }

    pub fn capacity(self) -> u32 {
        unsafe { (*self.data()).capacity }
    }

    pub fn used(self) -> u32 {
        unsafe { (*self.data()).top }
    }

    pub fn available(self) -> u32 {
        self.capacity() - self.used()
    }

    /// Number of values that fit without growing.
    pub fn value_capacity_remaining(self) -> u32 {
        self.available() / VALUE_SIZE
    }

    fn base_ptr(self) -> *mut u8 {
        unsafe { (*self.data()).data.as_mut_ptr() }
    }

    fn at(self, offset: u32) -> *mut u8 {
        debug_assert!(offset <= self.capacity());
        unsafe { self.base_ptr().add(offset as usize) }
    }

    fn common(self, frame: u32) -> *mut FrameCommon {
        self.at(frame) as *mut FrameCommon
    }

    fn user(self, frame: u32) -> *mut UserFrame {
        debug_assert_eq!(unsafe { (*self.common(frame)).kind }, FRAME_KIND_USER);
        self.at(frame) as *mut UserFrame
    }

    fn async_(self, frame: u32) -> *mut AsyncFrame {
        debug_assert_eq!(unsafe { (*self.common(frame)).kind }, FRAME_KIND_ASYNC);
        self.at(frame) as *mut AsyncFrame
    }

    pub(crate) fn top_frame_offset(self) -> Option<u32> {
        let offset = unsafe { (*self.data()).top_frame };
        if offset == NO_FRAME { None } else { Some(offset) }
    }

    pub fn has_frames(self) -> bool {
        self.top_frame_offset().is_some()
    }

    // ---- frame management ----------------------------------------------

    /// Pushes a frame for a user function call. The arguments must already
    /// be on the stack. Returns false when the arena is full.
    pub(crate) fn push_user_frame(
        self,
        template: FunctionTemplate,
        environment: Value,
        flags: u8,
    ) -> bool {
        let params = template.params();
        let locals = template.locals();
        debug_assert!(self.top_value_count() >= params);

        let Some(frame) = self.allocate_frame(size_of::<UserFrame>() as u32, locals) else {
            return false;
        };

        unsafe {
            let undef = (*self.data()).undef;
            let user = self.at(frame) as *mut UserFrame;
            (*user).common = FrameCommon {
                kind: FRAME_KIND_USER,
                flags,
                args: params,
                locals,
                caller: (*self.data()).top_frame,
            };
            (*user).template = template.value();
            (*user).environment = environment;
            (*user).pc = 0;

            let locals_ptr = self.at(frame + size_of::<UserFrame>() as u32) as *mut Value;
            for index in 0..locals {
                *locals_ptr.add(index as usize) = undef;
            }

            (*self.data()).top_frame = frame;
        }
        true
    }

    /// Pushes a frame for an async native call over `argc` arguments.
    pub(crate) fn push_async_frame(self, function: NativeAsyncFunction, argc: u32, flags: u8) -> bool {
        debug_assert!(self.top_value_count() >= argc);
        debug_assert!(argc >= function.params());

        let Some(frame) = self.allocate_frame(size_of::<AsyncFrame>() as u32, 0) else {
            return false;
        };

        unsafe {
            let async_frame = self.at(frame) as *mut AsyncFrame;
            (*async_frame).common = FrameCommon {
                kind: FRAME_KIND_ASYNC,
                flags,
                args: argc,
                locals: 0,
                caller: (*self.data()).top_frame,
            };
            (*async_frame).function = function.value();
            (*async_frame).return_value = Value::null();

            (*self.data()).top_frame = frame;
        }
        true
    }

    pub(crate) fn pop_frame(self) {
        let frame = self.top_frame_offset().expect("frame to pop");
        unsafe {
            (*self.data()).top = frame;
            (*self.data()).top_frame = (*self.common(frame)).caller;
        }
    }

    // Reserves frame storage plus local slots at the top of the arena.
    fn allocate_frame(self, frame_size: u32, locals: u32) -> Option<u32> {
        let required = frame_size + locals * VALUE_SIZE;
        if required > self.available() {
            return None;
        }
        let frame = self.used();
        unsafe { (*self.data()).top = frame + required };
        Some(frame)
    }

    // ---- top frame accessors -------------------------------------------

    pub fn top_frame_kind(self) -> FrameKind {
        let frame = self.top_frame_offset().expect("top frame");
        match unsafe { (*self.common(frame)).kind } {
            FRAME_KIND_USER => FrameKind::User,
            _ => FrameKind::Async,
        }
    }

    pub(crate) fn top_frame_flags(self) -> u8 {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.common(frame)).flags }
    }

    pub(crate) fn top_frame_args(self) -> u32 {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.common(frame)).args }
    }

    pub(crate) fn frame_template(self) -> FunctionTemplate {
        let frame = self.top_frame_offset().expect("top frame");
        FunctionTemplate::from_value_unchecked(unsafe { (*self.user(frame)).template })
    }

    /// The closure environment of the top user frame (may be null).
    pub(crate) fn frame_environment(self) -> Value {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.user(frame)).environment }
    }

    pub(crate) fn frame_pc(self) -> u32 {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.user(frame)).pc }
    }

    pub(crate) fn set_frame_pc(self, pc: u32) {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.user(frame)).pc = pc };
    }

    pub(crate) fn top_async_return(self) -> Value {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.async_(frame)).return_value }
    }

    /// Writes the return slot of the suspended async frame on top.
    pub(crate) fn set_top_async_return(self, value: Value) {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.async_(frame)).return_value = value };
    }

    // ---- regions --------------------------------------------------------

    fn args_begin(self, frame: u32) -> u32 {
        frame - unsafe { (*self.common(frame)).args } * VALUE_SIZE
    }

    fn locals_begin(self, frame: u32) -> u32 {
        frame + frame_struct_size(unsafe { (*self.common(frame)).kind })
    }

    fn locals_end(self, frame: u32) -> u32 {
        self.locals_begin(frame) + unsafe { (*self.common(frame)).locals } * VALUE_SIZE
    }

    fn values_begin(self) -> u32 {
        match self.top_frame_offset() {
            Some(frame) => self.locals_end(frame),
            None => 0,
        }
    }

    fn slot_at(self, offset: u32) -> *mut Value {
        debug_assert!(offset % VALUE_SIZE == 0);
        self.at(offset) as *mut Value
    }

    /// Pointer to argument `index` of the top frame.
    pub(crate) fn arg_slot(self, index: u32) -> *mut Value {
        let frame = self.top_frame_offset().expect("top frame");
        debug_assert!(index < unsafe { (*self.common(frame)).args });
        self.slot_at(self.args_begin(frame) + index * VALUE_SIZE)
    }

    pub(crate) fn args_ptr(self) -> *mut Value {
        let frame = self.top_frame_offset().expect("top frame");
        self.slot_at(self.args_begin(frame))
    }

    /// Pointer to local `index` of the top frame.
    pub(crate) fn local_slot(self, index: u32) -> *mut Value {
        let frame = self.top_frame_offset().expect("top frame");
        debug_assert!(index < unsafe { (*self.common(frame)).locals });
        self.slot_at(self.locals_begin(frame) + index * VALUE_SIZE)
    }

    pub(crate) fn locals_count(self) -> u32 {
        let frame = self.top_frame_offset().expect("top frame");
        unsafe { (*self.common(frame)).locals }
    }

    // ---- value stack of the top frame ----------------------------------

    /// Pushes a value; false when the arena is full (grow and retry).
    pub(crate) fn push_value(self, value: Value) -> bool {
        if VALUE_SIZE > self.available() {
            return false;
        }
        unsafe {
            let top = (*self.data()).top;
            *self.slot_at(top) = value;
            (*self.data()).top = top + VALUE_SIZE;
        }
        true
    }

    pub(crate) fn top_value_count(self) -> u32 {
        (self.used() - self.values_begin()) / VALUE_SIZE
    }

    /// Slot of the n-th topmost value (0 = topmost).
    pub(crate) fn top_slot(self, n: u32) -> *mut Value {
        debug_assert!(self.top_value_count() > n);
        self.slot_at(self.used() - (n + 1) * VALUE_SIZE)
    }

    pub(crate) fn top_value(self, n: u32) -> Value {
        unsafe { *self.top_slot(n) }
    }

    pub(crate) fn set_top_value(self, n: u32, value: Value) {
        unsafe { *self.top_slot(n) = value };
    }

    pub(crate) fn pop_value(self) {
        debug_assert!(self.top_value_count() > 0);
        unsafe { (*self.data()).top -= VALUE_SIZE };
    }

    pub(crate) fn pop_values(self, n: u32) {
        debug_assert!(self.top_value_count() >= n);
        unsafe { (*self.data()).top -= n * VALUE_SIZE };
    }

    // ---- gc support -----------------------------------------------------

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<CoroutineStackData>(self.capacity() as usize)
    }

    /// Visits every reference in the arena: per frame its reference fields
    /// plus its locals and value region, then the region below the first
    /// frame. A frame's arguments belong to its caller's value region.
    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(unsafe { (*self.data()).undef });

        let mut region_end = self.used();
        let mut frame = unsafe { (*self.data()).top_frame };
        while frame != NO_FRAME {
            let begin = self.locals_begin(frame);
            let mut offset = begin;
            while offset < region_end {
                visit(unsafe { *self.slot_at(offset) });
                offset += VALUE_SIZE;
            }

            unsafe {
                match (*self.common(frame)).kind {
                    FRAME_KIND_USER => {
                        let user = self.user(frame);
                        visit((*user).template);
                        visit((*user).environment);
                    }
                    _ => {
                        let async_frame = self.async_(frame);
                        visit((*async_frame).function);
                        visit((*async_frame).return_value);
                    }
                }
            }

            region_end = frame;
            frame = unsafe { (*self.common(frame)).caller };
        }

        let mut offset = 0;
        while offset < region_end {
            visit(unsafe { *self.slot_at(offset) });
            offset += VALUE_SIZE;
        }
    }
}

/// Lifecycle of a coroutine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    New,
    Ready,
    Running,
    Waiting,
    Done,
}

impl CoroutineState {
    pub fn is_runnable(self) -> bool {
        matches!(self, CoroutineState::New | CoroutineState::Ready)
    }

    pub fn name(self) -> &'static str {
        match self {
            CoroutineState::New => "New",
            CoroutineState::Ready => "Ready",
            CoroutineState::Running => "Running",
            CoroutineState::Waiting => "Waiting",
            CoroutineState::Done => "Done",
        }
    }
}

#[repr(C)]
pub struct CoroutineData {
    header: Header,
    name: Value,
    function: Value,
    stack: Value,
    result: Value,
    next_ready: Value,
    state: CoroutineState,
}

heap_object!(
    /// A lightweight userland task multiplexed by the scheduler.
    Coroutine,
    Coroutine,
    CoroutineData
);

impl Coroutine {
    pub fn make(
        ctx: &mut Context,
        name: Handle<TiroString>,
        function: Handle<Value>,
        stack: Handle<CoroutineStack>,
    ) -> Coroutine {
        let data = alloc_fixed::<CoroutineData>(ctx, ValueType::Coroutine);
        unsafe {
            (*data).name = name.value();
            (*data).function = function.value();
            (*data).stack = stack.value();
            (*data).state = CoroutineState::New;
        }
        Coroutine(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub fn function(self) -> Value {
        unsafe { (*self.data()).function }
    }

    /// The current stack, or null once the coroutine is done.
    pub fn stack(self) -> Value {
        unsafe { (*self.data()).stack }
    }

    pub(crate) fn stack_object(self) -> CoroutineStack {
        CoroutineStack::from_value_unchecked(self.stack())
    }

    pub(crate) fn set_stack(self, stack: Value) {
        unsafe { (*self.data()).stack = stack };
    }

    /// The result value; only meaningful in the Done state.
    pub fn result(self) -> Value {
        unsafe { (*self.data()).result }
    }

    pub(crate) fn set_result(self, result: Value) {
        unsafe { (*self.data()).result = result };
    }

    pub fn state(self) -> CoroutineState {
        unsafe { (*self.data()).state }
    }

    pub(crate) fn set_state(self, state: CoroutineState) {
        unsafe { (*self.data()).state = state };
    }

    /// Link field of the scheduler's ready queue.
    pub(crate) fn next_ready(self) -> Value {
        unsafe { (*self.data()).next_ready }
    }

    pub(crate) fn set_next_ready(self, next: Value) {
        unsafe { (*self.data()).next_ready = next };
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).name);
            visit((*self.data()).function);
            visit((*self.data()).stack);
            visit((*self.data()).result);
            visit((*self.data()).next_ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handles::Scope;
    use crate::objects::functions::Code;
    use crate::objects::hash_tables::HashTable;
    use crate::objects::modules::Module;
    use crate::objects::tuples::Tuple;

    fn dummy_template(ctx: &mut Context, params: u32, locals: u32) -> FunctionTemplate {
        let scope = Scope::new(ctx);
        let name = scope.local(TiroString::make(ctx, "dummy"));
        let members = scope.local(Tuple::make(ctx, 0));
        let exported = scope.local(HashTable::make(ctx));
        let module =
            scope.local(Module::make(ctx, name.handle(), members.handle(), exported.handle()));
        let code = scope.local(Code::make(ctx, &[tiro_core::Opcode::Ret.raw()]));
        FunctionTemplate::make(ctx, name.handle(), module.handle(), params, locals, code.handle())
    }

    #[test]
    fn value_push_on_empty_stack_succeeds() {
        let mut ctx = Context::new();
        let scope = Scope::new(&mut ctx);
        let stack = scope.local(CoroutineStack::make(&mut ctx, INITIAL_STACK_SIZE));

        assert!(stack.get().push_value(ctx.get_integer(1)));
        assert_eq!(stack.get().top_value_count(), 1);
        assert!(stack.get().top_value(0).same(ctx.get_integer(1)));

        stack.get().pop_value();
        assert_eq!(stack.get().top_value_count(), 0);
    }

    #[test]
    fn user_frames_expose_args_and_locals() {
        let mut ctx = Context::new();
        let scope = Scope::new(&mut ctx);
        let stack = scope.local(CoroutineStack::make(&mut ctx, INITIAL_STACK_SIZE));
        let template = scope.local(dummy_template(&mut ctx, 2, 3));

        assert!(stack.get().push_value(ctx.get_integer(10)));
        assert!(stack.get().push_value(ctx.get_integer(20)));
        assert!(stack.get().push_user_frame(template.get(), Value::null(), 0));

        let stack = stack.get();
        assert_eq!(stack.top_frame_kind(), FrameKind::User);
        assert_eq!(stack.top_frame_args(), 2);
        assert_eq!(stack.locals_count(), 3);
        unsafe {
            assert!((*stack.arg_slot(0)).same(ctx.get_integer(10)));
            assert!((*stack.arg_slot(1)).same(ctx.get_integer(20)));
            // Locals start out undefined.
            assert!((*stack.local_slot(0)).same(ctx.get_undefined()));
            assert!((*stack.local_slot(2)).same(ctx.get_undefined()));
        }
        assert_eq!(stack.top_value_count(), 0);

        stack.pop_frame();
        assert!(!stack.has_frames());
        assert_eq!(stack.top_value_count(), 2);
    }

    #[test]
    fn growth_preserves_frames_and_values() {
        let mut ctx = Context::new();
        let scope = Scope::new(&mut ctx);
        let stack = scope.local(CoroutineStack::make(&mut ctx, INITIAL_STACK_SIZE));
        let template = scope.local(dummy_template(&mut ctx, 1, 1));

        assert!(stack.get().push_value(ctx.get_integer(7)));
        assert!(stack.get().push_user_frame(template.get(), Value::null(), 0));
        stack.get().set_frame_pc(0);
        assert!(stack.get().push_value(ctx.get_integer(99)));

        let grown = CoroutineStack::grow(&mut ctx, stack.handle(), INITIAL_STACK_SIZE * 2);
        assert_eq!(grown.capacity(), INITIAL_STACK_SIZE * 2);
        assert_eq!(grown.used(), stack.get().used());

        // Offsets survive the copy: the frame, its argument and the value
        // stack all read back unchanged.
        assert_eq!(grown.top_frame_kind(), FrameKind::User);
        assert_eq!(grown.top_frame_args(), 1);
        assert_eq!(grown.frame_pc(), 0);
        unsafe {
            assert!((*grown.arg_slot(0)).same(ctx.get_integer(7)));
        }
        assert!(grown.top_value(0).same(ctx.get_integer(99)));
    }

    #[test]
    fn push_fails_when_arena_is_full() {
        let mut ctx = Context::new();
        let scope = Scope::new(&mut ctx);
        let stack = scope.local(CoroutineStack::make(&mut ctx, 128));

        let mut pushed = 0;
        while stack.get().push_value(Value::null()) {
            pushed += 1;
        }
        assert_eq!(pushed, 128 / size_of::<Value>());
        assert_eq!(stack.get().value_capacity_remaining(), 0);
    }

    #[test]
    fn frame_sizes_are_value_aligned() {
        assert_eq!(size_of::<UserFrame>() % size_of::<Value>(), 0);
        assert_eq!(size_of::<AsyncFrame>() % size_of::<Value>(), 0);
        assert_eq!(size_of::<FrameCommon>(), 16);
    }
}
