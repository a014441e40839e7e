//! Native function bridges and native data.
//!
//! Synchronous native functions run inside the interpreter's call machinery:
//! they receive a [`NativeFrame`] exposing the context, the live argument
//! slots on the coroutine stack and a rooted result slot.
//!
//! Asynchronous native functions additionally receive the means to suspend:
//! the initiating call returns without producing a result, the coroutine
//! moves to the Waiting state, and an [`AsyncResumer`] token (Send) later
//! posts the completion onto the context's event loop. The token carries a
//! keepalive root so the coroutine is retained while the operation is
//! pending; the heap itself is only ever touched from the runtime thread,
//! inside the posted job.

use crate::context::Context;
use crate::error::RuntimeError;
use crate::eventloop::JobSender;
use crate::handles::{Global, Handle, Scope};
use crate::heap::Header;
use crate::objects::coroutines::Coroutine;
use crate::objects::strings::TiroString;
use crate::objects::{alloc_fixed, alloc_varsize, heap_object};
use crate::value::{TypedValue, Value, ValueType};

/// Entry point of a synchronous native function.
pub type NativeFunctionPtr = fn(&mut NativeFrame<'_>) -> Result<(), RuntimeError>;

/// Entry point of an asynchronous native function.
pub type NativeAsyncFunctionPtr = fn(NativeAsyncFrame<'_>) -> Result<(), RuntimeError>;

#[repr(C)]
pub struct NativeFunctionData {
    header: Header,
    name: Value,
    // Closure values tuple, or null.
    values: Value,
    params: u32,
    func: Option<NativeFunctionPtr>,
}

heap_object!(
    /// A synchronous native function.
    NativeFunction,
    NativeFunction,
    NativeFunctionData
);

impl NativeFunction {
    pub fn make(
        ctx: &mut Context,
        name: Handle<TiroString>,
        values: Handle<Value>,
        params: u32,
        func: NativeFunctionPtr,
    ) -> NativeFunction {
        let data = alloc_fixed::<NativeFunctionData>(ctx, ValueType::NativeFunction);
        unsafe {
            (*data).name = name.value();
            (*data).values = values.value();
            (*data).params = params;
            (*data).func = Some(func);
        }
        NativeFunction(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub fn values(self) -> Value {
        unsafe { (*self.data()).values }
    }

    pub fn params(self) -> u32 {
        unsafe { (*self.data()).params }
    }

    pub(crate) fn function(self) -> NativeFunctionPtr {
        unsafe { (*self.data()).func.expect("initialized native function") }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).name);
            visit((*self.data()).values);
        }
    }
}

#[repr(C)]
pub struct NativeAsyncFunctionData {
    header: Header,
    name: Value,
    values: Value,
    params: u32,
    func: Option<NativeAsyncFunctionPtr>,
}

heap_object!(
    /// An async-capable native function; calls through it suspend the
    /// calling coroutine until a resume token completes the operation.
    NativeAsyncFunction,
    NativeAsyncFunction,
    NativeAsyncFunctionData
);

impl NativeAsyncFunction {
    pub fn make(
        ctx: &mut Context,
        name: Handle<TiroString>,
        values: Handle<Value>,
        params: u32,
        func: NativeAsyncFunctionPtr,
    ) -> NativeAsyncFunction {
        let data = alloc_fixed::<NativeAsyncFunctionData>(ctx, ValueType::NativeAsyncFunction);
        unsafe {
            (*data).name = name.value();
            (*data).values = values.value();
            (*data).params = params;
            (*data).func = Some(func);
        }
        NativeAsyncFunction(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub fn values(self) -> Value {
        unsafe { (*self.data()).values }
    }

    pub fn params(self) -> u32 {
        unsafe { (*self.data()).params }
    }

    pub(crate) fn function(self) -> NativeAsyncFunctionPtr {
        unsafe { (*self.data()).func.expect("initialized native function") }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).name);
            visit((*self.data()).values);
        }
    }
}

/// Call frame passed to a synchronous native function.
///
/// The argument slots live on the coroutine stack and the result slot in the
/// interpreter's register bank; both are rooted for the duration of the call.
pub struct NativeFrame<'a> {
    ctx: &'a mut Context,
    function: NativeFunction,
    args: *mut Value,
    argc: usize,
    result: *mut Value,
}

impl<'a> NativeFrame<'a> {
    pub(crate) fn new(
        ctx: &'a mut Context,
        function: NativeFunction,
        args: *mut Value,
        argc: usize,
        result: *mut Value,
    ) -> NativeFrame<'a> {
        NativeFrame { ctx, function, args, argc, result }
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    pub fn arg_count(&self) -> usize {
        self.argc
    }

    /// Handle to the argument at `index`. Panics when out of bounds; the
    /// interpreter has already validated the call arity against `params`.
    pub fn arg(&self, index: usize) -> Handle<Value> {
        assert!(index < self.argc, "argument index {index} out of bounds ({})", self.argc);
        unsafe { Handle::from_slot(self.args.add(index)) }
    }

    /// The closure values tuple of the function, or null.
    pub fn values(&self) -> Value {
        self.function.values()
    }

    /// Sets the return value (defaults to null).
    pub fn result(&mut self, value: Value) {
        unsafe { *self.result = value };
    }
}

/// Call frame passed to an asynchronous native function's initiating call.
///
/// The initiating call must either complete immediately ([`Self::complete`],
/// which still resumes through the event loop on the next scheduling pass)
/// or hand off an [`AsyncResumer`] to whatever will finish the operation.
/// Dropping the frame without doing either leaves the coroutine waiting
/// forever.
pub struct NativeAsyncFrame<'a> {
    ctx: &'a mut Context,
    coro: Coroutine,
    function: NativeAsyncFunction,
    args: *mut Value,
    argc: usize,
}

impl<'a> NativeAsyncFrame<'a> {
    pub(crate) fn new(
        ctx: &'a mut Context,
        coro: Coroutine,
        function: NativeAsyncFunction,
        args: *mut Value,
        argc: usize,
    ) -> NativeAsyncFrame<'a> {
        NativeAsyncFrame { ctx, coro, function, args, argc }
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    pub fn arg_count(&self) -> usize {
        self.argc
    }

    pub fn arg(&self, index: usize) -> Handle<Value> {
        assert!(index < self.argc, "argument index {index} out of bounds ({})", self.argc);
        unsafe { Handle::from_slot(self.args.add(index)) }
    }

    pub fn values(&self) -> Value {
        self.function.values()
    }

    /// Detaches a resume token. The coroutine is kept alive by a global
    /// root owned by the token.
    pub fn resumer(&mut self) -> AsyncResumer {
        let keepalive = Global::new(self.ctx, self.coro);
        AsyncResumer { coro: SendCell(keepalive), jobs: self.ctx.job_sender() }
    }

    /// Completes the call immediately. The result is stored into the
    /// suspended frame right away (keeping it rooted); resumption is still
    /// postponed to the next scheduling pass.
    pub fn complete(mut self, value: Value) {
        self.coro.stack_object().set_top_async_return(value);
        self.resumer().resume();
    }
}

// Moves a value into a Send closure. The wrapped value is only touched on
// the runtime thread, inside the posted job.
struct SendCell<T>(T);

unsafe impl<T> Send for SendCell<T> {}

/// Send token that completes a pending async native call.
///
/// Resuming posts a job onto the context's event loop; the job runs on the
/// runtime thread, writes the result into the suspended frame and moves the
/// coroutine from Waiting to Ready. If the context is dropped before the job
/// runs, the token leaks its keepalive slot.
pub struct AsyncResumer {
    coro: SendCell<Global<Coroutine>>,
    jobs: JobSender,
}

impl AsyncResumer {
    /// Resumes with the result produced on the runtime thread.
    pub fn resume_with(
        self,
        produce: impl FnOnce(&mut Context) -> Value + Send + 'static,
    ) {
        let coro = self.coro;
        self.jobs.post(Box::new(move |ctx| {
            let scope = Scope::new(ctx);
            let coro_local = scope.local(coro.0.get());
            drop(coro);
            let value = produce(ctx);
            coro_local.get().stack_object().set_top_async_return(value);
            ctx.resume_coroutine(coro_local.handle())
        }));
    }

    /// Resumes without touching the result slot (it was already written by
    /// [`NativeAsyncFrame::complete`]).
    pub fn resume(self) {
        let coro = self.coro;
        self.jobs.post(Box::new(move |ctx| {
            let scope = Scope::new(ctx);
            let coro_local = scope.local(coro.0.get());
            drop(coro);
            ctx.resume_coroutine(coro_local.handle())
        }));
    }
}

/// Finalizer invoked during sweep; receives the inline data block.
pub type NativeObjectFinalizer = fn(data: *mut u8, size: usize);

#[repr(C)]
pub struct NativeObjectData {
    header: Header,
    size: usize,
    finalizer: Option<NativeObjectFinalizer>,
    data: [u8; 0],
}

heap_object!(
    /// An inline block of native bytes with an optional finalizer. The only
    /// kind that requires finalization; finalization order is undefined and
    /// finalizers must not touch managed objects.
    NativeObject,
    NativeObject,
    NativeObjectData
);

impl NativeObject {
    pub fn make(
        ctx: &mut Context,
        size: usize,
        finalizer: Option<NativeObjectFinalizer>,
    ) -> NativeObject {
        let data = alloc_varsize::<NativeObjectData>(ctx, ValueType::NativeObject, size);
        unsafe {
            (*data).size = size;
            (*data).finalizer = finalizer;
        }
        NativeObject(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn data_ptr(self) -> *mut u8 {
        unsafe { (*self.data()).data.as_mut_ptr() }
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<NativeObjectData>(self.len())
    }

    pub(crate) fn finalize(self) {
        unsafe {
            if let Some(finalizer) = (*self.data()).finalizer.take() {
                finalizer(self.data_ptr(), self.len());
            }
        }
    }
}

#[repr(C)]
pub struct NativePointerData {
    header: Header,
    ptr: *mut std::ffi::c_void,
}

heap_object!(
    /// An opaque pointer. The runtime does not own the pointee.
    NativePointer,
    NativePointer,
    NativePointerData
);

impl NativePointer {
    pub fn make(ctx: &mut Context, ptr: *mut std::ffi::c_void) -> NativePointer {
        let data = alloc_fixed::<NativePointerData>(ctx, ValueType::NativePointer);
        unsafe { (*data).ptr = ptr };
        NativePointer(Value::from_heap(data as *mut Header))
    }

    pub fn get(self) -> *mut std::ffi::c_void {
        unsafe { (*self.data()).ptr }
    }
}
