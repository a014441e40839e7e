//! The bytecode interpreter.
//!
//! A single dispatch loop over the code of the current frame. Between any
//! two opcodes every live reference sits in the coroutine stack or in the
//! register bank below, so any opcode may trigger a collection. The register
//! bank is reset at each instruction boundary.
//!
//! Call protocol: the call site pushes the callee followed by the argument
//! values. User functions get a frame and continue in the dispatch loop;
//! bound methods splice their receiver in front of the arguments and
//! re-dispatch; synchronous native functions are evaluated in place; async
//! native functions push an async frame, suspend the coroutine and leave the
//! result for the resume path to collect.

use tiro_core::Opcode;

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::Handle;
use crate::math;
use crate::objects::arrays::Array;
use crate::objects::coroutines::{
    Coroutine, CoroutineStack, CoroutineState, FrameKind, FRAME_POP_ONE_MORE,
};
use crate::objects::functions::{BoundMethod, Environment, Function, FunctionTemplate};
use crate::objects::hash_tables::HashTable;
use crate::objects::native::{NativeAsyncFrame, NativeAsyncFunction, NativeFrame, NativeFunction};
use crate::objects::strings::{StringBuilder, Symbol, TiroString};
use crate::objects::tuples::Tuple;
use crate::types;
use crate::value::{append_value_to_builder, equal, TypedValue, Value, ValueType};

const REGISTER_COUNT: usize = 16;

/// Interpreter state owned by the context.
pub(crate) struct Interpreter {
    // The coroutine currently being executed, or null.
    current: Value,
    registers: [Value; REGISTER_COUNT],
    registers_used: usize,
    next_coroutine_id: u64,
}

impl Interpreter {
    pub(crate) fn new() -> Interpreter {
        Interpreter {
            current: Value::null(),
            registers: [Value::null(); REGISTER_COUNT],
            registers_used: 0,
            next_coroutine_id: 1,
        }
    }

    pub(crate) fn walk(&self, visit: &mut dyn FnMut(Value)) {
        visit(self.current);
        for register in &self.registers[..self.registers_used] {
            visit(*register);
        }
    }
}

enum CallResult {
    /// A user frame was pushed; the dispatch loop continues there.
    Continue,
    /// The call was evaluated synchronously; its result replaced the callee.
    Evaluated,
    /// An async operation was started; the coroutine must suspend.
    Yield,
}

/// Creates a fresh coroutine (unscheduled) for a call of `function` with no
/// arguments.
pub(crate) fn make_coroutine(
    ctx: &mut Context,
    function: Handle<Value>,
) -> Result<Coroutine, RuntimeError> {
    if function.value().is_null() {
        return Err(RuntimeError::type_mismatch("Invalid function object."));
    }

    let id = {
        let interp = ctx.interpreter_mut();
        let id = interp.next_coroutine_id;
        interp.next_coroutine_id += 1;
        id
    };

    let scope = crate::handles::Scope::new(ctx);
    let initial_size = ctx.config().initial_stack_size;
    let stack = scope.local(CoroutineStack::make(ctx, initial_size));
    let name = scope.local(TiroString::make(ctx, &format!("Coroutine-{id}")));
    Ok(Coroutine::make(ctx, name.handle(), function, stack.handle()))
}

/// Runs `coro` until it completes or suspends.
pub(crate) fn run(ctx: &mut Context, coro: Handle<Coroutine>) -> Result<(), RuntimeError> {
    {
        let interp = ctx.interpreter_mut();
        if !interp.current.is_null() {
            return Err(RuntimeError::internal("Already running a coroutine."));
        }
        interp.current = coro.value();
    }

    let result = run_until_block(ctx, coro);

    {
        let interp = ctx.interpreter_mut();
        interp.current = Value::null();
        interp.registers_used = 0;
    }

    match result {
        Ok(()) => {
            let coro = coro.get();
            match coro.state() {
                CoroutineState::Done => {
                    let stack = coro.stack_object();
                    debug_assert_eq!(stack.top_value_count(), 1);
                    coro.set_result(stack.top_value(0));
                    coro.set_stack(Value::null());
                }
                CoroutineState::Waiting => {}
                state => {
                    return Err(RuntimeError::internal(format!(
                        "Unexpected coroutine state {} after running.",
                        state.name()
                    )));
                }
            }
            Ok(())
        }
        Err(err) => {
            // Leave the coroutine in a safely destructible terminal state.
            coro.get().set_state(CoroutineState::Done);
            coro.get().set_result(Value::null());
            coro.get().set_stack(Value::null());
            Err(err)
        }
    }
}

fn run_until_block(ctx: &mut Context, coro: Handle<Coroutine>) -> Result<(), RuntimeError> {
    debug_assert!(coro.get().state().is_runnable());

    let mut state = if coro.get().state() == CoroutineState::New {
        // First run: synthesize the initial call of the entry function.
        coro.get().set_state(CoroutineState::Running);
        let function = coro.get().function();
        push_value(ctx, function)?;
        match call_function(ctx, 0)? {
            CallResult::Continue => CoroutineState::Running,
            CallResult::Evaluated => CoroutineState::Done,
            CallResult::Yield => CoroutineState::Waiting,
        }
    } else {
        CoroutineState::Running
    };

    while state == CoroutineState::Running {
        let stack = current_stack(ctx);
        state = match stack.top_frame_kind() {
            FrameKind::User => run_frame(ctx)?,
            FrameKind::Async => run_async_frame(ctx),
        };
    }

    coro.get().set_state(state);
    Ok(())
}

// An async frame on top means the coroutine was just resumed: the result is
// ready inside the frame and simply has to be returned to the caller.
fn run_async_frame(ctx: &mut Context) -> CoroutineState {
    let stack = current_stack(ctx);
    debug_assert_eq!(stack.top_frame_kind(), FrameKind::Async);
    exit_function(ctx, stack.top_async_return())
}

fn current_coroutine(ctx: &mut Context) -> Coroutine {
    Coroutine::from_value_unchecked(ctx.interpreter_mut().current)
}

fn current_stack(ctx: &mut Context) -> CoroutineStack {
    current_coroutine(ctx).stack_object()
}

// ---- register bank ------------------------------------------------------

fn alloc_register(ctx: &mut Context, value: Value) -> Result<*mut Value, RuntimeError> {
    let interp = ctx.interpreter_mut();
    if interp.registers_used == REGISTER_COUNT {
        return Err(RuntimeError::internal("All interpreter registers are allocated."));
    }
    let slot = &mut interp.registers[interp.registers_used];
    interp.registers_used += 1;
    *slot = value;
    Ok(slot as *mut Value)
}

fn reg(ctx: &mut Context, value: Value) -> Result<Handle<Value>, RuntimeError> {
    Ok(unsafe { Handle::from_slot(alloc_register(ctx, value)?) })
}

// ---- bytecode decoding --------------------------------------------------

struct Decoder<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl<'a> Decoder<'a> {
    fn opcode(&mut self) -> Result<Opcode, RuntimeError> {
        let byte = self.u8()?;
        Opcode::from_raw(byte)
            .ok_or_else(|| RuntimeError::internal(format!("Invalid opcode {byte}.")))
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        let byte = *self
            .bytes
            .get(self.pc)
            .ok_or_else(|| RuntimeError::internal("Unexpected end of code."))?;
        self.pc += 1;
        Ok(byte)
    }

    fn u32(&mut self) -> Result<u32, RuntimeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn i64(&mut self) -> Result<i64, RuntimeError> {
        let bytes = self.take(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn f64(&mut self) -> Result<f64, RuntimeError> {
        let bytes = self.take(8)?;
        Ok(f64::from_bits(u64::from_be_bytes(bytes.try_into().expect("8 bytes"))))
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], RuntimeError> {
        if self.bytes.len() - self.pc < count {
            return Err(RuntimeError::internal("Unexpected end of code."));
        }
        let bytes = &self.bytes[self.pc..self.pc + count];
        self.pc += count;
        Ok(bytes)
    }
}

// ---- helpers ------------------------------------------------------------

/// Truthiness: false and null are false, everything else is true. Testing
/// the undefined sentinel is a fatal error.
fn is_truthy(ctx: &Context, value: Value) -> Result<bool, RuntimeError> {
    if value.same(ctx.get_undefined()) {
        return Err(RuntimeError::undefined_value("Undefined value in boolean context."));
    }
    Ok(!(value.is_null() || value.same(ctx.get_false())))
}

fn module_member(ctx: &mut Context, index: u32) -> Result<Value, RuntimeError> {
    let members = current_stack(ctx).frame_template().module().members();
    if index as usize >= members.len() {
        return Err(RuntimeError::internal("Module member index out of bounds."));
    }
    Ok(members.get(index as usize))
}

fn set_module_member(ctx: &mut Context, index: u32, value: Value) -> Result<(), RuntimeError> {
    let members = current_stack(ctx).frame_template().module().members();
    if index as usize >= members.len() {
        return Err(RuntimeError::internal("Module member index out of bounds."));
    }
    members.set(index as usize, value);
    Ok(())
}

fn module_symbol(ctx: &mut Context, index: u32) -> Result<Value, RuntimeError> {
    let member = module_member(ctx, index)?;
    if !member.is::<Symbol>() {
        return Err(RuntimeError::internal(format!(
            "The module member at index {index} must be a symbol."
        )));
    }
    Ok(member)
}

// Pushes onto the current value stack, growing the arena when full. The
// value is parked in a register across the growth allocation.
fn push_value(ctx: &mut Context, value: Value) -> Result<(), RuntimeError> {
    if current_stack(ctx).push_value(value) {
        return Ok(());
    }

    let saved = reg(ctx, value)?;
    grow_stack(ctx)?;
    let pushed = current_stack(ctx).push_value(saved.value());
    debug_assert!(pushed, "push must succeed after growth");
    Ok(())
}

fn reserve_values(ctx: &mut Context, count: u32) -> Result<(), RuntimeError> {
    while current_stack(ctx).value_capacity_remaining() < count {
        grow_stack(ctx)?;
    }
    Ok(())
}

// Doubles the stack arena (up to the configured maximum) and repoints the
// coroutine at the copy. All frame links are offsets, so only the coroutine's
// stack reference changes; the old stack becomes garbage.
fn grow_stack(ctx: &mut Context) -> Result<(), RuntimeError> {
    let stack = current_stack(ctx);
    let next_size = stack
        .capacity()
        .checked_mul(2)
        .ok_or_else(RuntimeError::stack_overflow)?;
    if next_size > ctx.config().max_stack_size {
        return Err(RuntimeError::stack_overflow());
    }

    let scope = crate::handles::Scope::new(ctx);
    let old = scope.local(stack);
    let new_stack = CoroutineStack::grow(ctx, old.handle(), next_size);
    current_coroutine(ctx).set_stack(new_stack.value());
    Ok(())
}

fn push_user_frame(
    ctx: &mut Context,
    template: Handle<FunctionTemplate>,
    environment: Handle<Value>,
    flags: u8,
) -> Result<(), RuntimeError> {
    if current_stack(ctx).push_user_frame(template.get(), environment.value(), flags) {
        return Ok(());
    }
    grow_stack(ctx)?;
    // A single growth step may not suffice for a frame with many locals.
    while !current_stack(ctx).push_user_frame(template.get(), environment.value(), flags) {
        grow_stack(ctx)?;
    }
    Ok(())
}

fn push_async_frame(
    ctx: &mut Context,
    function: Handle<NativeAsyncFunction>,
    argc: u32,
    flags: u8,
) -> Result<(), RuntimeError> {
    while !current_stack(ctx).push_async_frame(function.get(), argc, flags) {
        grow_stack(ctx)?;
    }
    Ok(())
}

// ---- calls --------------------------------------------------------------

fn call_function(ctx: &mut Context, argc: u32) -> Result<CallResult, RuntimeError> {
    debug_assert!(current_stack(ctx).top_value_count() >= argc + 1);
    enter_function(ctx, argc, argc, false)
}

fn call_method(ctx: &mut Context, argc: u32) -> Result<CallResult, RuntimeError> {
    debug_assert!(current_stack(ctx).top_value_count() >= argc + 2);

    if !current_stack(ctx).top_value(argc).is_null() {
        // LoadMethod produced a real method: the receiver below the
        // arguments becomes the first argument.
        enter_function(ctx, argc + 1, argc + 1, false)
    } else {
        // Plain attribute call: the null slot is popped with the frame.
        enter_function(ctx, argc + 1, argc, true)
    }
}

fn arity_error(need: u32, have: u32) -> RuntimeError {
    RuntimeError::type_mismatch(format!(
        "Invalid number of function arguments (need {need}, but have {have})."
    ))
}

fn enter_function(
    ctx: &mut Context,
    function_location: u32,
    argc: u32,
    pop_one_more: bool,
) -> Result<CallResult, RuntimeError> {
    let flags = if pop_one_more { FRAME_POP_ONE_MORE } else { 0 };
    let callee = current_stack(ctx).top_value(function_location);

    match callee.type_of() {
        // A user function: push a frame and continue interpreting there.
        // The final Ret in the callee restores the stack.
        ValueType::Function => {
            let function = Function::from_value_unchecked(callee);
            let template = reg(ctx, function.template().value())?;
            let environment = reg(ctx, function.environment())?;

            let params = FunctionTemplate::from_value_unchecked(template.value()).params();
            if params != argc {
                return Err(arity_error(params, argc));
            }

            push_user_frame(ctx, template.cast(), environment, flags)?;
            Ok(CallResult::Continue)
        }

        // A bound method: splice the bound receiver before the arguments
        // and re-dispatch on the wrapped function.
        ValueType::BoundMethod => {
            reserve_values(ctx, 1)?;

            let stack = current_stack(ctx);
            let pushed = stack.push_value(Value::null());
            debug_assert!(pushed);

            // The callee slot moved one position away from the top.
            let function_location = function_location + 1;
            let bound = BoundMethod::from_value_unchecked(stack.top_value(function_location));

            // Shift the arguments one slot towards the top (over the null
            // just pushed) and put `this` in front of them.
            for offset in 0..argc {
                stack.set_top_value(offset, stack.top_value(offset + 1));
            }
            stack.set_top_value(argc, bound.object());
            stack.set_top_value(function_location, bound.function());

            enter_function(ctx, function_location, argc + 1, pop_one_more)
        }

        // A synchronous native call: evaluate right here, leaving the result
        // in place of the callee.
        ValueType::NativeFunction => {
            let function = NativeFunction::from_value_unchecked(callee);
            if argc < function.params() {
                return Err(arity_error(function.params(), argc));
            }

            let result_slot = alloc_register(ctx, Value::null())?;
            let stack = current_stack(ctx);
            let args = if argc == 0 {
                std::ptr::NonNull::dangling().as_ptr()
            } else {
                stack.top_slot(argc - 1)
            };

            {
                let mut frame =
                    NativeFrame::new(ctx, function, args, argc as usize, result_slot);
                (function.function())(&mut frame)?;
            }

            let stack = current_stack(ctx);
            stack.pop_values(argc + if pop_one_more { 1 } else { 0 });
            stack.set_top_value(0, unsafe { *result_slot });
            Ok(CallResult::Evaluated)
        }

        // An async native call: push the suspended frame, hand the initiation
        // to the native code, then yield to the scheduler. Resumption makes
        // the interpreter find the async frame on top and return its result.
        ValueType::NativeAsyncFunction => {
            let function = NativeAsyncFunction::from_value_unchecked(callee);
            if argc < function.params() {
                return Err(arity_error(function.params(), argc));
            }

            let function_reg = reg(ctx, function.value())?;
            push_async_frame(ctx, function_reg.cast(), argc, flags)?;

            let stack = current_stack(ctx);
            let args = if argc == 0 {
                std::ptr::NonNull::dangling().as_ptr()
            } else {
                stack.args_ptr()
            };
            let coro = current_coroutine(ctx);
            let function = NativeAsyncFunction::from_value_unchecked(function_reg.value());

            let frame = NativeAsyncFrame::new(ctx, coro, function, args, argc as usize);
            (function.function())(frame)?;

            debug_assert_eq!(current_coroutine(ctx).state(), CoroutineState::Running);
            Ok(CallResult::Yield)
        }

        type_ => Err(RuntimeError::type_mismatch(format!(
            "Cannot call object of type {type_} as a function."
        ))),
    }
}

fn exit_function(ctx: &mut Context, return_value: Value) -> CoroutineState {
    let stack = current_stack(ctx);

    let mut pop_args = stack.top_frame_args();
    if stack.top_frame_flags() & FRAME_POP_ONE_MORE != 0 {
        pop_args += 1;
    }

    stack.pop_frame();
    stack.pop_values(pop_args);
    // The slot below the arguments held the callee.
    stack.set_top_value(0, return_value);

    if stack.has_frames() { CoroutineState::Running } else { CoroutineState::Done }
}

// ---- the dispatch loop --------------------------------------------------

fn run_frame(ctx: &mut Context) -> Result<CoroutineState, RuntimeError> {
    loop {
        ctx.interpreter_mut().registers_used = 0;

        let stack = current_stack(ctx);
        let code = stack.frame_template().code();
        let pc = stack.frame_pc() as usize;

        if pc >= code.len() {
            return Err(RuntimeError::internal(
                "Invalid program counter: end of code reached without return from function.",
            ));
        }

        let mut decoder = Decoder { bytes: code.as_bytes(), pc };
        let op = decoder.opcode()?;

        match op {
            Opcode::LoadNull => {
                stack.set_frame_pc(decoder.pc as u32);
                push_value(ctx, Value::null())?;
            }
            Opcode::LoadFalse => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = ctx.get_boolean(false);
                push_value(ctx, value)?;
            }
            Opcode::LoadTrue => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = ctx.get_boolean(true);
                push_value(ctx, value)?;
            }
            Opcode::LoadInt => {
                let constant = decoder.i64()?;
                stack.set_frame_pc(decoder.pc as u32);
                let value = ctx.get_integer(constant);
                push_value(ctx, value)?;
            }
            Opcode::LoadFloat => {
                let constant = decoder.f64()?;
                stack.set_frame_pc(decoder.pc as u32);
                let value = crate::objects::primitives::Float::make(ctx, constant).value();
                push_value(ctx, value)?;
            }
            Opcode::LoadParam => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                if index >= stack.top_frame_args() {
                    return Err(RuntimeError::internal("Parameter index out of bounds."));
                }
                let value = unsafe { *stack.arg_slot(index) };
                push_value(ctx, value)?;
            }
            Opcode::StoreParam => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                if index >= stack.top_frame_args() {
                    return Err(RuntimeError::internal("Parameter index out of bounds."));
                }
                unsafe { *stack.arg_slot(index) = stack.top_value(0) };
                stack.pop_value();
            }
            Opcode::LoadLocal => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                if index >= stack.locals_count() {
                    return Err(RuntimeError::internal("Local index out of bounds."));
                }
                let value = unsafe { *stack.local_slot(index) };
                if value.same(ctx.get_undefined()) {
                    return Err(RuntimeError::undefined_value("Local value is undefined."));
                }
                push_value(ctx, value)?;
            }
            Opcode::StoreLocal => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                if index >= stack.locals_count() {
                    return Err(RuntimeError::internal("Local index out of bounds."));
                }
                unsafe { *stack.local_slot(index) = stack.top_value(0) };
                stack.pop_value();
            }
            Opcode::LoadClosure => {
                stack.set_frame_pc(decoder.pc as u32);
                let environment = stack.frame_environment();
                if environment.is_null() {
                    return Err(RuntimeError::type_mismatch(
                        "Function does not have a closure.",
                    ));
                }
                push_value(ctx, environment)?;
            }
            Opcode::LoadContext => {
                let level = decoder.u32()?;
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let environment = resolve_environment(stack.top_value(0), level)?;
                if index as usize >= environment.len() {
                    return Err(RuntimeError::internal("Closure slot index out of bounds."));
                }
                let value = environment.get(index as usize);
                if value.same(ctx.get_undefined()) {
                    return Err(RuntimeError::undefined_value("Closure variable is undefined."));
                }
                stack.set_top_value(0, value);
            }
            Opcode::StoreContext => {
                let level = decoder.u32()?;
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let value = stack.top_value(1);
                let environment = resolve_environment(stack.top_value(0), level)?;
                if index as usize >= environment.len() {
                    return Err(RuntimeError::internal("Closure slot index out of bounds."));
                }
                environment.set(index as usize, value);
                stack.pop_values(2);
            }
            Opcode::LoadMember => {
                let member_index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let symbol = module_symbol(ctx, member_index)?;
                let symbol = reg(ctx, symbol)?;
                let object = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let found = types::load_member(ctx, object, symbol.cast())?;
                stack.set_top_value(0, found);
            }
            Opcode::StoreMember => {
                let member_index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let symbol = module_symbol(ctx, member_index)?;
                let symbol = reg(ctx, symbol)?;
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
                let object = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                types::store_member(ctx, object, symbol.cast(), value)?;
                stack.pop_values(2);
            }
            Opcode::LoadTupleMember => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let tuple = expect_tuple(stack.top_value(0))?;
                if index as usize >= tuple.len() {
                    return Err(RuntimeError::type_mismatch(format!(
                        "Tuple index {index} is too large for tuple of size {}.",
                        tuple.len()
                    )));
                }
                stack.set_top_value(0, tuple.get(index as usize));
            }
            Opcode::StoreTupleMember => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let tuple = expect_tuple(stack.top_value(0))?;
                if index as usize >= tuple.len() {
                    return Err(RuntimeError::type_mismatch(format!(
                        "Tuple index {index} is too large for tuple of size {}.",
                        tuple.len()
                    )));
                }
                tuple.set(index as usize, stack.top_value(1));
                stack.pop_values(2);
            }
            Opcode::LoadIndex => {
                stack.set_frame_pc(decoder.pc as u32);
                let index = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
                let object = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let value = types::load_index(ctx, object, index)?;
                stack.set_top_value(1, value);
                stack.pop_value();
            }
            Opcode::StoreIndex => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(2)) };
                let index = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
                let object = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                types::store_index(ctx, object, index, value)?;
                stack.pop_values(3);
            }
            Opcode::LoadModule => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                let value = module_member(ctx, index)?;
                push_value(ctx, value)?;
            }
            Opcode::StoreModule => {
                let index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                set_module_member(ctx, index, stack.top_value(0))?;
                stack.pop_value();
            }
            Opcode::LoadMethod => {
                let symbol_index = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let object = reg(ctx, stack.top_value(0))?;
                let symbol = module_symbol(ctx, symbol_index)?;
                let symbol = reg(ctx, symbol)?;

                let Some(found) = types::load_method(ctx, object, symbol.cast())? else {
                    return Err(RuntimeError::missing_symbol(format!(
                        "Failed to find attribute '{}' on object of type {}.",
                        Symbol::from_value_unchecked(symbol.value()).name().as_str(),
                        object.value().type_of()
                    )));
                };

                let stack = current_stack(ctx);
                if found.is::<crate::objects::classes::Method>() {
                    let method = crate::objects::classes::Method::from_value_unchecked(found);
                    stack.set_top_value(0, method.function());
                    push_value(ctx, object.value())?;
                } else {
                    stack.set_top_value(0, found);
                    push_value(ctx, Value::null())?;
                }
            }
            Opcode::Dup => {
                stack.set_frame_pc(decoder.pc as u32);
                push_value(ctx, stack.top_value(0))?;
            }
            Opcode::Pop => {
                stack.set_frame_pc(decoder.pc as u32);
                if stack.top_value_count() == 0 {
                    return Err(RuntimeError::internal("Cannot pop any more values."));
                }
                stack.pop_value();
            }
            Opcode::Rot2 => {
                stack.set_frame_pc(decoder.pc as u32);
                let a = stack.top_value(0);
                stack.set_top_value(0, stack.top_value(1));
                stack.set_top_value(1, a);
            }
            Opcode::Rot3 => {
                stack.set_frame_pc(decoder.pc as u32);
                let a = stack.top_value(0);
                stack.set_top_value(0, stack.top_value(1));
                stack.set_top_value(1, stack.top_value(2));
                stack.set_top_value(2, a);
            }
            Opcode::Rot4 => {
                stack.set_frame_pc(decoder.pc as u32);
                let a = stack.top_value(0);
                stack.set_top_value(0, stack.top_value(1));
                stack.set_top_value(1, stack.top_value(2));
                stack.set_top_value(2, stack.top_value(3));
                stack.set_top_value(3, a);
            }
            Opcode::Add => binary_math(ctx, stack, decoder.pc, math::add)?,
            Opcode::Sub => binary_math(ctx, stack, decoder.pc, math::sub)?,
            Opcode::Mul => binary_math(ctx, stack, decoder.pc, math::mul)?,
            Opcode::Div => binary_math(ctx, stack, decoder.pc, math::div)?,
            Opcode::Mod => binary_math(ctx, stack, decoder.pc, math::modulo)?,
            Opcode::Pow => binary_math(ctx, stack, decoder.pc, math::pow)?,
            Opcode::LSh => binary_math(ctx, stack, decoder.pc, math::left_shift)?,
            Opcode::RSh => binary_math(ctx, stack, decoder.pc, math::right_shift)?,
            Opcode::BAnd => binary_math(ctx, stack, decoder.pc, math::bitwise_and)?,
            Opcode::BOr => binary_math(ctx, stack, decoder.pc, math::bitwise_or)?,
            Opcode::BXor => binary_math(ctx, stack, decoder.pc, math::bitwise_xor)?,
            Opcode::LNot => {
                stack.set_frame_pc(decoder.pc as u32);
                let truthy = is_truthy(ctx, stack.top_value(0))?;
                stack.set_top_value(0, ctx.get_boolean(!truthy));
            }
            Opcode::BNot => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let result = math::bitwise_not(ctx, value)?;
                stack.set_top_value(0, result);
            }
            Opcode::UPos => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let result = math::unary_plus(value)?;
                stack.set_top_value(0, result);
            }
            Opcode::UNeg => {
                stack.set_frame_pc(decoder.pc as u32);
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let result = math::unary_minus(ctx, value)?;
                stack.set_top_value(0, result);
            }
            Opcode::Gt => comparison(ctx, stack, decoder.pc, |ord| ord.is_gt())?,
            Opcode::Gte => comparison(ctx, stack, decoder.pc, |ord| ord.is_ge())?,
            Opcode::Lt => comparison(ctx, stack, decoder.pc, |ord| ord.is_lt())?,
            Opcode::Lte => comparison(ctx, stack, decoder.pc, |ord| ord.is_le())?,
            Opcode::Eq => {
                stack.set_frame_pc(decoder.pc as u32);
                let result = equal(stack.top_value(1), stack.top_value(0));
                stack.set_top_value(1, ctx.get_boolean(result));
                stack.pop_value();
            }
            Opcode::NEq => {
                stack.set_frame_pc(decoder.pc as u32);
                let result = !equal(stack.top_value(1), stack.top_value(0));
                stack.set_top_value(1, ctx.get_boolean(result));
                stack.pop_value();
            }
            Opcode::MkArray => {
                let count = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let array_inner = Array::make(ctx);
                let array = reg(ctx, array_inner.value())?;
                for index in 0..count {
                    let stack = current_stack(ctx);
                    let slot = unsafe { Handle::<Value>::from_slot(stack.top_slot(count - 1 - index)) };
                    Array::push(array.cast(), ctx, slot);
                }
                let stack = current_stack(ctx);
                stack.pop_values(count);
                push_value(ctx, array.value())?;
            }
            Opcode::MkTuple => {
                let count = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let tuple_inner = Tuple::make(ctx, count as usize);
                let tuple = reg(ctx, tuple_inner.value())?;
                let stack = current_stack(ctx);
                for index in 0..count {
                    Tuple::from_value_unchecked(tuple.value())
                        .set(index as usize, stack.top_value(count - 1 - index));
                }
                stack.pop_values(count);
                push_value(ctx, tuple.value())?;
            }
            Opcode::MkMap => {
                let pairs = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                let kv_count = pairs
                    .checked_mul(2)
                    .ok_or_else(|| RuntimeError::internal("Map literal is too large."))?;

                let table_inner = HashTable::with_capacity(ctx, pairs as usize);
                let table = reg(ctx, table_inner.value())?;
                for pair in 0..pairs {
                    let stack = current_stack(ctx);
                    let key =
                        unsafe { Handle::<Value>::from_slot(stack.top_slot(kv_count - 1 - 2 * pair)) };
                    let value =
                        unsafe { Handle::<Value>::from_slot(stack.top_slot(kv_count - 2 - 2 * pair)) };
                    HashTable::set(table.cast(), ctx, key, value);
                }
                let stack = current_stack(ctx);
                stack.pop_values(kv_count);
                push_value(ctx, table.value())?;
            }
            Opcode::MkContext => {
                let size = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);

                let parent = stack.top_value(0);
                if !(parent.is_null() || parent.is::<Environment>()) {
                    return Err(RuntimeError::type_mismatch(
                        "Parent of closure context must be null or another closure context.",
                    ));
                }
                let parent = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let environment = Environment::make(ctx, size as usize, parent);
                current_stack(ctx).set_top_value(0, environment.value());
            }
            Opcode::MkClosure => {
                stack.set_frame_pc(decoder.pc as u32);

                let template = stack.top_value(1);
                if !template.is::<FunctionTemplate>() {
                    return Err(RuntimeError::type_mismatch(
                        "First argument to MkClosure must be a function template.",
                    ));
                }
                let environment = stack.top_value(0);
                if !(environment.is_null() || environment.is::<Environment>()) {
                    return Err(RuntimeError::type_mismatch(
                        "Second argument to MkClosure must be null or a closure context.",
                    ));
                }

                let template = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
                let environment = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let function = Function::make(ctx, template.cast(), environment);
                let stack = current_stack(ctx);
                stack.set_top_value(1, function.value());
                stack.pop_value();
            }
            Opcode::MkBuilder => {
                stack.set_frame_pc(decoder.pc as u32);
                let builder_inner = StringBuilder::make(ctx);
                let builder = reg(ctx, builder_inner.value())?;
                push_value(ctx, builder.value())?;
            }
            Opcode::BuilderAppend => {
                stack.set_frame_pc(decoder.pc as u32);

                if !stack.top_value(1).is::<StringBuilder>() {
                    return Err(RuntimeError::type_mismatch(
                        "First argument to BuilderAppend must be a StringBuilder.",
                    ));
                }
                let builder = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
                let value = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                append_value_to_builder(ctx, builder.cast(), value);
                current_stack(ctx).pop_value();
            }
            Opcode::BuilderString => {
                stack.set_frame_pc(decoder.pc as u32);

                if !stack.top_value(0).is::<StringBuilder>() {
                    return Err(RuntimeError::type_mismatch(
                        "Argument to BuilderString must be a StringBuilder.",
                    ));
                }
                let builder = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
                let string = StringBuilder::make_string(builder.cast(), ctx);
                current_stack(ctx).set_top_value(0, string.value());
            }
            Opcode::Jmp => {
                let target = decoder.u32()?;
                jump(stack, target)?;
            }
            Opcode::JmpTrue => {
                let target = decoder.u32()?;
                if is_truthy(ctx, stack.top_value(0))? {
                    jump(stack, target)?;
                } else {
                    stack.set_frame_pc(decoder.pc as u32);
                }
            }
            Opcode::JmpTruePop => {
                let target = decoder.u32()?;
                if is_truthy(ctx, stack.top_value(0))? {
                    jump(stack, target)?;
                } else {
                    stack.set_frame_pc(decoder.pc as u32);
                }
                stack.pop_value();
            }
            Opcode::JmpFalse => {
                let target = decoder.u32()?;
                if !is_truthy(ctx, stack.top_value(0))? {
                    jump(stack, target)?;
                } else {
                    stack.set_frame_pc(decoder.pc as u32);
                }
            }
            Opcode::JmpFalsePop => {
                let target = decoder.u32()?;
                if !is_truthy(ctx, stack.top_value(0))? {
                    jump(stack, target)?;
                } else {
                    stack.set_frame_pc(decoder.pc as u32);
                }
                stack.pop_value();
            }
            Opcode::Call => {
                let argc = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                match call_function(ctx, argc)? {
                    CallResult::Continue | CallResult::Evaluated => {
                        return Ok(CoroutineState::Running);
                    }
                    CallResult::Yield => return Ok(CoroutineState::Waiting),
                }
            }
            Opcode::CallMethod => {
                let argc = decoder.u32()?;
                stack.set_frame_pc(decoder.pc as u32);
                match call_method(ctx, argc)? {
                    CallResult::Continue | CallResult::Evaluated => {
                        return Ok(CoroutineState::Running);
                    }
                    CallResult::Yield => return Ok(CoroutineState::Waiting),
                }
            }
            Opcode::Ret => {
                return Ok(exit_function(ctx, stack.top_value(0)));
            }
            Opcode::AssertFail => {
                let expr = stack.top_value(1);
                let message = stack.top_value(0);

                if !expr.is::<TiroString>() {
                    return Err(RuntimeError::type_mismatch(
                        "Assertion expression message must be a string value.",
                    ));
                }
                let expr = TiroString::from_value_unchecked(expr);

                return Err(if message.is_null() {
                    RuntimeError::assertion(format!("Assertion `{}` failed.", expr.as_str()))
                } else if message.is::<TiroString>() {
                    let message = TiroString::from_value_unchecked(message);
                    RuntimeError::assertion(format!(
                        "Assertion `{}` failed: {}",
                        expr.as_str(),
                        message.as_str()
                    ))
                } else {
                    RuntimeError::type_mismatch(
                        "Assertion error message must be a string or null.",
                    )
                });
            }
        }
    }
}

fn binary_math(
    ctx: &mut Context,
    stack: CoroutineStack,
    next_pc: usize,
    op: fn(&mut Context, Handle<Value>, Handle<Value>) -> Result<Value, RuntimeError>,
) -> Result<(), RuntimeError> {
    stack.set_frame_pc(next_pc as u32);
    let a = unsafe { Handle::<Value>::from_slot(stack.top_slot(1)) };
    let b = unsafe { Handle::<Value>::from_slot(stack.top_slot(0)) };
    let result = op(ctx, a, b)?;
    stack.set_top_value(1, result);
    stack.pop_value();
    Ok(())
}

fn comparison(
    ctx: &mut Context,
    stack: CoroutineStack,
    next_pc: usize,
    pick: fn(std::cmp::Ordering) -> bool,
) -> Result<(), RuntimeError> {
    stack.set_frame_pc(next_pc as u32);
    let ordering = math::compare(stack.top_value(1), stack.top_value(0))?;
    stack.set_top_value(1, ctx.get_boolean(pick(ordering)));
    stack.pop_value();
    Ok(())
}

fn jump(stack: CoroutineStack, target: u32) -> Result<(), RuntimeError> {
    let code = stack.frame_template().code();
    if target as usize >= code.len() {
        return Err(RuntimeError::internal("Jump destination is out of bounds."));
    }
    stack.set_frame_pc(target);
    Ok(())
}

fn resolve_environment(value: Value, level: u32) -> Result<Environment, RuntimeError> {
    if !value.is::<Environment>() {
        return Err(RuntimeError::type_mismatch("The value is not a closure context."));
    }
    Environment::from_value_unchecked(value)
        .parent_at(level as usize)
        .ok_or_else(|| RuntimeError::internal("Closure context level is out of bounds."))
}

fn expect_tuple(value: Value) -> Result<Tuple, RuntimeError> {
    if !value.is::<Tuple>() {
        return Err(RuntimeError::type_mismatch("The value must be a tuple."));
    }
    Ok(Tuple::from_value_unchecked(value))
}
