//! The builtin `std` module.
//!
//! Ordinary consumer of the native function API: printing, builders,
//! dynamic objects, buffers, coroutine launching and an async sleep timer.
//! Call [`Context::load_std_module`](crate::Context::load_std_module) to
//! make it importable.

use std::io::Write;

use crate::context::Context;
use crate::error::RuntimeError;
use crate::handles::Scope;
use crate::math::{extract_size, try_extract_integer};
use crate::module_builder::ModuleBuilder;
use crate::objects::buffers::Buffer;
use crate::objects::classes::DynamicObject;
use crate::objects::modules::Module;
use crate::objects::native::{NativeAsyncFrame, NativeFrame};
use crate::objects::strings::{StringBuilder, TiroString};
use crate::value::{append_value_to_builder, TypedValue, Value};

pub(crate) fn create_std_module(ctx: &mut Context) -> Result<Module, RuntimeError> {
    let scope = Scope::new(ctx);
    let no_values = scope.local(Value::null());

    let mut builder = ModuleBuilder::new(ctx, "std");
    builder
        .add_function(ctx, "print", 0, no_values.handle(), print)?
        .add_function(ctx, "new_string_builder", 0, no_values.handle(), new_string_builder)?
        .add_function(ctx, "new_object", 0, no_values.handle(), new_object)?
        .add_function(ctx, "new_buffer", 1, no_values.handle(), new_buffer)?
        .add_function(ctx, "launch", 1, no_values.handle(), launch)?
        .add_function(ctx, "loop_timestamp", 0, no_values.handle(), loop_timestamp)?
        .add_async_function(ctx, "sleep", 1, no_values.handle(), sleep)?
        .add_function(ctx, "to_utf8", 1, no_values.handle(), to_utf8)?;
    Ok(builder.build(ctx))
}

fn print(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    // The argument slots stay rooted on the coroutine stack for the whole
    // call, so the handles can be collected up front.
    let args: Vec<_> = (0..frame.arg_count()).map(|index| frame.arg(index)).collect();

    let ctx = frame.ctx();
    let scope = Scope::new(ctx);
    let builder = scope.local(StringBuilder::make(ctx));
    for (index, arg) in args.iter().enumerate() {
        if index != 0 {
            StringBuilder::append_str(builder.handle(), ctx, " ");
        }
        append_value_to_builder(ctx, builder.handle(), *arg);
    }
    StringBuilder::append_str(builder.handle(), ctx, "\n");

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    let _ = stdout.write_all(builder.get().as_bytes());
    let _ = stdout.flush();
    Ok(())
}

fn new_string_builder(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let builder = StringBuilder::make(frame.ctx());
    frame.result(builder.value());
    Ok(())
}

fn new_object(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let object = DynamicObject::make(frame.ctx());
    frame.result(object.value());
    Ok(())
}

fn new_buffer(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let size = extract_size(frame.arg(0).value())
        .map_err(|_| RuntimeError::type_mismatch("Invalid size argument for buffer creation."))?;
    let buffer = Buffer::make(frame.ctx(), size);
    frame.result(buffer.value());
    Ok(())
}

fn launch(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let function = frame.arg(0);
    let coro = frame.ctx().make_coroutine(function)?;
    frame.result(coro.value());
    Ok(())
}

fn loop_timestamp(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let timestamp = frame.ctx().loop_timestamp();
    let value = frame.ctx().get_integer(timestamp);
    frame.result(value);
    Ok(())
}

// Suspends the calling coroutine for the given number of milliseconds. The
// timer thread completes through the resume token, never touching runtime
// state directly.
fn sleep(mut frame: NativeAsyncFrame<'_>) -> Result<(), RuntimeError> {
    let millis = try_extract_integer(frame.arg(0).value())
        .ok_or_else(|| RuntimeError::type_mismatch("Expected a number in milliseconds."))?;
    let millis = millis.max(0) as u64;

    let resumer = frame.resumer();
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(millis));
        resumer.resume_with(|_ctx| Value::null());
    });
    Ok(())
}

fn to_utf8(frame: &mut NativeFrame<'_>) -> Result<(), RuntimeError> {
    let arg = frame.arg(0);
    if !arg.value().is::<TiroString>() {
        return Err(RuntimeError::type_mismatch("to_utf8() requires a string argument."));
    }

    let ctx = frame.ctx();
    let string = arg.cast::<TiroString>();
    let buffer = Buffer::make(ctx, string.get().len());
    // Strings are utf-8 encoded already; this is a byte copy.
    unsafe {
        std::ptr::copy_nonoverlapping(
            string.get().data_ptr(),
            buffer.data_ptr_mut(),
            string.get().len(),
        );
    }
    frame.result(buffer.value());
    Ok(())
}
