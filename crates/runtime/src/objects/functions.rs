//! Functions, templates, environments and bound methods.
//!
//! A function value pairs a template (the static properties shared by every
//! instance produced from one declaration: name, module, parameter and local
//! counts, code) with an optional environment of captured variables.
//! Environments chain through their parent pointer; the chain length equals
//! the lexical depth.

use crate::context::Context;
use crate::handles::Handle;
use crate::heap::Header;
use crate::objects::modules::Module;
use crate::objects::strings::TiroString;
use crate::objects::{alloc_fixed, alloc_varsize, heap_object};
use crate::value::{TypedValue, Value, ValueType};

#[repr(C)]
pub struct CodeData {
    header: Header,
    size: usize,
    data: [u8; 0],
}

heap_object!(
    /// An immutable byte sequence holding executable bytecode.
    Code,
    Code,
    CodeData
);

impl Code {
    pub fn make(ctx: &mut Context, code: &[u8]) -> Code {
        let data = alloc_varsize::<CodeData>(ctx, ValueType::Code, code.len());
        unsafe {
            (*data).size = code.len();
            std::ptr::copy_nonoverlapping(code.as_ptr(), (*data).data.as_mut_ptr(), code.len());
        }
        Code(Value::from_heap(data as *mut Header))
    }

    pub fn len(self) -> usize {
        unsafe { (*self.data()).size }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts((*self.data()).data.as_ptr(), self.len()) }
    }

    pub(crate) fn object_size(self) -> usize {
        crate::objects::varsize_object::<CodeData>(self.len())
    }
}

#[repr(C)]
pub struct FunctionTemplateData {
    header: Header,
    name: Value,
    module: Value,
    code: Value,
    params: u32,
    locals: u32,
}

heap_object!(
    /// The static half of a function: shared by all instances produced from
    /// the same declaration.
    FunctionTemplate,
    FunctionTemplate,
    FunctionTemplateData
);

impl FunctionTemplate {
    pub fn make(
        ctx: &mut Context,
        name: Handle<TiroString>,
        module: Handle<Module>,
        params: u32,
        locals: u32,
        code: Handle<Code>,
    ) -> FunctionTemplate {
        let data = alloc_fixed::<FunctionTemplateData>(ctx, ValueType::FunctionTemplate);
        unsafe {
            (*data).name = name.value();
            (*data).module = module.value();
            (*data).code = code.value();
            (*data).params = params;
            (*data).locals = locals;
        }
        FunctionTemplate(Value::from_heap(data as *mut Header))
    }

    pub fn name(self) -> TiroString {
        TiroString::from_value_unchecked(unsafe { (*self.data()).name })
    }

    pub fn module(self) -> Module {
        Module::from_value_unchecked(unsafe { (*self.data()).module })
    }

    pub fn code(self) -> Code {
        Code::from_value_unchecked(unsafe { (*self.data()).code })
    }

    pub fn params(self) -> u32 {
        unsafe { (*self.data()).params }
    }

    pub fn locals(self) -> u32 {
        unsafe { (*self.data()).locals }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).name);
            visit((*self.data()).module);
            visit((*self.data()).code);
        }
    }
}

#[repr(C)]
pub struct EnvironmentData {
    header: Header,
    parent: Value,
    size: usize,
    values: [Value; 0],
}

heap_object!(
    /// Captured variables of a closure. Slots start out undefined; reading
    /// an undefined slot is a fatal error at the access site.
    Environment,
    Environment,
    EnvironmentData
);

impl Environment {
    /// Creates an environment with `size` undefined slots. `parent` must be
    /// null or another environment.
    pub fn make(ctx: &mut Context, size: usize, parent: Handle<Value>) -> Environment {
        debug_assert!(parent.value().is_null() || parent.value().is::<Environment>());

        let undefined = ctx.get_undefined();
        let data = alloc_varsize::<EnvironmentData>(
            ctx,
            ValueType::Environment,
            size * size_of::<Value>(),
        );
        unsafe {
            (*data).parent = parent.value();
            (*data).size = size;
            let slots = (*data).values.as_mut_ptr();
            for index in 0..size {
                *slots.add(index) = undefined;
            }
        }
        Environment(Value::from_heap(data as *mut Header))
    }

    pub fn parent(self) -> Value {
        unsafe { (*self.data()).parent }
    }

    /// Walks `level` parents up the chain; `level` 0 returns self. Returns
    /// `None` when the chain is shorter than `level`.
    pub fn parent_at(self, level: usize) -> Option<Environment> {
        let mut current = self;
        for _ in 0..level {
            let parent = current.parent();
            if parent.is_null() {
                return None;
            }
            current = Environment::from_value_unchecked(parent);
        }
        Some(current)
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
        crate::objects::varsize_object::<EnvironmentData>(self.len() * size_of::<Value>())
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        visit(self.parent());
        for index in 0..self.len() {
            visit(self.get(index));
        }
    }
}

#[repr(C)]
pub struct FunctionData {
    header: Header,
    template: Value,
    environment: Value,
}

heap_object!(
    /// A callable function value: template plus captured environment (null
    /// for toplevel functions).
    Function,
    Function,
    FunctionData
);

impl Function {
    pub fn make(
        ctx: &mut Context,
        template: Handle<FunctionTemplate>,
        environment: Handle<Value>,
    ) -> Function {
        debug_assert!(
            environment.value().is_null() || environment.value().is::<Environment>()
        );
        let data = alloc_fixed::<FunctionData>(ctx, ValueType::Function);
        unsafe {
            (*data).template = template.value();
            (*data).environment = environment.value();
        }
        Function(Value::from_heap(data as *mut Header))
    }

    pub fn template(self) -> FunctionTemplate {
        FunctionTemplate::from_value_unchecked(unsafe { (*self.data()).template })
    }

    /// The captured environment, or null.
    pub fn environment(self) -> Value {
        unsafe { (*self.data()).environment }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).template);
            visit((*self.data()).environment);
        }
    }
}

#[repr(C)]
pub struct BoundMethodData {
    header: Header,
    function: Value,
    object: Value,
}

heap_object!(
    /// A function with a bound `this`, used when a method reference escapes
    /// as a value. Calling it splices the bound object before the arguments.
    BoundMethod,
    BoundMethod,
    BoundMethodData
);

impl BoundMethod {
    pub fn make(ctx: &mut Context, function: Handle<Value>, object: Handle<Value>) -> BoundMethod {
        let data = alloc_fixed::<BoundMethodData>(ctx, ValueType::BoundMethod);
        unsafe {
            (*data).function = function.value();
            (*data).object = object.value();
        }
        BoundMethod(Value::from_heap(data as *mut Header))
    }

    pub fn function(self) -> Value {
        unsafe { (*self.data()).function }
    }

    pub fn object(self) -> Value {
        unsafe { (*self.data()).object }
    }

    pub(crate) fn walk(self, visit: &mut dyn FnMut(Value)) {
        unsafe {
            visit((*self.data()).function);
            visit((*self.data()).object);
        }
    }
}
