//! The runtime context.
//!
//! A [`Context`] owns everything: the heap and collector, the root set, the
//! interpreter, the type system, the interner, the module table, the ready
//! queue and the event loop. All runtime operations take the context by
//! mutable reference; there is exactly one mutator thread and no locks.
//!
//! Scheduling is cooperative: [`Context::run`] creates a coroutine for the
//! given function, drains the ready queue, and then pumps the event loop
//! until the coroutine is done. Coroutines become ready again when an async
//! native completion posts their resume job onto the loop.

use std::time::Instant;

use serde::Deserialize;

use crate::error::RuntimeError;
use crate::eventloop::{EventLoop, JobSender};
use crate::handles::{GlobalSet, Handle, RootedStack, Scope};
use crate::heap::collector::{self, Collector, GcTrigger, DEFAULT_INITIAL_THRESHOLD};
use crate::heap::{Header, Heap};
use crate::interpreter::{self, Interpreter};
use crate::objects::coroutines::{
    Coroutine, CoroutineState, INITIAL_STACK_SIZE, MAX_STACK_SIZE,
};
use crate::objects::hash_tables::HashTable;
use crate::objects::modules::Module;
use crate::objects::primitives::{Boolean, Integer, SmallInt, Undefined};
use crate::objects::strings::{Symbol, TiroString};
use crate::types::{self, TypeSystem};
use crate::value::{TypedValue, Value, ValueType};

/// Tunables of a context. All fields have sensible defaults; the struct can
/// be deserialized from an embedder's configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Heap size (bytes) at which the first automatic collection runs.
    pub initial_gc_threshold: usize,
    /// Size (bytes) of a fresh coroutine stack arena.
    pub initial_stack_size: u32,
    /// Hard limit (bytes) for a coroutine stack arena.
    pub max_stack_size: u32,
}

impl Default for ContextConfig {
    fn default() -> ContextConfig {
        ContextConfig {
            initial_gc_threshold: DEFAULT_INITIAL_THRESHOLD,
            initial_stack_size: INITIAL_STACK_SIZE,
            max_stack_size: MAX_STACK_SIZE,
        }
    }
}

pub struct Context {
    // Declared (and therefore dropped) first: jobs still queued on the loop
    // may own global roots, and unregistering them needs the global set —
    // and everything else — to still be alive.
    event_loop: EventLoop,

    heap: Heap,
    collector: Collector,
    rooted: RootedStack,
    globals: Box<GlobalSet>,
    interpreter: Interpreter,
    types: TypeSystem,
    config: ContextConfig,

    // Singletons.
    true_: Value,
    false_: Value,
    undefined: Value,
    stop_iteration: Value,

    // Interner and module registry (hash tables).
    interned_strings: Value,
    modules: Value,

    // FIFO ready queue, linked through Coroutine::next_ready.
    first_ready: Value,
    last_ready: Value,

    running: bool,
    coroutines_executing: bool,

    start_time: Instant,
    loop_timestamp: i64,
}

impl Context {
    pub fn new() -> Context {
        Context::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Context {
        assert!(config.initial_stack_size >= 128, "initial stack size too small");
        assert!(config.max_stack_size >= config.initial_stack_size);

        let mut ctx = Context {
            heap: Heap::new(),
            collector: Collector::new(config.initial_gc_threshold),
            rooted: RootedStack::new(),
            globals: GlobalSet::new(),
            interpreter: Interpreter::new(),
            types: TypeSystem::new(),
            event_loop: EventLoop::new(),
            config,
            true_: Value::null(),
            false_: Value::null(),
            undefined: Value::null(),
            stop_iteration: Value::null(),
            interned_strings: Value::null(),
            modules: Value::null(),
            first_ready: Value::null(),
            last_ready: Value::null(),
            running: false,
            coroutines_executing: false,
            start_time: Instant::now(),
            loop_timestamp: 0,
        };

        // Bootstrap order matters: the undefined singleton is needed by
        // every environment and coroutine stack that follows.
        ctx.undefined = Undefined::make(&mut ctx).value();
        ctx.true_ = Boolean::make(&mut ctx, true).value();
        ctx.false_ = Boolean::make(&mut ctx, false).value();
        ctx.interned_strings = HashTable::make(&mut ctx).value();
        ctx.modules = HashTable::make(&mut ctx).value();
        ctx.stop_iteration = ctx.get_symbol("STOP_ITERATION").value();
        types::init(&mut ctx);
        ctx
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub(crate) fn collector_mut(&mut self) -> &mut Collector {
        &mut self.collector
    }

    pub(crate) fn rooted_stack_mut(&mut self) -> &mut RootedStack {
        &mut self.rooted
    }

    pub(crate) fn global_set_mut(&mut self) -> &mut GlobalSet {
        &mut self.globals
    }

    pub(crate) fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    pub(crate) fn types(&self) -> &TypeSystem {
        &self.types
    }

    pub(crate) fn types_mut(&mut self) -> &mut TypeSystem {
        &mut self.types
    }

    pub(crate) fn job_sender(&self) -> JobSender {
        self.event_loop.sender()
    }

    // ---- allocation & collection ---------------------------------------

    /// Allocates raw object storage, collecting first once the automatic
    /// threshold is reached. Any caller must therefore have every live
    /// reference rooted.
    pub(crate) fn allocate(&mut self, type_: ValueType, size: usize) -> *mut Header {
        if self.heap.allocated_bytes() >= self.collector.next_threshold() {
            collector::collect(self, GcTrigger::Automatic);
        }
        self.heap.allocate(type_, size)
    }

    /// Forces a full collection.
    pub fn collect(&mut self) {
        collector::collect(self, GcTrigger::Forced);
    }

    /// Visits every root: the rooted stack, global slots, the interpreter's
    /// registers and current coroutine, the singleton values, the interner,
    /// the module registry, the ready queue and the method tables.
    pub(crate) fn walk_roots(&self, visit: &mut dyn FnMut(Value)) {
        visit(self.true_);
        visit(self.false_);
        visit(self.undefined);
        visit(self.stop_iteration);
        visit(self.interned_strings);
        visit(self.modules);
        visit(self.first_ready);
        visit(self.last_ready);

        self.rooted.walk(visit);
        self.globals.walk(visit);
        self.interpreter.walk(visit);
        self.types.walk(visit);
    }

    // ---- singletons & factories ----------------------------------------

    pub fn get_boolean(&self, value: bool) -> Value {
        if value { self.true_ } else { self.false_ }
    }

    pub fn get_true(&self) -> Value {
        self.true_
    }

    pub fn get_false(&self) -> Value {
        self.false_
    }

    pub fn get_undefined(&self) -> Value {
        self.undefined
    }

    /// The sentinel symbol iterators return when exhausted.
    pub fn get_stop_iteration(&self) -> Symbol {
        Symbol::from_value_unchecked(self.stop_iteration)
    }

    /// Returns a value representing `value`: embedded when it fits, a heap
    /// integer otherwise.
    pub fn get_integer(&mut self, value: i64) -> Value {
        if SmallInt::fits(value) {
            Value::from_embedded_integer(value)
        } else {
            Integer::make(self, value).value()
        }
    }

    /// Interns `string`, returning the canonical instance.
    pub fn intern_string(&mut self, string: Handle<TiroString>) -> TiroString {
        if string.get().interned() {
            return string.get();
        }
        self.intern_impl(string).0
    }

    /// Returns the interned string with the given contents.
    pub fn get_interned_string(&mut self, contents: &str) -> TiroString {
        let scope = Scope::new(self);
        let string = scope.local(TiroString::make(self, contents));
        self.intern_string(string.handle())
    }

    /// Returns the unique symbol for the given name.
    pub fn get_symbol(&mut self, name: &str) -> Symbol {
        let scope = Scope::new(self);
        let string = scope.local(TiroString::make(self, name));
        self.get_symbol_for(string.handle())
    }

    /// Returns the unique symbol for the given string.
    pub fn get_symbol_for(&mut self, string: Handle<TiroString>) -> Symbol {
        self.intern_impl(string).1
    }

    // Canonicalizes the string and returns it with its symbol. The interner
    // maps interned String -> Symbol; content-equal strings resolve to the
    // same entry.
    fn intern_impl(&mut self, string: Handle<TiroString>) -> (TiroString, Symbol) {
        let table = HashTable::from_value_unchecked(self.interned_strings);
        if let Some((existing_string, existing_symbol)) = table.find(string.value()) {
            debug_assert!(TiroString::from_value_unchecked(existing_string).interned());
            return (
                TiroString::from_value_unchecked(existing_string),
                Symbol::from_value_unchecked(existing_symbol),
            );
        }

        let scope = Scope::new(self);
        let symbol = scope.local(Symbol::make(self, string).value());
        let table = scope.local(HashTable::from_value_unchecked(self.interned_strings));
        HashTable::set(table.handle(), self, string.erased(), symbol.handle());
        string.get().set_interned(true);
        (string.get(), Symbol::from_value_unchecked(symbol.value()))
    }

    // ---- modules --------------------------------------------------------

    /// Registers a module. Fails (returns false) if a module with that name
    /// is already registered.
    pub fn add_module(&mut self, module: Handle<Module>) -> bool {
        let scope = Scope::new(self);
        let name = scope.local(module.get().name());
        let modules = HashTable::from_value_unchecked(self.modules);
        if modules.contains(name.value()) {
            return false;
        }

        let name = scope.local(self.intern_string(name.handle()));
        let modules = scope.local(HashTable::from_value_unchecked(self.modules));
        HashTable::set(modules.handle(), self, name.handle().erased(), module.erased());
        true
    }

    /// Finds a registered module by name.
    pub fn find_module(&mut self, name: &str) -> Option<Module> {
        let scope = Scope::new(self);
        let key = scope.local(TiroString::make(self, name));
        let modules = HashTable::from_value_unchecked(self.modules);
        modules.get(key.value()).map(Module::from_value_unchecked)
    }

    /// Materialises a compiled module, runs its init function and registers
    /// nothing; see [`Context::add_module`] for registration.
    pub fn load_module(
        &mut self,
        compiled: &tiro_core::CompiledModule,
    ) -> Result<Module, RuntimeError> {
        crate::load::load_module(self, compiled)
    }

    /// Creates and registers the builtin `std` module.
    pub fn load_std_module(&mut self) -> Result<Module, RuntimeError> {
        let scope = Scope::new(self);
        let module = scope.local(crate::stdlib::create_std_module(self)?);
        if !self.add_module(module.handle()) {
            return Err(RuntimeError::module_load("The module 'std' is already registered."));
        }
        Ok(module.get())
    }

    // ---- running --------------------------------------------------------

    /// Executes `function` with no arguments on a fresh coroutine and blocks
    /// until it completes, pumping the event loop in between.
    pub fn run(&mut self, function: Handle<Value>) -> Result<Value, RuntimeError> {
        if self.running {
            return Err(RuntimeError::internal(
                "Already running, nested calls are not allowed.",
            ));
        }

        self.running = true;
        let result = self.run_impl(function);
        self.running = false;
        result
    }

    fn run_impl(&mut self, function: Handle<Value>) -> Result<Value, RuntimeError> {
        let scope = Scope::new(self);
        let coro = scope.local(self.make_coroutine(function)?);

        while coro.get().state() != CoroutineState::Done {
            let job = self.event_loop.wait_for_job();
            job(self)?;
        }
        Ok(coro.get().result())
    }

    /// Creates a coroutine for `function` and schedules it. Scheduling may
    /// start executing it right away unless a scheduling pass is already on
    /// the stack.
    pub fn make_coroutine(&mut self, function: Handle<Value>) -> Result<Coroutine, RuntimeError> {
        let scope = Scope::new(self);
        let coro = scope.local(interpreter::make_coroutine(self, function)?);
        self.schedule_coroutine(coro.handle())?;
        Ok(coro.get())
    }

    /// The timestamp (milliseconds since context construction) taken at the
    /// start of the current scheduling pass. Every coroutine executed in the
    /// same pass observes the same value.
    pub fn loop_timestamp(&self) -> i64 {
        self.loop_timestamp
    }

    /// Moves a waiting coroutine to the ready queue. Called from resume jobs
    /// posted by the async bridge.
    pub(crate) fn resume_coroutine(&mut self, coro: Handle<Coroutine>) -> Result<(), RuntimeError> {
        if coro.get().state() != CoroutineState::Waiting {
            return Err(RuntimeError::internal(format!(
                "Cannot resume a coroutine in state {}.",
                coro.get().state().name()
            )));
        }
        coro.get().set_state(CoroutineState::Ready);
        self.schedule_coroutine(coro)
    }

    fn schedule_coroutine(&mut self, coro: Handle<Coroutine>) -> Result<(), RuntimeError> {
        debug_assert!(coro.get().state().is_runnable());
        debug_assert!(coro.get().next_ready().is_null());

        if self.last_ready.is_null() {
            self.first_ready = coro.value();
            self.last_ready = coro.value();
        } else {
            Coroutine::from_value_unchecked(self.last_ready).set_next_ready(coro.value());
            self.last_ready = coro.value();
        }

        self.execute_coroutines()
    }

    // Drains the ready queue. Reentrancy-guarded: scheduling from within a
    // running coroutine just enqueues, the outer pass picks it up.
    fn execute_coroutines(&mut self) -> Result<(), RuntimeError> {
        if self.coroutines_executing {
            return Ok(());
        }

        self.coroutines_executing = true;
        self.loop_timestamp = self.start_time.elapsed().as_millis() as i64;

        let result = self.drain_ready_queue();
        self.coroutines_executing = false;
        result
    }

    fn drain_ready_queue(&mut self) -> Result<(), RuntimeError> {
        loop {
            let Some(coro) = self.dequeue_coroutine() else {
                return Ok(());
            };
            let scope = Scope::new(self);
            let coro = scope.local(coro);
            tracing::trace!(
                target: "tiro::scheduler",
                coroutine = coro.get().name().as_str(),
                "running coroutine"
            );
            interpreter::run(self, coro.handle())?;
        }
    }

    fn dequeue_coroutine(&mut self) -> Option<Coroutine> {
        if self.first_ready.is_null() {
            return None;
        }

        let next = Coroutine::from_value_unchecked(self.first_ready);
        self.first_ready = next.next_ready();
        next.set_next_ready(Value::null());
        if self.first_ready.is_null() {
            self.last_ready = Value::null();
        }
        Some(next)
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}
