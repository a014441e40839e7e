//! Mark-and-sweep garbage collector.
//!
//! Marking starts from the context's root set (rooted stack, globals, the
//! interpreter's registers and current coroutine, the module table, the
//! interner and the singleton values) and traces the object graph with an
//! explicit gray worklist, so arbitrarily deep graphs cannot overflow the
//! native stack. Sweeping walks the live-object list, finalizes and frees
//! everything unmarked, and clears the mark bit on survivors.

use std::time::Instant;

use crate::context::Context;
use crate::heap::Heap;
use crate::objects;
use crate::value::Value;

/// Why a collection ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcTrigger {
    /// The allocation threshold was reached.
    Automatic,
    /// The embedder requested a collection.
    Forced,
    /// A raw allocation failed and the heap is retried after collecting.
    AllocFailure,
}

impl GcTrigger {
    fn name(self) -> &'static str {
        match self {
            GcTrigger::Automatic => "Automatic",
            GcTrigger::Forced => "Forced",
            GcTrigger::AllocFailure => "AllocFailure",
        }
    }
}

/// Default heap size at which the first automatic collection runs.
pub const DEFAULT_INITIAL_THRESHOLD: usize = 1 << 20;

/// Collection state owned by the context.
pub struct Collector {
    gray: Vec<Value>,
    next_threshold: usize,
    last_duration_ms: f64,
    collections: u64,
}

impl Collector {
    pub(crate) fn new(initial_threshold: usize) -> Collector {
        Collector {
            gray: Vec::new(),
            next_threshold: initial_threshold.max(1),
            last_duration_ms: 0.0,
            collections: 0,
        }
    }

    /// Heap size at which the next automatic collection triggers.
    pub fn next_threshold(&self) -> usize {
        self.next_threshold
    }

    /// Duration of the most recent collection in milliseconds.
    pub fn last_duration_ms(&self) -> f64 {
        self.last_duration_ms
    }

    /// Number of collections since context construction.
    pub fn collections(&self) -> u64 {
        self.collections
    }

    // The threshold never shrinks. It stays put while the live size remains
    // below two thirds of it and otherwise jumps to the next power of two,
    // saturating at usize::MAX.
    fn compute_next_threshold(last_threshold: usize, live_bytes: usize) -> usize {
        if live_bytes <= (last_threshold / 3) * 2 {
            return last_threshold;
        }
        live_bytes.checked_next_power_of_two().unwrap_or(usize::MAX)
    }
}

/// Runs a full collection cycle.
pub fn collect(ctx: &mut Context, trigger: GcTrigger) {
    let bytes_before = ctx.heap().allocated_bytes();
    let objects_before = ctx.heap().allocated_objects();

    let start = Instant::now();
    trace_heap(ctx);
    sweep_heap(ctx);
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let bytes_after = ctx.heap().allocated_bytes();
    let collector = ctx.collector_mut();
    collector.last_duration_ms = duration_ms;
    collector.collections += 1;
    collector.next_threshold =
        Collector::compute_next_threshold(collector.next_threshold, bytes_after);
    let next_threshold = collector.next_threshold;

    tracing::debug!(
        target: "tiro::gc",
        trigger = trigger.name(),
        duration_ms,
        bytes_before,
        bytes_after,
        objects_before,
        objects_after = ctx.heap().allocated_objects(),
        next_threshold,
        "collection finished"
    );
}

fn trace_heap(ctx: &mut Context) {
    // Take the worklist out of the collector so roots can be walked with the
    // context borrowed; the list is returned afterwards.
    let mut gray = std::mem::take(&mut ctx.collector_mut().gray);
    debug_assert!(gray.is_empty());

    {
        let mut marker = Marker { gray: &mut gray };
        ctx.walk_roots(&mut |value| marker.mark(value));
    }

    while let Some(value) = gray.pop() {
        let mut marker = Marker { gray: &mut gray };
        objects::trace(value, &mut |child| marker.mark(child));
    }

    ctx.collector_mut().gray = gray;
}

struct Marker<'a> {
    gray: &'a mut Vec<Value>,
}

impl Marker<'_> {
    fn mark(&mut self, value: Value) {
        if !value.is_heap_ptr() {
            return;
        }
        let header = value.heap_ptr();
        unsafe {
            if (*header).is_marked() {
                return;
            }
            (*header).set_marked(true);
        }
        if objects::may_contain_references(value.type_of()) {
            self.gray.push(value);
        }
    }
}

fn sweep_heap(ctx: &mut Context) {
    let heap = ctx.heap_mut();
    let mut current = heap.first_object();
    while !current.is_null() {
        unsafe {
            let next = Heap::next_object(current);
            if (*current).is_marked() {
                (*current).set_marked(false);
            } else {
                heap.unlink(current);
                heap.destroy(current);
            }
            current = next;
        }
    }
}
