use crate::{
    call_frame::CallFrame,
    objects::{
        object::{Object, ObjectType},
        object_manager::ObjectManager,
        object_string::ObjectString,
        object_upvalue::{ObjectUpvalue, UpvalueState},
    },
    table::Table,
    value::{as_object, is_object, Value},
};

// Collector tracing, compiled away without the gc_debug feature.
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace {
    ($fmt:literal $(, $arg:expr)*) => {
        eprintln!(concat!("gc: ", $fmt) $(, $arg)*)
    };
}
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace {
    ($fmt:literal $(, $arg:expr)*) => {{}};
}
pub(crate) use gc_trace;

/// Tricolor mark-sweep. White objects carry a cleared mark bit, gray objects
/// are marked and sit on the worklist, black objects are marked and off it.
pub struct GarbageCollector {
    gray_stack: Vec<*mut Object>,
    stats: GcStats,
}

/// Running totals across all collections. Byte figures come from the object
/// manager's accounting; object counts from the sweep itself.
#[derive(Default, Debug, Clone)]
pub struct GcStats {
    pub cycles: u64,
    pub freed_bytes_total: usize,
    pub freed_objects_total: usize,
    pub last_cycle: CycleSummary,
}

/// What a single collection accomplished.
#[derive(Default, Debug, Clone)]
pub struct CycleSummary {
    pub heap_before: usize,
    pub heap_after: usize,
    pub freed_bytes: usize,
    pub freed_objects: usize,
    pub next_trigger: usize,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self {
            gray_stack: Vec::new(),
            stats: GcStats::default(),
        }
    }

    /// Mark a single object gray and queue it.
    pub fn mark_object(&mut self, obj: *mut Object) {
        if obj.is_null() {
            return;
        }
        unsafe {
            if (*obj).is_marked {
                return;
            }
            (*obj).is_marked = true;
        }
        gc_trace!("mark ptr={:p}", obj);
        self.gray_stack.push(obj);
    }

    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_object(value));
    }

    /// Mark every key and value of a table (globals, methods, fields).
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(&value);
        }
    }

    /// Mark the VM's root set. The intern table is deliberately absent: its
    /// keys are weak and survive only through other references.
    pub fn mark_roots(
        &mut self,
        stack: &[Value],
        stack_top: usize,
        globals: &Table,
        frames: &[CallFrame],
        open_upvalues: &[*mut ObjectUpvalue],
        init_string: *mut ObjectString,
    ) {
        for value in &stack[0..stack_top] {
            self.mark_value(value);
        }

        for frame in frames {
            self.mark_object(frame.closure as *mut Object);
        }

        for upvalue in open_upvalues {
            self.mark_object(*upvalue as *mut Object);
        }

        self.mark_table(globals);
        self.mark_object(init_string as *mut Object);
    }

    /// Drain the gray worklist, blackening each object.
    pub fn trace_references(&mut self) {
        while let Some(obj) = self.gray_stack.pop() {
            gc_trace!("blacken ptr={:p}", obj);
            unsafe {
                self.blacken_object(obj);
            }
        }
    }

    /// Enqueue everything an object references.
    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                for constant in function.chunk.iter_constants() {
                    self.mark_value(constant);
                }
            }
            ObjectType::ObjUpvalue => {
                // An open upvalue's slot is marked through the stack roots.
                if let UpvalueState::Closed(value) = &(*object).as_upvalue().state {
                    self.mark_value(value);
                }
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_object(class.name as *mut Object);
                self.mark_table(&class.methods);
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                self.mark_value(&bound.receiver);
                self.mark_object(bound.method as *mut Object);
            }
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
        }
    }

    /// Prune unmarked intern-table keys between mark and sweep.
    pub fn remove_white_strings(&mut self, intern_strings: &mut Table) {
        intern_strings.remove_white();
    }

    /// Free every white object. Returns the bytes and object count released.
    pub fn sweep(&mut self, object_manager: &mut ObjectManager) -> (usize, usize) {
        let (freed_bytes, freed_objects) = object_manager.sweep_unmarked();
        gc_trace!("swept {} objects, {} bytes", freed_objects, freed_bytes);
        (freed_bytes, freed_objects)
    }

    /// Fold a finished collection into the running totals. The VM builds the
    /// summary since it owns the byte counters and the trigger threshold.
    pub fn record_cycle(&mut self, summary: CycleSummary) {
        self.stats.cycles += 1;
        self.stats.freed_bytes_total += summary.freed_bytes;
        self.stats.freed_objects_total += summary.freed_objects;
        gc_trace!(
            "cycle {} done: heap {} -> {} ({} objects, {} bytes freed), next trigger at {}",
            self.stats.cycles,
            summary.heap_before,
            summary.heap_after,
            summary.freed_objects,
            summary.freed_bytes,
            summary.next_trigger
        );
        self.stats.last_cycle = summary;
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}
