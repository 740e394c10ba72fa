use crate::{
    gc::gc_trace,
    objects::{
        object::{NativeObject, Object, ObjectType},
        object_bound_method::ObjectBoundMethod,
        object_class::ObjectClass,
        object_closure::ObjectClosure,
        object_function::ObjectFunction,
        object_instance::ObjectInstance,
        object_native_function::ObjectNativeFunction,
        object_string::{hash_string, ObjectString},
        object_upvalue::ObjectUpvalue,
    },
    table::Table,
    value::{make_nil_value, Value},
};

const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

/// The allocator. Every heap object is linked into a single intrusive list
/// through its header so the sweep phase can visit each object exactly once.
pub struct ObjectManager {
    head: *mut Object,
    bytes_allocated: usize,
    next_gc: usize,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            head: std::ptr::null_mut(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    /// Rescale the trigger threshold after a completed cycle.
    pub fn finish_cycle(&mut self) {
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    /// Link a freshly allocated object into the object list and account its
    /// deep size.
    fn link(&mut self, obj: *mut Object) {
        unsafe {
            (*obj).next = self.head;
            let size = (*obj).deep_size();
            self.bytes_allocated += size;
            gc_trace!("allocate ptr={:p} size={} type={:?}", obj, size, (*obj).obj_type);
        }
        self.head = obj;
    }

    /// Intern-aware string construction from a borrowed slice.
    pub fn copy_string(&mut self, interned: &mut Table, content: &str) -> *mut ObjectString {
        let hash = hash_string(content.as_bytes());
        if let Some(existing) = interned.find_string(content, hash) {
            return existing;
        }
        self.allocate_string(interned, content.to_string())
    }

    /// Intern-aware string construction taking ownership of the buffer; a
    /// duplicate releases the caller's buffer and returns the existing one.
    pub fn take_string(&mut self, interned: &mut Table, content: String) -> *mut ObjectString {
        let hash = hash_string(content.as_bytes());
        if let Some(existing) = interned.find_string(&content, hash) {
            return existing;
        }
        self.allocate_string(interned, content)
    }

    fn allocate_string(&mut self, interned: &mut Table, content: String) -> *mut ObjectString {
        let ptr = Box::into_raw(ObjectString::new(content));
        self.link(ptr as *mut Object);
        interned.set(ptr, make_nil_value());
        ptr
    }

    /// Move a function built by the compiler into GC custody.
    pub fn adopt_function(&mut self, function: Box<ObjectFunction>) -> *mut ObjectFunction {
        let ptr = Box::into_raw(function);
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> *mut ObjectClosure {
        let ptr = Box::into_raw(Box::new(ObjectClosure::new(function)));
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        let ptr = Box::into_raw(Box::new(ObjectUpvalue::new(slot)));
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_class(&mut self, name: *mut ObjectString) -> *mut ObjectClass {
        let ptr = Box::into_raw(Box::new(ObjectClass::new(name)));
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> *mut ObjectInstance {
        let ptr = Box::into_raw(Box::new(ObjectInstance::new(class)));
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> *mut ObjectBoundMethod {
        let ptr = Box::into_raw(Box::new(ObjectBoundMethod::new(receiver, method)));
        self.link(ptr as *mut Object);
        ptr
    }

    pub fn alloc_native_function(
        &mut self,
        name: String,
        arity: u8,
        native_object: impl NativeObject + 'static,
    ) -> *mut ObjectNativeFunction {
        let ptr = Box::into_raw(Box::new(ObjectNativeFunction::new(name, arity, native_object)));
        self.link(ptr as *mut Object);
        ptr
    }

    /// Walk the object list, free every unmarked object, and reset survivors
    /// to white. Returns the bytes and the object count released.
    pub fn sweep_unmarked(&mut self) -> (usize, usize) {
        let mut freed_bytes = 0;
        let mut freed_objects = 0;
        let mut previous: *mut Object = std::ptr::null_mut();
        let mut current = self.head;
        unsafe {
            while !current.is_null() {
                if (*current).is_marked {
                    (*current).is_marked = false;
                    previous = current;
                    current = (*current).next;
                } else {
                    let unreached = current;
                    current = (*current).next;
                    if previous.is_null() {
                        self.head = current;
                    } else {
                        (*previous).next = current;
                    }
                    freed_bytes += self.free_object(unreached);
                    freed_objects += 1;
                }
            }
        }
        self.bytes_allocated -= freed_bytes;
        (freed_bytes, freed_objects)
    }

    /// Free one object with type-specific payload teardown.
    unsafe fn free_object(&mut self, obj: *mut Object) -> usize {
        let size = (*obj).deep_size();
        debug_feature::trace_free(obj);
        gc_trace!("free ptr={:p} size={} type={:?}", obj, size, (*obj).obj_type);
        match (*obj).obj_type {
            ObjectType::ObjString => drop(Box::from_raw(obj as *mut ObjectString)),
            ObjectType::ObjFunction => drop(Box::from_raw(obj as *mut ObjectFunction)),
            ObjectType::ObjNativeFunction => {
                drop(Box::from_raw(obj as *mut ObjectNativeFunction))
            }
            ObjectType::ObjClosure => drop(Box::from_raw(obj as *mut ObjectClosure)),
            ObjectType::ObjUpvalue => drop(Box::from_raw(obj as *mut ObjectUpvalue)),
            ObjectType::ObjClass => drop(Box::from_raw(obj as *mut ObjectClass)),
            ObjectType::ObjInstance => drop(Box::from_raw(obj as *mut ObjectInstance)),
            ObjectType::ObjBoundMethod => drop(Box::from_raw(obj as *mut ObjectBoundMethod)),
        }
        size
    }

    /// Iterate object headers, newest first.
    pub fn iter(&self) -> ObjectIter {
        ObjectIter { current: self.head }
    }

    pub fn object_count(&self) -> usize {
        self.iter().count()
    }

    /// Deallocate everything (VM teardown).
    pub fn free_all(&mut self) {
        let mut current = self.head;
        unsafe {
            while !current.is_null() {
                let next = (*current).next;
                self.free_object(current);
                current = next;
            }
        }
        self.head = std::ptr::null_mut();
        self.bytes_allocated = 0;
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        self.free_all();
    }
}

pub struct ObjectIter {
    current: *mut Object,
}

impl Iterator for ObjectIter {
    type Item = *mut Object;

    fn next(&mut self) -> Option<*mut Object> {
        if self.current.is_null() {
            return None;
        }
        let obj = self.current;
        self.current = unsafe { (*obj).next };
        Some(obj)
    }
}

#[cfg(feature = "debug_trace_object")]
mod debug_feature {
    use super::*;

    pub fn trace_free(obj: *mut Object) {
        unsafe {
            match (*obj).obj_type {
                ObjectType::ObjString => {
                    eprintln!("free string '{}'", (*obj).as_string().content)
                }
                ObjectType::ObjFunction => {
                    eprintln!("free function '{}'", (*obj).as_function().name)
                }
                other => eprintln!("free object {:?}", other),
            }
        }
    }
}

#[cfg(not(feature = "debug_trace_object"))]
mod debug_feature {
    use super::*;

    pub fn trace_free(_obj: *mut Object) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_link_into_list() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        manager.copy_string(&mut interned, "one");
        manager.copy_string(&mut interned, "two");
        manager.copy_string(&mut interned, "three");
        assert_eq!(manager.object_count(), 3);
        assert!(manager.bytes_allocated() > 0);
    }

    #[test]
    fn test_copy_string_interns() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let first = manager.copy_string(&mut interned, "dup");
        let second = manager.copy_string(&mut interned, "dup");
        assert!(std::ptr::eq(first, second));
        assert_eq!(manager.object_count(), 1);
    }

    #[test]
    fn test_take_string_returns_existing_on_duplicate() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let first = manager.copy_string(&mut interned, "owned");
        let second = manager.take_string(&mut interned, "owned".to_string());
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_sweep_unmarked_frees_and_unlinks() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        let keep = manager.copy_string(&mut interned, "keep");
        manager.copy_string(&mut interned, "drop1");
        manager.copy_string(&mut interned, "drop2");
        unsafe {
            (*keep).object.is_marked = true;
        }
        let before = manager.bytes_allocated();
        let (freed_bytes, freed_objects) = manager.sweep_unmarked();
        assert!(freed_bytes > 0);
        assert_eq!(freed_objects, 2);
        assert_eq!(manager.object_count(), 1);
        assert_eq!(manager.bytes_allocated(), before - freed_bytes);
        // Survivor was reset to white.
        unsafe {
            assert!(!(*keep).object.is_marked);
        }
    }

    #[test]
    fn test_threshold_rescales_after_cycle() {
        let mut manager = ObjectManager::new();
        let mut interned = Table::new();
        manager.copy_string(&mut interned, "x");
        manager.finish_cycle();
        assert_eq!(manager.next_gc(), manager.bytes_allocated() * 2);
    }
}
