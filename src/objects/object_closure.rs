use crate::objects::{
    object::{Object, ObjectType},
    object_function::ObjectFunction,
    object_upvalue::ObjectUpvalue,
};

/// A function plus its captured upvalues. The upvalue slots are filled by
/// the Closure opcode right after allocation.
#[repr(C)]
pub struct ObjectClosure {
    pub object: Object,
    pub function: *mut ObjectFunction,
    pub upvalues: Vec<*mut ObjectUpvalue>,
}

impl ObjectClosure {
    pub fn new(function: *mut ObjectFunction) -> ObjectClosure {
        let upvalue_count = unsafe { (*function).upvalue_count };
        ObjectClosure {
            object: Object::new(ObjectType::ObjClosure),
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }
    }
}
