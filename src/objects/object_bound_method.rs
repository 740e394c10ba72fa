use crate::{
    objects::{
        object::{Object, ObjectType},
        object_closure::ObjectClosure,
    },
    value::Value,
};

/// A method closure paired with the receiver it was read from, so the
/// method can be called later with `this` already bound.
#[repr(C)]
pub struct ObjectBoundMethod {
    pub object: Object,
    pub receiver: Value,
    pub method: *mut ObjectClosure,
}

impl ObjectBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjectClosure) -> ObjectBoundMethod {
        ObjectBoundMethod {
            object: Object::new(ObjectType::ObjBoundMethod),
            receiver,
            method,
        }
    }
}
