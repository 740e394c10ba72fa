use crate::{
    chunk::Chunk,
    objects::object::{Object, ObjectType},
};

/// A compiled function body. Immutable once compilation finishes; the
/// top-level script compiles to a function with an empty name.
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(arity: u8, name: String) -> ObjectFunction {
        ObjectFunction {
            object: Object::new(ObjectType::ObjFunction),
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}
