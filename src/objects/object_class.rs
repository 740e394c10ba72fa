use crate::{
    objects::{
        object::{Object, ObjectType},
        object_string::ObjectString,
    },
    table::Table,
};

/// A class and its method table. Inheritance copies the superclass table
/// into the subclass when the class declaration executes, so lookup never
/// walks a superclass chain.
#[repr(C)]
pub struct ObjectClass {
    pub object: Object,
    pub name: *mut ObjectString,
    pub methods: Table,
}

impl ObjectClass {
    pub fn new(name: *mut ObjectString) -> ObjectClass {
        ObjectClass {
            object: Object::new(ObjectType::ObjClass),
            name,
            methods: Table::new(),
        }
    }
}
