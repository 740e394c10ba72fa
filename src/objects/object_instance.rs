use crate::{
    objects::{
        object::{Object, ObjectType},
        object_class::ObjectClass,
    },
    table::Table,
};

#[repr(C)]
pub struct ObjectInstance {
    pub object: Object,
    pub class: *mut ObjectClass,
    pub fields: Table,
}

impl ObjectInstance {
    pub fn new(class: *mut ObjectClass) -> ObjectInstance {
        ObjectInstance {
            object: Object::new(ObjectType::ObjInstance),
            class,
            fields: Table::new(),
        }
    }
}
