use crate::{
    objects::object::{Object, ObjectType},
    value::Value,
};

/// An open upvalue refers to a live stack slot by index; closing it moves
/// the slot's value into the upvalue itself.
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub state: UpvalueState,
}

impl ObjectUpvalue {
    pub fn new(slot: usize) -> ObjectUpvalue {
        ObjectUpvalue {
            object: Object::new(ObjectType::ObjUpvalue),
            state: UpvalueState::Open(slot),
        }
    }

    /// The stack slot this upvalue still points at, if open.
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn close(&mut self, value: Value) {
        self.state = UpvalueState::Closed(value);
    }
}
