use crate::objects::{
    object::{Object, ObjectType},
    object_bound_method::ObjectBoundMethod,
    object_class::ObjectClass,
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_instance::ObjectInstance,
    object_native_function::ObjectNativeFunction,
    object_string::ObjectString,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    ValueNil,
    ValueBool,
    ValueNumber,
    ValueObject,
}

#[derive(Clone, Copy)]
pub union ValueUnion {
    pub boolean: bool,
    pub number: f64,
    pub object: *mut Object,
}

/// A runtime value. Object payloads are owned by the object manager; a
/// Value only carries the pointer.
#[derive(Clone, Copy)]
pub struct Value {
    pub value_type: ValueType,
    pub value_as: ValueUnion,
}

pub type ValueArray = Vec<Value>;

impl Value {
    pub fn new() -> Value {
        make_nil_value()
    }
}

pub fn make_nil_value() -> Value {
    Value {
        value_type: ValueType::ValueNil,
        value_as: ValueUnion { number: 0.0 },
    }
}

pub fn make_bool_value(boolean: bool) -> Value {
    Value {
        value_type: ValueType::ValueBool,
        value_as: ValueUnion { boolean },
    }
}

pub fn make_number_value(number: f64) -> Value {
    Value {
        value_type: ValueType::ValueNumber,
        value_as: ValueUnion { number },
    }
}

pub fn make_object_value(object: *mut Object) -> Value {
    Value {
        value_type: ValueType::ValueObject,
        value_as: ValueUnion { object },
    }
}

pub fn is_nil(value: &Value) -> bool {
    value.value_type == ValueType::ValueNil
}

pub fn is_bool(value: &Value) -> bool {
    value.value_type == ValueType::ValueBool
}

pub fn is_number(value: &Value) -> bool {
    value.value_type == ValueType::ValueNumber
}

pub fn is_object(value: &Value) -> bool {
    value.value_type == ValueType::ValueObject
}

fn is_object_type(value: &Value, obj_type: ObjectType) -> bool {
    is_object(value) && unsafe { (*value.value_as.object).obj_type == obj_type }
}

pub fn is_string(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjString)
}

pub fn is_function(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjFunction)
}

pub fn is_native_function(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjNativeFunction)
}

pub fn is_closure(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClosure)
}

pub fn is_class(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjClass)
}

pub fn is_instance(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjInstance)
}

pub fn is_bound_method(value: &Value) -> bool {
    is_object_type(value, ObjectType::ObjBoundMethod)
}

pub fn as_bool(value: &Value) -> bool {
    debug_assert!(is_bool(value));
    unsafe { value.value_as.boolean }
}

pub fn as_number(value: &Value) -> f64 {
    debug_assert!(is_number(value));
    unsafe { value.value_as.number }
}

pub fn as_object(value: &Value) -> *mut Object {
    debug_assert!(is_object(value));
    unsafe { value.value_as.object }
}

pub fn as_string(value: &Value) -> *mut ObjectString {
    debug_assert!(is_string(value));
    as_object(value) as *mut ObjectString
}

pub fn as_function(value: &Value) -> *mut ObjectFunction {
    debug_assert!(is_function(value));
    as_object(value) as *mut ObjectFunction
}

pub fn as_native_function(value: &Value) -> *mut ObjectNativeFunction {
    debug_assert!(is_native_function(value));
    as_object(value) as *mut ObjectNativeFunction
}

pub fn as_closure(value: &Value) -> *mut ObjectClosure {
    debug_assert!(is_closure(value));
    as_object(value) as *mut ObjectClosure
}

pub fn as_class(value: &Value) -> *mut ObjectClass {
    debug_assert!(is_class(value));
    as_object(value) as *mut ObjectClass
}

pub fn as_instance(value: &Value) -> *mut ObjectInstance {
    debug_assert!(is_instance(value));
    as_object(value) as *mut ObjectInstance
}

pub fn as_bound_method(value: &Value) -> *mut ObjectBoundMethod {
    debug_assert!(is_bound_method(value));
    as_object(value) as *mut ObjectBoundMethod
}

/// Structural equality. Different variants never compare equal; interned
/// strings (and all other objects) compare by identity.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left.value_type != right.value_type {
        return false;
    }

    match left.value_type {
        ValueType::ValueNil => true,
        ValueType::ValueBool => as_bool(left) == as_bool(right),
        ValueType::ValueNumber => as_number(left) == as_number(right),
        ValueType::ValueObject => std::ptr::eq(as_object(left), as_object(right)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        values_equal(self, other)
    }
}

pub fn format_value(value: &Value) -> String {
    match value.value_type {
        ValueType::ValueNil => "nil".to_string(),
        ValueType::ValueBool => format!("{}", as_bool(value)),
        ValueType::ValueNumber => format_number(as_number(value)),
        ValueType::ValueObject => format_object(as_object(value)),
    }
}

pub fn print_value(value: &Value) {
    print!("{}", format_value(value));
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

fn format_function(function: *const ObjectFunction) -> String {
    let name = unsafe { (*function).name.as_str() };
    if name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", name)
    }
}

fn format_object(object: *mut Object) -> String {
    unsafe {
        match (*object).obj_type {
            ObjectType::ObjString => (*(object as *mut ObjectString)).content.clone(),
            ObjectType::ObjFunction => format_function(object as *const ObjectFunction),
            ObjectType::ObjNativeFunction => "<native fn>".to_string(),
            ObjectType::ObjClosure => {
                format_function((*(object as *mut ObjectClosure)).function)
            }
            ObjectType::ObjUpvalue => "upvalue".to_string(),
            ObjectType::ObjClass => {
                (*(*(object as *mut ObjectClass)).name).content.clone()
            }
            ObjectType::ObjInstance => {
                let instance = object as *mut ObjectInstance;
                format!("{} instance", (*(*(*instance).class).name).content)
            }
            ObjectType::ObjBoundMethod => {
                format_function((*(*(object as *mut ObjectBoundMethod)).method).function)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_variant_equality_is_false() {
        assert!(make_nil_value() != make_bool_value(false));
        assert!(make_bool_value(false) != make_number_value(0.0));
        assert!(make_nil_value() != make_number_value(0.0));
    }

    #[test]
    fn test_nan_is_not_equal_to_itself() {
        let nan = make_number_value(0.0 / 0.0);
        assert!(nan != nan);
    }

    #[test]
    fn test_number_equality() {
        assert!(make_number_value(1.5) == make_number_value(1.5));
        assert!(make_number_value(1.5) != make_number_value(2.5));
    }

    #[test]
    fn test_number_formatting_trims_integral_doubles() {
        assert_eq!(format_value(&make_number_value(7.0)), "7");
        assert_eq!(format_value(&make_number_value(2.5)), "2.5");
        assert_eq!(format_value(&make_number_value(-3.0)), "-3");
    }

    #[test]
    fn test_nil_and_bool_formatting() {
        assert_eq!(format_value(&make_nil_value()), "nil");
        assert_eq!(format_value(&make_bool_value(true)), "true");
        assert_eq!(format_value(&make_bool_value(false)), "false");
    }
}
