use crate::{
    call_frame::CallFrame,
    chunk::OpCode,
    compiler::Parser,
    gc::{gc_trace, CycleSummary, GarbageCollector},
    objects::{
        object::{NativeObject, Object, ObjectType},
        object_class::ObjectClass,
        object_closure::ObjectClosure,
        object_manager::ObjectManager,
        object_string::ObjectString,
        object_upvalue::{ObjectUpvalue, UpvalueState},
    },
    std_mod::time::ClockTime,
    table::Table,
    value::{
        as_bool, as_bound_method, as_class, as_closure, as_function, as_instance,
        as_native_function, as_number, as_string, is_bool, is_class, is_instance, is_nil,
        is_number, is_object, is_string, make_bool_value, make_number_value, make_object_value,
        print_value, Value,
    },
};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

pub struct VM {
    frames: Vec<CallFrame>,
    stack: [Value; STACK_MAX],
    stack_top_pos: usize,
    globals: Table,
    intern_strings: Table,
    open_upvalues: Vec<*mut ObjectUpvalue>,
    object_manager: ObjectManager,
    gc: GarbageCollector,
    init_string: *mut ObjectString,
}

#[derive(Debug, PartialEq)]
pub enum InterpretResult {
    InterpretOk,
    InterpretCompileError,
    InterpretRuntimeError,
}

impl VM {
    pub fn new() -> Box<VM> {
        let mut vm = Box::new(VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: [Value::new(); STACK_MAX],
            stack_top_pos: 0,
            globals: Table::new(),
            intern_strings: Table::new(),
            open_upvalues: vec![],
            object_manager: ObjectManager::new(),
            gc: GarbageCollector::new(),
            init_string: std::ptr::null_mut(),
        });
        // "init" is looked up on every class call; intern it once up front.
        vm.init_string = vm
            .object_manager
            .copy_string(&mut vm.intern_strings, "init");
        vm.define_native("clock", 0, ClockTime::new());
        vm
    }

    /// Register a host callable under a global name. Must be called before
    /// `interpret` runs the code that uses it.
    pub fn define_native(&mut self, name: &str, arity: u8, native: impl NativeObject + 'static) {
        let name_string = self
            .object_manager
            .copy_string(&mut self.intern_strings, name);
        let native_ptr =
            self.object_manager
                .alloc_native_function(name.to_string(), arity, native);
        self.globals
            .set(name_string, make_object_value(native_ptr as *mut Object));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = {
            let mut parser = Parser::new(&mut self.object_manager, &mut self.intern_strings);
            parser.compile(source)
        };

        let function = match function {
            Some(function) => function,
            None => return InterpretResult::InterpretCompileError,
        };

        let function_ptr = self.object_manager.adopt_function(function);
        self.push(make_object_value(function_ptr as *mut Object));
        let closure = self.object_manager.alloc_closure(function_ptr);
        self.pop();
        self.push(make_object_value(closure as *mut Object));
        if !self.call(closure, 0) {
            return InterpretResult::InterpretRuntimeError;
        }

        self.run()
    }

    fn push(&mut self, value: Value) {
        if self.stack_top_pos < STACK_MAX {
            self.stack[self.stack_top_pos] = value;
            self.stack_top_pos += 1;
        } else {
            panic!("Value stack overflow");
        }
    }

    fn pop(&mut self) -> Value {
        if self.stack_top_pos > 0 {
            self.stack_top_pos -= 1;
            self.stack[self.stack_top_pos]
        } else {
            panic!("Value stack underflow");
        }
    }

    fn peek(&self, distance: usize) -> Value {
        debug_assert!(self.stack_top_pos > distance);
        self.stack[self.stack_top_pos - distance - 1]
    }

    fn is_falsey(value: &Value) -> bool {
        is_nil(value) || (is_bool(value) && !as_bool(value))
    }

    fn current_closure(&self) -> *mut ObjectClosure {
        self.frames.last().expect("No call frame.").closure
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("No call frame.");
        let byte = unsafe { (&(*(*frame.closure).function).chunk.code)[frame.ip] };
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("No call frame.");
        unsafe { *(*(*frame.closure).function).chunk.get_constant(index) }
    }

    fn read_string_constant(&mut self) -> *mut ObjectString {
        as_string(&self.read_constant())
    }

    fn run(&mut self) -> InterpretResult {
        loop {
            debug_feature::trace_instruction(self);

            let byte = self.read_byte();
            let instruction = match OpCode::from_byte(byte) {
                Some(instruction) => instruction,
                None => return self.fail(format!("Unknown opcode {}.", byte)),
            };

            match instruction {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => {
                    self.push(Value::new());
                }
                OpCode::True => {
                    self.push(make_bool_value(true));
                }
                OpCode::False => {
                    self.push(make_bool_value(false));
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("No call frame.").slot_base();
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("No call frame.").slot_base();
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!("Undefined variable '{}'.", unsafe {
                                &(*name).content
                            });
                            return self.fail(message);
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        // Assignment never creates a global; remove the
                        // entry the set just made.
                        self.globals.delete(name);
                        let message =
                            format!("Undefined variable '{}'.", unsafe { &(*name).content });
                        return self.fail(message);
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = unsafe { (&(*self.current_closure()).upvalues)[slot] };
                    let value = unsafe {
                        match &(*upvalue).state {
                            UpvalueState::Open(stack_slot) => self.stack[*stack_slot],
                            UpvalueState::Closed(value) => *value,
                        }
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0);
                    let upvalue = unsafe { (&(*self.current_closure()).upvalues)[slot] };
                    unsafe {
                        match (*upvalue).state {
                            UpvalueState::Open(stack_slot) => self.stack[stack_slot] = value,
                            UpvalueState::Closed(_) => {
                                (*upvalue).state = UpvalueState::Closed(value)
                            }
                        }
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string_constant();
                    let receiver = self.peek(0);
                    if !is_instance(&receiver) {
                        return self.fail("Only instances have properties.".to_string());
                    }
                    let instance = as_instance(&receiver);

                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else if !self.bind_method(unsafe { (*instance).class }, name) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string_constant();
                    let receiver = self.peek(1);
                    if !is_instance(&receiver) {
                        return self.fail("Only instances have fields.".to_string());
                    }
                    let instance = as_instance(&receiver);
                    unsafe {
                        (*instance).fields.set(name, self.peek(0));
                    }
                    // The assigned value, not the instance, stays on the
                    // stack.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string_constant();
                    let superclass = as_class(&self.pop());
                    if !self.bind_method(superclass, name) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(make_bool_value(a == b));
                }
                OpCode::Greater | OpCode::Less | OpCode::Subtract | OpCode::Multiply
                | OpCode::Divide => {
                    if let Err(message) = self.binary_op(instruction) {
                        return self.fail(message);
                    }
                }
                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if is_string(&a) && is_string(&b) {
                        self.concatenate();
                    } else if is_number(&a) && is_number(&b) {
                        self.pop();
                        self.pop();
                        self.push(make_number_value(as_number(&a) + as_number(&b)));
                    } else {
                        return self
                            .fail("Operands must be two numbers or two strings.".to_string());
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(make_bool_value(Self::is_falsey(&value)));
                }
                OpCode::Negate => {
                    if !is_number(&self.peek(0)) {
                        return self.fail("Operand must be a number.".to_string());
                    }
                    let value = self.pop();
                    self.push(make_number_value(-as_number(&value)));
                }
                OpCode::Print => {
                    let value = self.pop();
                    print_value(&value);
                    println!();
                }
                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("No call frame.").ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if Self::is_falsey(&self.peek(0)) {
                        self.frames.last_mut().expect("No call frame.").ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frames.last_mut().expect("No call frame.").ip -= offset;
                }
                OpCode::Call => {
                    let argument_count = self.read_byte() as usize;
                    let callee = self.peek(argument_count);
                    if !self.call_value(callee, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let argument_count = self.read_byte() as usize;
                    if !self.invoke(name, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argument_count = self.read_byte() as usize;
                    let superclass = as_class(&self.pop());
                    if !self.invoke_from_class(superclass, name, argument_count) {
                        return InterpretResult::InterpretRuntimeError;
                    }
                }
                OpCode::Closure => {
                    let function = as_function(&self.read_constant());
                    self.prepare_allocation();
                    let closure = self.object_manager.alloc_closure(function);
                    self.push(make_object_value(closure as *mut Object));

                    let upvalue_count = unsafe { (*function).upvalue_count };
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base =
                                self.frames.last().expect("No call frame.").slot_base();
                            self.capture_upvalue(base + index)
                        } else {
                            unsafe { (&(*self.current_closure()).upvalues)[index] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack_top_pos - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slot_base = self.frames.last().expect("No call frame.").slot_base();
                    self.close_upvalues(slot_base);
                    self.frames.pop();

                    if self.frames.is_empty() {
                        self.pop();
                        return InterpretResult::InterpretOk;
                    }

                    self.stack_top_pos = slot_base;
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string_constant();
                    self.prepare_allocation();
                    let class = self.object_manager.alloc_class(name);
                    self.push(make_object_value(class as *mut Object));
                }
                OpCode::Inherit => {
                    let superclass_value = self.peek(1);
                    if !is_class(&superclass_value) {
                        return self.fail("Superclass must be a class.".to_string());
                    }
                    let superclass = as_class(&superclass_value);
                    let subclass = as_class(&self.peek(0));
                    unsafe {
                        (*subclass).methods.add_all(&(*superclass).methods);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string_constant();
                    let method = self.peek(0);
                    let class = as_class(&self.peek(1));
                    unsafe {
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }
            }
        }
    }

    fn binary_op(&mut self, instruction: OpCode) -> Result<(), String> {
        if !is_number(&self.peek(0)) || !is_number(&self.peek(1)) {
            return Err("Operands must be numbers.".to_string());
        }

        let value_b = as_number(&self.pop());
        let value_a = as_number(&self.pop());
        match instruction {
            OpCode::Greater => self.push(make_bool_value(value_a > value_b)),
            OpCode::Less => self.push(make_bool_value(value_a < value_b)),
            OpCode::Subtract => self.push(make_number_value(value_a - value_b)),
            OpCode::Multiply => self.push(make_number_value(value_a * value_b)),
            OpCode::Divide => self.push(make_number_value(value_a / value_b)),
            _ => unreachable!("Unexpected binary operator: {}", instruction),
        }

        Ok(())
    }

    /// Concatenate the two strings on top of the stack. The operands stay
    /// put until the result exists so a collection cannot free them.
    fn concatenate(&mut self) {
        self.prepare_allocation();
        let b = self.peek(0);
        let a = self.peek(1);
        let (string_a, string_b) = unsafe { (&(*as_string(&a)).content, &(*as_string(&b)).content) };
        let mut combined = String::with_capacity(string_a.len() + string_b.len());
        combined.push_str(string_a);
        combined.push_str(string_b);
        let result = self
            .object_manager
            .take_string(&mut self.intern_strings, combined);
        self.pop();
        self.pop();
        self.push(make_object_value(result as *mut Object));
    }

    fn call_value(&mut self, callee: Value, argument_count: usize) -> bool {
        if is_object(&callee) {
            match unsafe { (*callee.value_as.object).obj_type } {
                ObjectType::ObjClosure => {
                    return self.call(as_closure(&callee), argument_count);
                }
                ObjectType::ObjClass => {
                    let class = as_class(&callee);
                    self.prepare_allocation();
                    let instance = self.object_manager.alloc_instance(class);
                    let receiver_slot = self.stack_top_pos - argument_count - 1;
                    self.stack[receiver_slot] = make_object_value(instance as *mut Object);

                    let initializer = unsafe { (*class).methods.get(self.init_string) };
                    if let Some(initializer) = initializer {
                        return self.call(as_closure(&initializer), argument_count);
                    }
                    if argument_count != 0 {
                        self.runtime_error(&format!(
                            "Expected 0 arguments but got {}.",
                            argument_count
                        ));
                        return false;
                    }
                    return true;
                }
                ObjectType::ObjBoundMethod => {
                    let bound = as_bound_method(&callee);
                    let receiver_slot = self.stack_top_pos - argument_count - 1;
                    unsafe {
                        self.stack[receiver_slot] = (*bound).receiver;
                        return self.call((*bound).method, argument_count);
                    }
                }
                ObjectType::ObjNativeFunction => {
                    let native = as_native_function(&callee);
                    let args_start = self.stack_top_pos - argument_count;
                    let result =
                        unsafe { (*native).invoke(&self.stack[args_start..self.stack_top_pos]) };
                    return match result {
                        Ok(value) => {
                            self.stack_top_pos -= argument_count + 1;
                            self.push(value);
                            true
                        }
                        Err(message) => {
                            self.runtime_error(&message);
                            false
                        }
                    };
                }
                _ => {}
            }
        }

        self.runtime_error("Can only call functions and classes.");
        false
    }

    fn call(&mut self, closure: *mut ObjectClosure, argument_count: usize) -> bool {
        let arity = unsafe { (*(*closure).function).arity } as usize;
        if argument_count != arity {
            self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                arity, argument_count
            ));
            return false;
        }

        if self.frames.len() == FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return false;
        }

        self.frames.push(CallFrame::new(
            closure,
            self.stack_top_pos - argument_count - 1,
        ));
        true
    }

    fn invoke(&mut self, name: *mut ObjectString, argument_count: usize) -> bool {
        let receiver = self.peek(argument_count);
        if !is_instance(&receiver) {
            self.runtime_error("Only instances have methods.");
            return false;
        }
        let instance = as_instance(&receiver);

        // A field holding a callable shadows any method of the same name.
        if let Some(field) = unsafe { (*instance).fields.get(name) } {
            let receiver_slot = self.stack_top_pos - argument_count - 1;
            self.stack[receiver_slot] = field;
            return self.call_value(field, argument_count);
        }

        self.invoke_from_class(unsafe { (*instance).class }, name, argument_count)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjectClass,
        name: *mut ObjectString,
        argument_count: usize,
    ) -> bool {
        match unsafe { (*class).methods.get(name) } {
            Some(method) => self.call(as_closure(&method), argument_count),
            None => {
                self.runtime_error(&format!("Undefined property '{}'.", unsafe {
                    &(*name).content
                }));
                false
            }
        }
    }

    fn bind_method(&mut self, class: *mut ObjectClass, name: *mut ObjectString) -> bool {
        let method = unsafe { (*class).methods.get(name) };
        match method {
            Some(method) => {
                self.prepare_allocation();
                let bound = self
                    .object_manager
                    .alloc_bound_method(self.peek(0), as_closure(&method));
                self.pop();
                self.push(make_object_value(bound as *mut Object));
                true
            }
            None => {
                self.runtime_error(&format!("Undefined property '{}'.", unsafe {
                    &(*name).content
                }));
                false
            }
        }
    }

    /// Find or create the open upvalue for a stack slot. The open list is
    /// sorted by descending slot and holds at most one upvalue per slot.
    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        let mut index = 0;
        while index < self.open_upvalues.len() {
            let open_slot = unsafe { (*self.open_upvalues[index]).open_slot() }
                .expect("open upvalue list holds only open upvalues");
            if open_slot == slot {
                return self.open_upvalues[index];
            }
            if open_slot < slot {
                break;
            }
            index += 1;
        }

        self.prepare_allocation();
        let upvalue = self.object_manager.alloc_upvalue(slot);
        self.open_upvalues.insert(index, upvalue);
        upvalue
    }

    /// Close every open upvalue at or above `last`, splicing it out of the
    /// open list. Closed upvalues stay reachable through their closures.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = unsafe { (*upvalue).open_slot() }
                .expect("open upvalue list holds only open upvalues");
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            unsafe {
                (*upvalue).close(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    /// Run a collection if the byte counter crossed the threshold (or on
    /// every allocation in stress mode). Called before each VM allocation
    /// point, so the new object is always rooted before the next cycle.
    fn prepare_allocation(&mut self) {
        #[cfg(feature = "gc_stress")]
        self.collect_garbage();

        if self.object_manager.should_collect() {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        gc_trace!("collection starting");
        let heap_before = self.object_manager.bytes_allocated();

        self.gc.mark_roots(
            &self.stack,
            self.stack_top_pos,
            &self.globals,
            &self.frames,
            &self.open_upvalues,
            self.init_string,
        );
        self.gc.trace_references();
        self.gc.remove_white_strings(&mut self.intern_strings);
        let (freed_bytes, freed_objects) = self.gc.sweep(&mut self.object_manager);

        self.object_manager.finish_cycle();
        self.gc.record_cycle(CycleSummary {
            heap_before,
            heap_after: self.object_manager.bytes_allocated(),
            freed_bytes,
            freed_objects,
            next_trigger: self.object_manager.next_gc(),
        });
    }

    fn fail(&mut self, message: String) -> InterpretResult {
        self.runtime_error(&message);
        InterpretResult::InterpretRuntimeError
    }

    /// Report a runtime error with a frame-by-frame trace, then reset so
    /// the VM stays usable for the next `interpret` call.
    fn runtime_error(&mut self, message: &str) {
        eprintln!("{}", message);

        for frame in self.frames.iter().rev() {
            unsafe {
                let function = (*frame.closure).function;
                let instruction = frame.ip.saturating_sub(1);
                let line = (*function)
                    .chunk
                    .read_line_from_offset(instruction)
                    .unwrap_or(0);
                if (&(*function).name).is_empty() {
                    eprintln!("[line {}] in script", line);
                } else {
                    eprintln!("[line {}] in {}()", line, (*function).name);
                }
            }
        }

        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack_top_pos = 0;
        self.frames.clear();
        self.open_upvalues.clear();
    }
}

#[cfg(feature = "debug_trace_execution")]
mod debug_feature {
    use super::*;
    use crate::debug;

    pub fn trace_instruction(vm: &VM) {
        print!("          ");
        for slot in &vm.stack[0..vm.stack_top_pos] {
            print!("[ ");
            print_value(slot);
            print!(" ]");
        }
        println!();
        let frame = vm.frames.last().expect("No call frame.");
        unsafe {
            debug::disassemble_instruction(&(*(*frame.closure).function).chunk, frame.ip);
        }
    }
}

#[cfg(not(feature = "debug_trace_execution"))]
mod debug_feature {
    use super::*;

    pub fn trace_instruction(_vm: &VM) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_string, is_bool, is_nil, is_number, is_string};

    fn global(vm: &mut VM, name: &str) -> Value {
        let key = vm
            .object_manager
            .copy_string(&mut vm.intern_strings, name);
        vm.globals.get(key).expect("global should be defined")
    }

    fn global_number(vm: &mut VM, name: &str) -> f64 {
        let value = global(vm, name);
        assert!(is_number(&value));
        as_number(&value)
    }

    fn global_bool(vm: &mut VM, name: &str) -> bool {
        let value = global(vm, name);
        assert!(is_bool(&value));
        as_bool(&value)
    }

    fn global_string(vm: &mut VM, name: &str) -> String {
        let value = global(vm, name);
        assert!(is_string(&value));
        unsafe { (*as_string(&value)).content.clone() }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let mut vm = VM::new();
        assert_eq!(vm.interpret("var r = 1 + 2 * 3;"), InterpretResult::InterpretOk);
        assert_eq!(global_number(&mut vm, "r"), 7.0);
    }

    #[test]
    fn test_comparison_expression() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var r = !(5 - 4 > 3 * 2 == !nil);"),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "r"));
    }

    #[test]
    fn test_string_literals_share_identity() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var a = \"foo\"; var b = \"foo\"; var r = a == b;"),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "r"));

        let a = global(&mut vm, "a");
        let b = global(&mut vm, "b");
        assert!(std::ptr::eq(as_string(&a), as_string(&b)));
    }

    #[test]
    fn test_string_concatenation_is_associative_and_interned() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var a = \"st\"; var b = \"ri\"; var c = \"ng\";
                 var left = (a + b) + c;
                 var right = a + (b + c);
                 var r = left == right;"
            ),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "r"));
        assert_eq!(global_string(&mut vm, "left"), "string");
    }

    #[test]
    fn test_globals_define_and_assign() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var a = 1; a = a + 2; var r = a;"),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 3.0);
    }

    #[test]
    fn test_assign_to_undefined_global_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("missing = 1;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_read_of_undefined_global_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_locals_and_shadowing() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var r = 0;
                 {
                     var a = 1;
                     {
                         var a = 2;
                         r = r + a;
                     }
                     r = r + a;
                 }"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 3.0);
    }

    #[test]
    fn test_if_else_branches() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var r = 0;
                 if (1 < 2) { r = 1; } else { r = 2; }
                 if (nil) { r = r + 10; } else { r = r + 20; }"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 21.0);
    }

    #[test]
    fn test_and_or_short_circuit() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var r1 = false and 1;
                 var r2 = true and 2;
                 var r3 = false or 3;
                 var r4 = 4 or 5;"
            ),
            InterpretResult::InterpretOk
        );
        assert!(!global_bool(&mut vm, "r1"));
        assert_eq!(global_number(&mut vm, "r2"), 2.0);
        assert_eq!(global_number(&mut vm, "r3"), 3.0);
        assert_eq!(global_number(&mut vm, "r4"), 4.0);
    }

    #[test]
    fn test_while_loop() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var i = 0;
                 var sum = 0;
                 while (i < 3) { sum = sum + i; i = i + 1; }"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "sum"), 3.0);
        assert_eq!(global_number(&mut vm, "i"), 3.0);
    }

    #[test]
    fn test_for_loop_with_all_clauses() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var sum = 0;
                 for (var i = 0; i < 5; i = i + 1) { sum = sum + i; }"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "sum"), 10.0);
    }

    #[test]
    fn test_function_call_and_return() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "fun sum(a, b, c) { return a + b + c; }
                 var r = 4 + sum(5, 6, 7);"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 22.0);
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("fun noop() {} var r = noop();"),
            InterpretResult::InterpretOk
        );
        assert!(is_nil(&global(&mut vm, "r")));
    }

    #[test]
    fn test_arity_mismatch_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("fun f() { return 1; } var x = f(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_calling_a_non_callable_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var x = 1; x();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_deep_recursion_overflows_the_frame_stack() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("fun f() { f(); } f();"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_subtracting_string_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("\"str\" - 1;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_mixed_add_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("\"str\" + 1;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_vm_stays_usable_after_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print missing;"),
            InterpretResult::InterpretRuntimeError
        );
        assert_eq!(
            vm.interpret("var r = 1 + 1;"),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 2.0);
    }

    #[test]
    fn test_closure_counter_shares_its_cell() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "fun make() {
                     var x = 0;
                     fun inc() { x = x + 1; return x; }
                     return inc;
                 }
                 var c = make();
                 var r1 = c();
                 var r2 = c();
                 var r3 = c();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r1"), 1.0);
        assert_eq!(global_number(&mut vm, "r2"), 2.0);
        assert_eq!(global_number(&mut vm, "r3"), 3.0);
    }

    #[test]
    fn test_two_closures_observe_the_same_cell() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var set;
                 var get;
                 fun main() {
                     var a = \"initial\";
                     fun setter() { a = \"updated\"; }
                     fun getter() { return a; }
                     set = setter;
                     get = getter;
                 }
                 main();
                 set();
                 var r = get();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_string(&mut vm, "r"), "updated");
    }

    #[test]
    fn test_upvalue_closes_when_block_exits() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var f;
                 {
                     var captured = 10;
                     fun inner() { return captured; }
                     f = inner;
                 }
                 var r = f();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 10.0);
    }

    #[test]
    fn test_class_construction_and_fields() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class N { init(x) { this.x = x; } }
                 var r = N(42).x;"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 42.0);
    }

    #[test]
    fn test_default_constructor_rejects_arguments() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("class Empty {} Empty(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_set_property_leaves_the_value_on_the_stack() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class Box {}
                 var box = Box();
                 var r = box.x = 7;"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 7.0);
    }

    #[test]
    fn test_methods_dispatch_through_instances() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class Counter {
                     init() { this.count = 0; }
                     bump() { this.count = this.count + 1; return this.count; }
                 }
                 var c = Counter();
                 c.bump();
                 var r = c.bump();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 2.0);
    }

    #[test]
    fn test_bound_method_keeps_its_receiver() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class A {
                     init() { this.x = 5; }
                     m() { return this.x; }
                 }
                 var bound = A().m;
                 var r = bound();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 5.0);
    }

    #[test]
    fn test_field_shadowing_a_method_is_invoked() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "fun free() { return 42; }
                 class Box {}
                 var box = Box();
                 box.f = free;
                 var r = box.f();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 42.0);
    }

    #[test]
    fn test_inherited_method_dispatch() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class A { greet() { return \"hi\"; } }
                 class B < A {}
                 var r = B().greet();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_string(&mut vm, "r"), "hi");
    }

    #[test]
    fn test_super_invoke() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class A { m() { return 1; } }
                 class B < A { m() { return super.m() + 1; } }
                 var r = B().m();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_number(&mut vm, "r"), 2.0);
    }

    #[test]
    fn test_get_super_produces_a_callable() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class A { m() { return \"A\"; } }
                 class B < A {
                     grab() {
                         var f = super.m;
                         return f();
                     }
                 }
                 var r = B().grab();"
            ),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_string(&mut vm, "r"), "A");
    }

    #[test]
    fn test_inheriting_from_a_non_class_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var NotClass = 1; class Sub < NotClass {}"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_undefined_property_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("class A {} A().missing;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_property_on_non_instance_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var x = 1; x.field;"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_zero_divided_by_zero_is_not_equal_to_itself() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var r = 0/0 == 0/0;"),
            InterpretResult::InterpretOk
        );
        assert!(!global_bool(&mut vm, "r"));
    }

    #[test]
    fn test_double_negation_matches_truthiness() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var zero = !!0;
                 var empty = !!\"\";
                 var of_nil = !!nil;
                 var of_false = !!false;"
            ),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "zero"));
        assert!(global_bool(&mut vm, "empty"));
        assert!(!global_bool(&mut vm, "of_nil"));
        assert!(!global_bool(&mut vm, "of_false"));
    }

    #[test]
    fn test_clock_native_is_registered() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var t = clock(); var r = t >= 0;"),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "r"));
    }

    #[test]
    fn test_native_arity_mismatch_is_a_runtime_error() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("clock(1);"),
            InterpretResult::InterpretRuntimeError
        );
    }

    #[test]
    fn test_print_statement_runs() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("print 1 + 2 * 3; print \"hi\"; print nil;"),
            InterpretResult::InterpretOk
        );
    }

    #[test]
    fn test_compile_error_reported_as_such() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret("var a; { var a = 1; var a = 2; }"),
            InterpretResult::InterpretCompileError
        );
    }

    #[test]
    fn test_collection_preserves_reachable_state() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "class Pair { init(a, b) { this.a = a; this.b = b; } }
                 var kept = Pair(\"left\", \"right\");
                 fun make() { var x = \"cell\"; fun get() { return x; } return get; }
                 var getter = make();"
            ),
            InterpretResult::InterpretOk
        );

        vm.collect_garbage();

        // Everything reachable through globals must still be usable.
        assert_eq!(
            vm.interpret("var r = getter(); var ra = kept.a;"),
            InterpretResult::InterpretOk
        );
        assert_eq!(global_string(&mut vm, "r"), "cell");
        assert_eq!(global_string(&mut vm, "ra"), "left");
        assert_eq!(vm.gc.stats().cycles, 1);
    }

    #[test]
    fn test_collection_drops_garbage_and_prunes_interned_strings() {
        let mut vm = VM::new();
        // The concatenation result is thrown away; only the literals stay
        // reachable through the constant pools.
        assert_eq!(
            vm.interpret("\"abandoned-\" + \"string\";"),
            InterpretResult::InterpretOk
        );

        let interned_before = vm.intern_strings.len();
        let objects_before = vm.object_manager.object_count();
        vm.collect_garbage();
        assert!(vm.object_manager.object_count() < objects_before);
        assert!(vm.intern_strings.len() < interned_before);
        assert!(vm.gc.stats().last_cycle.freed_bytes > 0);
        assert!(vm.gc.stats().last_cycle.freed_objects > 0);
    }

    #[test]
    fn test_gc_does_not_change_observable_behavior() {
        let mut vm = VM::new();
        assert_eq!(
            vm.interpret(
                "var sum = 0;
                 for (var i = 0; i < 50; i = i + 1) {
                     var s = \"x\" + \"y\";
                     sum = sum + 1;
                 }"
            ),
            InterpretResult::InterpretOk
        );
        vm.collect_garbage();
        assert_eq!(
            vm.interpret("var check = sum == 50;"),
            InterpretResult::InterpretOk
        );
        assert!(global_bool(&mut vm, "check"));
    }
}
