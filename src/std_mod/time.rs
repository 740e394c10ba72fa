use crate::{
    objects::object::NativeObject,
    value::{make_number_value, Value},
};
use once_cell::sync::Lazy;
use std::time::Instant;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// The `clock()` native: seconds since process start, as a Number.
pub struct ClockTime;

impl ClockTime {
    pub fn new() -> Self {
        ClockTime {}
    }
}

impl NativeObject for ClockTime {
    fn run(&self, _args: &[Value]) -> Result<Value, String> {
        Ok(make_number_value(PROCESS_START.elapsed().as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_number, is_number};

    #[test]
    fn test_clock_is_monotonic() {
        let clock = ClockTime::new();
        let first = clock.run(&[]).unwrap();
        let second = clock.run(&[]).unwrap();
        assert!(is_number(&first));
        assert!(as_number(&second) >= as_number(&first));
    }
}
