#![no_main]

use libfuzzer_sys::fuzz_target;
use wire::{LimitKind, MsgReader};

fuzz_target!(|data: &[u8]| {
    let mut reader = MsgReader::new(data);
    let mut idx = 0usize;

    // Use input bytes to drive a bounded sequence of operations.
    while idx < data.len() && idx < 1024 {
        let op = data[idx] % 7;
        idx += 1;

        let ok = match op {
            0 => reader.read_u8().is_ok(),
            1 => reader.read_u16().is_ok(),
            2 => reader.read_i32().is_ok(),
            3 => reader.read_varu32().is_ok(),
            4 => reader.read_vars32().is_ok(),
            5 => reader.read_string(64).is_ok(),
            _ => reader.read_blob(LimitKind::AreamaskBytes, 32).is_ok(),
        };
        if !ok {
            break;
        }
    }
    assert!(reader.position() <= data.len());
});
