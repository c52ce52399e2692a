#![no_main]

use client::{ClientConfig, ClientSession, ConnectionState, SessionMode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut session = ClientSession::new(ClientConfig::for_testing(), SessionMode::Live)
        .with_limits(wire::Limits::for_testing());

    // Split the input into length-prefixed messages and feed them in order,
    // running a frame after each one.
    let mut idx = 0usize;
    let mut sequence = 0;
    while idx < data.len() && idx < 8192 {
        let len = (data[idx] as usize % 200).saturating_add(1);
        idx += 1;
        let end = (idx + len).min(data.len());
        sequence += 1;
        if session.parse_server_message(sequence, &data[idx..end]).is_err() {
            return;
        }
        idx = end;

        // Activation may jump the clock anywhere; after that it only moves forward.
        let active = session.connection() == ConnectionState::Active;
        let last_time = session.server_time();
        match session.frame(16) {
            Ok(Some(time)) if active => assert!(time >= last_time),
            Ok(None) => {}
            Err(_) => return,
        }
        while let Ok(Some(_)) = session.next_server_command() {}
    }
});
