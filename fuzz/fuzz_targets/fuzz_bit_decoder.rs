//! Fuzz target: `BitTimingDecoder::decode`
//!
//! Plays arbitrary frames down a simulated line for every known protocol
//! and checks that a decoded frame always carries a valid checksum and
//! that conversion never yields NaN.
//!
//! cargo fuzz run fuzz_bit_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensorfleet::adapters::sim_hal::SimulatedHardware;
use sensorfleet::decoder::{BitTimingDecoder, conversion, protocol, verify_checksum};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, frame)) = data.split_first() else {
        return;
    };
    let names: Vec<&str> = protocol::names().collect();
    let name = names[usize::from(selector) % names.len()];
    let Some(proto) = protocol::lookup(name) else {
        return;
    };

    let mut hw = SimulatedHardware::new();
    if selector & 0x80 == 0 {
        hw.queue_frame(4, frame);
    } else {
        hw.queue_silence(4);
    }

    let mut decoder = BitTimingDecoder::new(proto, 4);
    if let Ok(decoded) = decoder.decode(&mut hw) {
        assert!(verify_checksum(&decoded).is_ok());
        if let Some(family) = conversion::family_for(proto.name) {
            for (_, value) in family.convert(&decoded) {
                assert!(!value.is_nan());
            }
        }
    }
});
