//! Fuzz target: calibration fitting and application
//!
//! Builds reference points from arbitrary bytes, runs every built-in
//! method through the engine and checks that a successful fit applies
//! without panicking and survives a storage round trip.
//!
//! cargo fuzz run fuzz_calibration

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensorfleet::adapters::memory_store::MemoryStore;
use sensorfleet::calibration::{CalibrationEngine, ReferencePoint};
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let Some((&degree, rest)) = data.split_first() else {
        return;
    };
    let points: Vec<ReferencePoint> = rest
        .chunks_exact(16)
        .map(|c| {
            let mut raw = [0u8; 8];
            let mut reference = [0u8; 8];
            raw.copy_from_slice(&c[..8]);
            reference.copy_from_slice(&c[8..]);
            ReferencePoint::new(f64::from_le_bytes(raw), f64::from_le_bytes(reference))
        })
        .collect();

    let engine = CalibrationEngine::new();
    let params = json!({"degree": degree % 8});
    for method in engine.methods() {
        let Ok(fit) = engine.apply_method(&method, &points, &params) else {
            continue;
        };
        assert_eq!(fit.method_name(), method);
        for p in &points {
            let _ = fit.apply(p.raw);
        }

        engine.set_record("fuzz", fit.clone());
        let mut store = MemoryStore::new();
        if engine.save(&mut store).is_ok() {
            let restored = CalibrationEngine::new();
            assert_eq!(restored.load(&store).ok(), Some(1));
            // NaN coefficients never compare equal; compare the encoding.
            assert_eq!(
                format!("{:?}", restored.record("fuzz")),
                format!("{:?}", Some(fit))
            );
        }
    }
});
