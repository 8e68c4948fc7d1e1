//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Once;

use celltrack_rs::{Traxel, TraxelStore};

static INIT_LOGGING: Once = Once::new();

/// Route `tracing` output to the test harness. The first call wins.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Traxel with a position, detection probabilities `[0.1, 0.9]` and an
/// optional division probability.
pub fn cell(t: u32, id: u32, x: f64, y: f64, division: Option<f64>) -> Traxel {
    let builder = Traxel::builder(t, id)
        .position(x, y, 0.0)
        .size(50.0)
        .detection_probabilities(vec![0.1, 0.9]);
    match division {
        Some(p) => builder.division_probability(p).build(),
        None => builder.build(),
    }
}

pub fn store(traxels: Vec<Traxel>) -> TraxelStore {
    TraxelStore::from_traxels(traxels).expect("valid traxels")
}

/// Group traxels by timestep, the shape of an in-memory traxel source.
pub fn frames(traxels: Vec<Traxel>) -> BTreeMap<u32, Vec<Traxel>> {
    let mut frames: BTreeMap<u32, Vec<Traxel>> = BTreeMap::new();
    for traxel in traxels {
        frames.entry(traxel.timestep).or_default().push(traxel);
    }
    frames
}

/// Proptest configuration with a fixed case count.
pub fn test_proptest_config(cases: u32) -> proptest::test_runner::Config {
    proptest::test_runner::Config {
        cases,
        ..proptest::test_runner::Config::default()
    }
}
