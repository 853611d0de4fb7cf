#![allow(dead_code)]

use std::collections::HashMap;

use facet::Facet;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// One value of each shape the queue is expected to carry.
#[derive(Debug, Clone, PartialEq, Facet)]
#[repr(u8)]
pub enum Sample {
    Text(String),
    Int(i64),
    Float(f64),
    Pair(i64, i64),
    List(Vec<i64>),
    Map(HashMap<String, i64>),
}

pub fn samples() -> Vec<Sample> {
    vec![
        Sample::Text("A string".to_string()),
        Sample::Int(0),
        Sample::Float(0.1),
        Sample::Pair(0, 1),
        Sample::List(vec![0, 1]),
        Sample::Map(HashMap::from([("a".to_string(), 1)])),
    ]
}
