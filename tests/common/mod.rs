// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

pub mod events;
pub mod memory_provider;
