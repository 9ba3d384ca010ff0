#![deny(unsafe_code)]

pub mod clock;
pub mod ebpf;
pub mod export;
pub mod iface;
