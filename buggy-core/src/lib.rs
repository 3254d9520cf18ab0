//! Core drivers and behavior controller for the seeker buggy on no-std embedded platforms.
//!
//! For a runnable simulation, see the `buggy-app/mock-mcu` binary.
#![no_std]

extern crate alloc;

pub mod utils;
