//! Core drivers and drive control for the obstacle-avoiding robot on no-std embedded platforms.
//!
//! For a runnable host simulation, see the `sim-mcu` application under `oar-app/`.
#![no_std]

pub mod utils;
