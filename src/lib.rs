//! Trap-handling bring-up for an x86_64 kernel: framebuffer console, task
//! state segment and a fully populated interrupt vector table.

#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

pub mod config;
pub mod console;
pub mod framebuffer;
pub mod interrupts;
pub mod kernel;
pub mod serial;

#[cfg(test)]
mod testing;

/// Halts until the next interrupt, forever.
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
