//! # Trap and Task-State Bring-up
//!
//! - **gdt**: GDT with kernel segments and the TSS, one stack per TSS slot
//! - **idt**: the 256-entry vector table and the handler set that fills it
//! - **handlers**: dedicated exception handlers and the fallback handler
//! - **platform**: the `lgdt`/`ltr`/`lidt` side effects behind a trait
//!
//! ## Order
//!
//! 1. TSS built, GDT loaded, task register loaded
//! 2. Vector table fully populated, then loaded
//!
//! Interrupts stay disabled throughout; nothing here executes `sti`.

pub mod gdt;
pub mod handlers;
pub mod idt;
pub mod platform;

pub use gdt::{Selectors, StackSet};
pub use handlers::{kernel_handlers, TrapContext};
pub use idt::{install_all, HandlerSet, VectorTable};
pub use platform::{Platform, X86Platform};
