//! The privileged side effects of bring-up, behind one trait.
//!
//! The orchestrator never executes `lgdt`, `ltr` or `lidt` itself; it asks the
//! [`Platform`] at a fixed point in the boot sequence. [`X86Platform`] talks to
//! the CPU, tests substitute a recorder.

use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables;
use x86_64::structures::gdt::{GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::DescriptorTablePointer;

use crate::config::{BootError, FramebufferHandle};
use crate::console;
use crate::interrupts::gdt::Selectors;
use crate::interrupts::idt::VectorTable;

pub trait Platform {
    fn init_console(&mut self, handle: &FramebufferHandle) -> Result<(), BootError>;

    /// Loads `gdt` and reloads the segment registers from `selectors`.
    ///
    /// # Safety
    ///
    /// `selectors` must index valid descriptors of `gdt`.
    unsafe fn load_gdt(&mut self, gdt: &'static GlobalDescriptorTable, selectors: &Selectors);

    /// # Safety
    ///
    /// `selector` must name an available TSS descriptor in the loaded GDT.
    unsafe fn load_task_register(&mut self, selector: SegmentSelector);

    fn task_register(&self) -> SegmentSelector;

    /// # Safety
    ///
    /// Every entry of `table` must be present and point at a valid handler.
    unsafe fn load_vector_table(&mut self, table: &'static VectorTable);

    fn vector_table_pointer(&self) -> DescriptorTablePointer;
}

/// The bootstrap CPU.
pub struct X86Platform;

impl Platform for X86Platform {
    fn init_console(&mut self, handle: &FramebufferHandle) -> Result<(), BootError> {
        console::init(handle)
    }

    unsafe fn load_gdt(&mut self, gdt: &'static GlobalDescriptorTable, selectors: &Selectors) {
        gdt.load();
        CS::set_reg(selectors.code);
        DS::set_reg(selectors.data);
        ES::set_reg(selectors.data);
        SS::set_reg(selectors.data);
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        tables::load_tss(selector);
    }

    fn task_register(&self) -> SegmentSelector {
        let raw: u16;
        // SAFETY: `str` only reads the task register.
        unsafe {
            core::arch::asm!("str {0:x}", out(reg) raw, options(nomem, nostack, preserves_flags));
        }
        SegmentSelector(raw)
    }

    unsafe fn load_vector_table(&mut self, table: &'static VectorTable) {
        tables::lidt(&table.pointer());
    }

    fn vector_table_pointer(&self) -> DescriptorTablePointer {
        tables::sidt()
    }
}
