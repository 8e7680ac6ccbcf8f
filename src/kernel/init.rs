//! Boot orchestration: console, then TSS, then vector table.
//!
//! Until the vector table is loaded any CPU fault resets the machine, so
//! nothing between the first and last phase may fault. Interrupts are left
//! disabled.

use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::structures::gdt::GlobalDescriptorTable;
use x86_64::structures::tss::TaskStateSegment;

use crate::config::{BootConfig, BootError};
use crate::interrupts::gdt::{self, Selectors, StackSet};
use crate::interrupts::idt::{self, HandlerSet, VectorTable};
use crate::interrupts::platform::Platform;
use crate::kernel::status::{BootPhase, BootProgress, InitStatus};

/// Storage for every structure the CPU reads after bring-up.
pub struct BootTables {
    pub tss: TaskStateSegment,
    pub gdt: GlobalDescriptorTable,
    pub idt: VectorTable,
    pub stacks: StackSet,
}

impl BootTables {
    pub const fn new() -> Self {
        Self {
            tss: TaskStateSegment::new(),
            gdt: GlobalDescriptorTable::new(),
            idt: VectorTable::new(),
            stacks: StackSet::new(),
        }
    }

    /// Hands out the kernel's tables; `None` on every call after the first.
    pub fn take() -> Option<&'static mut BootTables> {
        static TAKEN: AtomicBool = AtomicBool::new(false);
        static mut TABLES: BootTables = BootTables::new();

        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: `TAKEN` makes this the only reference ever created.
        Some(unsafe { &mut *core::ptr::addr_of_mut!(TABLES) })
    }
}

/// What bring-up produced.
pub struct BootReport {
    pub selectors: Selectors,
    pub vector_table: &'static VectorTable,
    pub progress: BootProgress,
}

fn start_phase(progress: &mut BootProgress, phase: BootPhase) {
    progress.set(phase, InitStatus::InProgress);
    log::info!("Initializing {}...", phase);
}

fn finish_phase<T>(
    progress: &mut BootProgress,
    phase: BootPhase,
    result: Result<T, BootError>,
) -> Result<T, BootError> {
    match result {
        Ok(value) => {
            progress.set(phase, InitStatus::Completed);
            log::info!("{} initialized", phase);
            Ok(value)
        }
        Err(e) => {
            progress.set(phase, InitStatus::Failed(e));
            log::error!("{} failed: {}", phase, e);
            Err(e)
        }
    }
}

/// Runs bring-up on `platform` using `tables` as the CPU-visible storage.
///
/// On error the failing phase is logged and no later phase runs.
pub fn boot<P: Platform>(
    platform: &mut P,
    config: &BootConfig,
    tables: &'static mut BootTables,
    handlers: &HandlerSet,
) -> Result<BootReport, BootError> {
    let mut progress = BootProgress::new();
    let BootTables { tss, gdt: gdt_storage, idt: idt_storage, stacks } = tables;
    let stacks: &'static StackSet = stacks;

    start_phase(&mut progress, BootPhase::Console);
    let console = config
        .validate()
        .and_then(|()| platform.init_console(&config.framebuffer));
    finish_phase(&mut progress, BootPhase::Console, console)?;

    start_phase(&mut progress, BootPhase::TaskState);
    let selectors = gdt::build_and_activate(platform, tss, gdt_storage, stacks);
    let selectors = finish_phase(&mut progress, BootPhase::TaskState, selectors)?;

    start_phase(&mut progress, BootPhase::VectorTable);
    let vector_table = idt::install_and_load(platform, idt_storage, handlers, selectors.code);
    let vector_table = finish_phase(&mut progress, BootPhase::VectorTable, vector_table)?;

    Ok(BootReport {
        selectors,
        vector_table,
        progress,
    })
}
