//! # Exception Handlers
//!
//! | Vector            | Handler                  | Action                         |
//! |-------------------|--------------------------|--------------------------------|
//! | 3 (#BP)           | `breakpoint_handler`     | Report, resume                 |
//! | 0, 6              | divide error, invalid op | Report, park                   |
//! | 8 (#DF)           | `double_fault_handler`   | Report, park (IST stack)       |
//! | 10-14, 17, 21, 29, 30 | error-code handlers  | Report, park                   |
//! | everything else   | `fallback_handler`       | Warn, resume                   |
//!
//! "Park" ends the interrupted context: the CPU halts in the handler and
//! never returns to it. Every vector that pushes an error code has a dedicated
//! handler, because the fallback's frame layout has no room for one.
//!
//! Handlers report through [`console::try_with_console`] so a trap taken while
//! the console is locked still reaches the serial log instead of deadlocking.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};
use x86_64::VirtAddr;

use crate::config::BootError;
use crate::console::{self, ConsoleSink};
use crate::framebuffer::Color;
use crate::interrupts::gdt::{DOUBLE_FAULT_IST_INDEX, PAGE_FAULT_IST_INDEX};
use crate::interrupts::idt::{Handler, HandlerSet, VECTOR_COUNT};

/// What a handler knows about the trap it is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    /// `None` in the fallback, which is shared by every unassigned vector.
    pub vector: Option<u8>,
    pub instruction_pointer: VirtAddr,
    pub stack_pointer: VirtAddr,
    pub error_code: Option<u64>,
}

impl TrapContext {
    pub fn from_frame(vector: Option<u8>, frame: &InterruptStackFrame) -> Self {
        Self {
            vector,
            instruction_pointer: frame.instruction_pointer,
            stack_pointer: frame.stack_pointer,
            error_code: None,
        }
    }

    pub fn with_error_code(mut self, error_code: u64) -> Self {
        self.error_code = Some(error_code);
        self
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);
static TRAP_COUNTS: [AtomicU64; VECTOR_COUNT] = [ZERO; VECTOR_COUNT];
static UNKNOWN_TRAPS: AtomicU64 = AtomicU64::new(0);

/// Counts a delivered trap and returns the new total for its vector.
pub fn record_trap(vector: Option<u8>) -> u64 {
    let counter = match vector {
        Some(v) => &TRAP_COUNTS[v as usize],
        None => &UNKNOWN_TRAPS,
    };
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

pub fn trap_count(vector: u8) -> u64 {
    TRAP_COUNTS[vector as usize].load(Ordering::Relaxed)
}

/// Traps that reached the fallback handler.
pub fn unknown_trap_count() -> u64 {
    UNKNOWN_TRAPS.load(Ordering::Relaxed)
}

fn report_line<S: ConsoleSink + ?Sized>(
    sink: &mut S,
    marker: &str,
    color: Color,
    message: fmt::Arguments<'_>,
) {
    let _ = sink.write_str("[");
    sink.write_colored(color, Color::BLACK, marker);
    let _ = writeln!(sink, "] {}", message);
}

/// The fallback's diagnostic: exactly one `[WARN]` line.
pub fn report_unknown_trap<S: ConsoleSink + ?Sized>(sink: &mut S, ctx: &TrapContext) {
    let rip = ctx.instruction_pointer.as_u64();
    match ctx.vector {
        Some(vector) => report_line(
            sink,
            "WARN",
            Color::YELLOW,
            format_args!(
                "Unknown interrupt or fault (vector {:#x}) at RIP {:#x}.",
                vector, rip
            ),
        ),
        None => report_line(
            sink,
            "WARN",
            Color::YELLOW,
            format_args!("Unknown interrupt or fault at RIP {:#x}.", rip),
        ),
    }
}

pub fn report_breakpoint<S: ConsoleSink + ?Sized>(sink: &mut S, ctx: &TrapContext) {
    report_line(
        sink,
        "INFO",
        Color::GREEN,
        format_args!("Breakpoint at RIP {:#x}.", ctx.instruction_pointer.as_u64()),
    );
}

pub fn report_fault<S: ConsoleSink + ?Sized>(
    sink: &mut S,
    label: fmt::Arguments<'_>,
    ctx: &TrapContext,
) {
    let rip = ctx.instruction_pointer.as_u64();
    match ctx.error_code {
        Some(code) => report_line(
            sink,
            "FAULT",
            Color::RED,
            format_args!("{} at RIP {:#x} (error code {:#x}).", label, rip, code),
        ),
        None => report_line(
            sink,
            "FAULT",
            Color::RED,
            format_args!("{} at RIP {:#x}.", label, rip),
        ),
    }
}

/// Reports a fault the interrupted context cannot survive, then halts for good.
fn park_after(label: fmt::Arguments<'_>, ctx: &TrapContext) -> ! {
    record_trap(ctx.vector);
    log::error!(
        "{} at {:#x}, error code {:?}, parking",
        label,
        ctx.instruction_pointer.as_u64(),
        ctx.error_code
    );
    console::try_with_console(|c| report_fault(c, label, ctx));
    crate::hlt_loop()
}

pub extern "x86-interrupt" fn fallback_handler(stack_frame: InterruptStackFrame) {
    let ctx = TrapContext::from_frame(None, &stack_frame);
    let count = record_trap(None);
    log::warn!(
        "unknown interrupt or fault at {:#x} ({} so far)",
        ctx.instruction_pointer.as_u64(),
        count
    );
    console::try_with_console(|c| report_unknown_trap(c, &ctx));
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    let ctx = TrapContext::from_frame(Some(3), &stack_frame);
    record_trap(ctx.vector);
    log::info!("breakpoint at {:#x}", ctx.instruction_pointer.as_u64());
    console::try_with_console(|c| report_breakpoint(c, &ctx));
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    let ctx = TrapContext::from_frame(Some(0), &stack_frame);
    park_after(format_args!("Divide error"), &ctx)
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    let ctx = TrapContext::from_frame(Some(6), &stack_frame);
    park_after(format_args!("Invalid opcode"), &ctx)
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    let ctx = TrapContext::from_frame(Some(8), &stack_frame).with_error_code(error_code);
    park_after(format_args!("Double fault"), &ctx)
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let ctx = TrapContext::from_frame(Some(14), &stack_frame).with_error_code(error_code.bits());
    match Cr2::read() {
        Ok(addr) => park_after(
            format_args!("Page fault accessing {:#x} ({:?})", addr.as_u64(), error_code),
            &ctx,
        ),
        Err(_) => park_after(
            format_args!("Page fault at a non-canonical address ({:?})", error_code),
            &ctx,
        ),
    }
}

macro_rules! parking_handler_with_error_code {
    ($name:ident, $vector:literal, $label:literal) => {
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame, error_code: u64) {
            let ctx = TrapContext::from_frame(Some($vector), &stack_frame)
                .with_error_code(error_code);
            park_after(format_args!($label), &ctx)
        }
    };
}

parking_handler_with_error_code!(invalid_tss_handler, 10, "Invalid TSS");
parking_handler_with_error_code!(segment_not_present_handler, 11, "Segment not present");
parking_handler_with_error_code!(stack_segment_fault_handler, 12, "Stack-segment fault");
parking_handler_with_error_code!(general_protection_fault_handler, 13, "General protection fault");
parking_handler_with_error_code!(alignment_check_handler, 17, "Alignment check");
parking_handler_with_error_code!(control_protection_handler, 21, "Control protection exception");
parking_handler_with_error_code!(vmm_communication_handler, 29, "VMM communication exception");
parking_handler_with_error_code!(security_exception_handler, 30, "Security exception");

/// The kernel's handler set: the table above plus the fallback.
pub fn kernel_handlers() -> Result<HandlerSet, BootError> {
    let mut set = HandlerSet::new(fallback_handler);
    set.assign(0, Handler::plain(divide_error_handler))?;
    set.assign(3, Handler::plain(breakpoint_handler).trap_gate())?;
    set.assign(6, Handler::plain(invalid_opcode_handler))?;
    set.assign(
        8,
        Handler::diverging_with_error_code(double_fault_handler)
            .on_stack(DOUBLE_FAULT_IST_INDEX)?,
    )?;
    set.assign(10, Handler::with_error_code(invalid_tss_handler))?;
    set.assign(11, Handler::with_error_code(segment_not_present_handler))?;
    set.assign(12, Handler::with_error_code(stack_segment_fault_handler))?;
    set.assign(13, Handler::with_error_code(general_protection_fault_handler))?;
    set.assign(
        14,
        Handler::page_fault(page_fault_handler).on_stack(PAGE_FAULT_IST_INDEX)?,
    )?;
    set.assign(17, Handler::with_error_code(alignment_check_handler))?;
    set.assign(21, Handler::with_error_code(control_protection_handler))?;
    set.assign(29, Handler::with_error_code(vmm_communication_handler))?;
    set.assign(30, Handler::with_error_code(security_exception_handler))?;
    Ok(set)
}
