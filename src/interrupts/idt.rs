//! # Interrupt Descriptor Table
//!
//! A 256-entry table of 16-byte gate descriptors in the layout the CPU reads
//! (Intel SDM Vol. 3A, 6.14.1):
//!
//! | Bytes | Field                                             |
//! |-------|---------------------------------------------------|
//! | 0-1   | handler offset 15:0                               |
//! | 2-3   | code segment selector                             |
//! | 4-5   | IST (2:0), gate type (11:8), DPL (14:13), P (15)  |
//! | 6-7   | handler offset 31:16                              |
//! | 8-11  | handler offset 63:32                              |
//! | 12-15 | reserved                                          |
//!
//! [`install_all`] fills every slot: a dedicated handler where one is assigned,
//! the fallback handler everywhere else. No vector is left "not present", so a
//! stray vector reaches the fallback instead of escalating to a double fault.

use x86_64::structures::gdt::SegmentSelector;
use x86_64::structures::idt::{
    DivergingHandlerFuncWithErrCode, HandlerFunc, HandlerFuncWithErrCode, PageFaultHandlerFunc,
};
use x86_64::structures::DescriptorTablePointer;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::config::BootError;
use crate::interrupts::gdt::INTERRUPT_STACKS;
use crate::interrupts::platform::Platform;

pub const VECTOR_COUNT: usize = 256;

/// Exceptions for which the CPU pushes an error code.
pub const ERROR_CODE_VECTORS: [u8; 10] = [8, 10, 11, 12, 13, 14, 17, 21, 29, 30];

pub fn pushes_error_code(vector: u8) -> bool {
    ERROR_CODE_VECTORS.contains(&vector)
}

const PRESENT: u16 = 1 << 15;
const DPL_SHIFT: u16 = 13;
const TYPE_SHIFT: u16 = 8;
const IST_MASK: u16 = 0b111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateType {
    /// Clears IF on entry.
    Interrupt = 0xE,
    /// Leaves IF untouched.
    Trap = 0xF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    options: u16,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl GateDescriptor {
    /// A not-present interrupt gate.
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: (GateType::Interrupt as u16) << TYPE_SHIFT,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    /// A present, ring 0 gate to `handler` through `selector`.
    pub fn new(handler: VirtAddr, selector: SegmentSelector, gate: GateType) -> Self {
        let addr = handler.as_u64();
        Self {
            offset_low: addr as u16,
            selector: selector.0,
            options: PRESENT | ((gate as u16) << TYPE_SHIFT),
            offset_mid: (addr >> 16) as u16,
            offset_high: (addr >> 32) as u32,
            reserved: 0,
        }
    }

    /// Switches to IST slot `index` (0-based, as in the TSS table) on entry.
    pub fn with_stack_index(mut self, index: u16) -> Self {
        self.options = (self.options & !IST_MASK) | ((index + 1) & IST_MASK);
        self
    }

    /// Lowest privilege level allowed to raise this vector with `int`.
    pub fn with_privilege_level(mut self, dpl: PrivilegeLevel) -> Self {
        self.options = (self.options & !(0b11 << DPL_SHIFT)) | ((dpl as u16) << DPL_SHIFT);
        self
    }

    pub fn is_present(&self) -> bool {
        self.options & PRESENT != 0
    }

    pub fn handler_addr(&self) -> VirtAddr {
        let addr = self.offset_low as u64
            | (self.offset_mid as u64) << 16
            | (self.offset_high as u64) << 32;
        VirtAddr::new_truncate(addr)
    }

    pub fn selector(&self) -> SegmentSelector {
        SegmentSelector(self.selector)
    }

    pub fn gate_type(&self) -> Option<GateType> {
        match (self.options >> TYPE_SHIFT) & 0xF {
            0xE => Some(GateType::Interrupt),
            0xF => Some(GateType::Trap),
            _ => None,
        }
    }

    pub fn stack_index(&self) -> Option<u16> {
        match self.options & IST_MASK {
            0 => None,
            ist => Some(ist - 1),
        }
    }

    pub fn privilege_level(&self) -> PrivilegeLevel {
        PrivilegeLevel::from_u16((self.options >> DPL_SHIFT) & 0b11)
    }
}

#[repr(C, align(16))]
pub struct VectorTable {
    entries: [GateDescriptor; VECTOR_COUNT],
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            entries: [GateDescriptor::missing(); VECTOR_COUNT],
        }
    }

    pub fn entry(&self, vector: u8) -> &GateDescriptor {
        &self.entries[vector as usize]
    }

    pub fn set(&mut self, vector: u8, gate: GateDescriptor) {
        self.entries[vector as usize] = gate;
    }

    pub fn entries(&self) -> &[GateDescriptor; VECTOR_COUNT] {
        &self.entries
    }

    /// Base and limit for `lidt`.
    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (core::mem::size_of::<Self>() - 1) as u16,
            base: VirtAddr::from_ptr(self as *const Self),
        }
    }

    /// The table exactly as the CPU sees it.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `GateDescriptor` is `repr(C)` without padding, so every byte
        // of the table is initialized.
        unsafe {
            core::slice::from_raw_parts(
                (self as *const Self).cast::<u8>(),
                core::mem::size_of::<Self>(),
            )
        }
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a handler expects the CPU to have pushed an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Plain,
    ErrorCode,
}

/// A dedicated handler and how its gate is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    address: VirtAddr,
    kind: HandlerKind,
    gate: GateType,
    stack_index: Option<u16>,
}

impl Handler {
    fn from_addr(address: usize, kind: HandlerKind) -> Self {
        Self {
            address: VirtAddr::new(address as u64),
            kind,
            gate: GateType::Interrupt,
            stack_index: None,
        }
    }

    pub fn plain(f: HandlerFunc) -> Self {
        Self::from_addr(f as usize, HandlerKind::Plain)
    }

    pub fn with_error_code(f: HandlerFuncWithErrCode) -> Self {
        Self::from_addr(f as usize, HandlerKind::ErrorCode)
    }

    pub fn page_fault(f: PageFaultHandlerFunc) -> Self {
        Self::from_addr(f as usize, HandlerKind::ErrorCode)
    }

    pub fn diverging_with_error_code(f: DivergingHandlerFuncWithErrCode) -> Self {
        Self::from_addr(f as usize, HandlerKind::ErrorCode)
    }

    /// Runs the handler on IST slot `ist_index` (0-based).
    pub fn on_stack(mut self, ist_index: u16) -> Result<Self, BootError> {
        if ist_index as usize >= INTERRUPT_STACKS {
            return Err(BootError::BadStackIndex(ist_index));
        }
        self.stack_index = Some(ist_index);
        Ok(self)
    }

    /// Leaves IF set while the handler runs.

    pub fn trap_gate(mut self) -> Self {
        self.gate = GateType::Trap;
        self
    }

    pub fn address(&self) -> VirtAddr {
        self.address
    }

    fn gate(&self, selector: SegmentSelector) -> GateDescriptor {
        let gate = GateDescriptor::new(self.address, selector, self.gate);
        match self.stack_index {
            Some(index) => gate.with_stack_index(index),
            None => gate,
        }
    }
}

/// The dedicated handlers plus the fallback covering everything else.
#[derive(Clone)]
pub struct HandlerSet {
    fallback: Handler,
    dedicated: [Option<Handler>; VECTOR_COUNT],
}

impl HandlerSet {
    pub fn new(fallback: HandlerFunc) -> Self {
        Self {
            fallback: Handler::plain(fallback),
            dedicated: [None; VECTOR_COUNT],
        }
    }

    /// Assigns `handler` to `vector`, replacing any earlier assignment.
    pub fn assign(&mut self, vector: u8, handler: Handler) -> Result<(), BootError> {
        let expected = if pushes_error_code(vector) {
            HandlerKind::ErrorCode
        } else {
            HandlerKind::Plain
        };
        if handler.kind != expected {
            return Err(BootError::HandlerSignature { vector });
        }
        self.dedicated[vector as usize] = Some(handler);
        Ok(())
    }

    pub fn dedicated(&self, vector: u8) -> Option<&Handler> {
        self.dedicated[vector as usize].as_ref()
    }

    pub fn fallback(&self) -> VirtAddr {
        self.fallback.address
    }

    /// Dedicated handlers take precedence; the fallback covers the rest.
    pub fn resolve(&self, vector: u8) -> &Handler {
        self.dedicated(vector).unwrap_or(&self.fallback)
    }

    /// The fallback takes no error code, so it must never receive one.
    pub fn validate(&self) -> Result<(), BootError> {
        match ERROR_CODE_VECTORS
            .iter()
            .find(|&&v| self.dedicated(v).is_none())
        {
            Some(&vector) => Err(BootError::FallbackOnErrorCodeVector(vector)),
            None => Ok(()),
        }
    }
}

/// Writes a present gate for every vector into `table`.
///
/// Re-running with the same handler set and selector rewrites identical bytes.
pub fn install_all(
    table: &mut VectorTable,
    handlers: &HandlerSet,
    code_selector: SegmentSelector,
) {
    for vector in 0..=u8::MAX {
        table.set(vector, handlers.resolve(vector).gate(code_selector));
    }
}

/// Fills `table`, then makes it the CPU's IDT.
///
/// The table only becomes visible to the CPU after the last entry is written.
pub fn install_and_load<P: Platform>(
    platform: &mut P,
    table: &'static mut VectorTable,
    handlers: &HandlerSet,
    code_selector: SegmentSelector,
) -> Result<&'static VectorTable, BootError> {
    handlers.validate()?;
    install_all(table, handlers, code_selector);
    let table: &'static VectorTable = table;

    // SAFETY: every entry was just written as a present gate to a handler
    // from `handlers`.
    unsafe { platform.load_vector_table(table) };

    let loaded = platform.vector_table_pointer();
    let expected = table.pointer();
    let (base, limit) = (loaded.base, loaded.limit);
    if base != VirtAddr::from_ptr(table as *const VectorTable) || limit != expected.limit {
        return Err(BootError::VectorTableMismatch);
    }
    log::info!(
        "IDT at {:#x} loaded, {} vectors present",
        base.as_u64(),
        table.entries().iter().filter(|e| e.is_present()).count()
    );
    Ok(table)
}
