//! GDT and Task State Segment construction.
//!
//! Every TSS stack slot (RSP0-RSP2 and IST1-IST7) gets its own statically
//! reserved stack. A nested fault at a different privilege level or IST index
//! therefore never overwrites the frame of the fault it interrupted.

use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::config::BootError;
use crate::interrupts::platform::Platform;

pub const STACK_SIZE: usize = 4096 * 4;
pub const PRIVILEGE_STACKS: usize = 3;
pub const INTERRUPT_STACKS: usize = 7;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
pub const PAGE_FAULT_IST_INDEX: u16 = 1;

const PRIVILEGE_SLOT_NAMES: [&str; PRIVILEGE_STACKS] = ["rsp0", "rsp1", "rsp2"];
const INTERRUPT_SLOT_NAMES: [&str; INTERRUPT_STACKS] =
    ["ist1", "ist2", "ist3", "ist4", "ist5", "ist6", "ist7"];

#[repr(C, align(16))]
pub struct Stack([u8; STACK_SIZE]);

impl Stack {
    pub const fn new() -> Self {
        Self([0; STACK_SIZE])
    }

    /// Highest address of the stack; stacks grow down from here.
    pub fn top(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.0.as_ptr()) + STACK_SIZE as u64
    }
}

/// One stack per TSS slot.
pub struct StackSet {
    pub privilege: [Stack; PRIVILEGE_STACKS],
    pub interrupt: [Stack; INTERRUPT_STACKS],
}

impl StackSet {
    pub const fn new() -> Self {
        const EMPTY: Stack = Stack::new();
        Self {
            privilege: [EMPTY; PRIVILEGE_STACKS],
            interrupt: [EMPTY; INTERRUPT_STACKS],
        }
    }

    fn slots(&self) -> impl Iterator<Item = (&'static str, VirtAddr)> + '_ {
        let privilege = PRIVILEGE_SLOT_NAMES
            .iter()
            .zip(self.privilege.iter())
            .map(|(name, stack)| (*name, stack.top()));
        let interrupt = INTERRUPT_SLOT_NAMES
            .iter()
            .zip(self.interrupt.iter())
            .map(|(name, stack)| (*name, stack.top()));
        privilege.chain(interrupt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selectors {
    pub code: SegmentSelector,
    pub data: SegmentSelector,
    pub tss: SegmentSelector,
}

fn check_stack_top(
    name: &'static str,
    top: VirtAddr,
    seen: &[VirtAddr],
) -> Result<(), BootError> {
    if top.is_null() || !top.is_aligned(16u64) || seen.contains(&top) {
        return Err(BootError::BadStack { slot: name });
    }
    Ok(())
}

/// Points every stack slot of `tss` at its own stack in `stacks`.
pub fn fill_task_state(tss: &mut TaskStateSegment, stacks: &StackSet) -> Result<(), BootError> {
    let mut seen = [VirtAddr::zero(); PRIVILEGE_STACKS + INTERRUPT_STACKS];
    for (i, (name, top)) in stacks.slots().enumerate() {
        check_stack_top(name, top, &seen[..i])?;
        seen[i] = top;
    }

    // The TSS is packed; its tables are assigned whole, never borrowed.
    let mut privilege = [VirtAddr::zero(); PRIVILEGE_STACKS];
    let mut interrupt = [VirtAddr::zero(); INTERRUPT_STACKS];
    privilege.copy_from_slice(&seen[..PRIVILEGE_STACKS]);
    interrupt.copy_from_slice(&seen[PRIVILEGE_STACKS..]);
    tss.privilege_stack_table = privilege;
    tss.interrupt_stack_table = interrupt;
    tss.iomap_base = core::mem::size_of::<TaskStateSegment>() as u16;
    Ok(())
}

/// Appends the kernel segments and the TSS system descriptor to `gdt`.
pub fn install_descriptors(
    gdt: &mut GlobalDescriptorTable,
    tss: &'static TaskStateSegment,
) -> Selectors {
    let code = gdt.append(Descriptor::kernel_code_segment());
    let data = gdt.append(Descriptor::kernel_data_segment());
    let tss = gdt.append(Descriptor::tss_segment(tss));
    Selectors { code, data, tss }
}

/// Builds the TSS in `tss`, installs it into `gdt` and activates both.
///
/// The GDT is loaded before the task register: `ltr` looks the selector up in
/// the live GDT and marks that descriptor busy.
pub fn build_and_activate<P: Platform>(
    platform: &mut P,
    tss: &'static mut TaskStateSegment,
    gdt: &'static mut GlobalDescriptorTable,
    stacks: &'static StackSet,
) -> Result<Selectors, BootError> {
    fill_task_state(tss, stacks)?;
    let tss: &'static TaskStateSegment = tss;
    let selectors = install_descriptors(gdt, tss);
    let gdt: &'static GlobalDescriptorTable = gdt;

    // SAFETY: the GDT and TSS are 'static and fully built; the selectors come
    // from the table being loaded.
    unsafe {
        platform.load_gdt(gdt, &selectors);
        platform.load_task_register(selectors.tss);
    }

    let found = platform.task_register();
    if found != selectors.tss {
        return Err(BootError::TaskRegisterMismatch {
            expected: selectors.tss.0,
            found: found.0,
        });
    }
    log::info!(
        "TSS at {:p} active, selector {:#x}",
        tss as *const TaskStateSegment,
        selectors.tss.0
    );
    Ok(selectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPlatform, Step};
    use x86_64::PrivilegeLevel;

    fn leak<T>(value: T) -> &'static mut T {
        Box::leak(Box::new(value))
    }

    #[test]
    fn every_slot_gets_a_distinct_aligned_stack() {
        let stacks = StackSet::new();
        let mut tss = TaskStateSegment::new();
        fill_task_state(&mut tss, &stacks).unwrap();

        let (privilege, interrupt) = (tss.privilege_stack_table, tss.interrupt_stack_table);
        let mut tops: Vec<u64> = privilege
            .iter()
            .chain(interrupt.iter())
            .map(|addr| addr.as_u64())
            .collect();
        assert!(tops.iter().all(|&top| top != 0 && top % 16 == 0));
        tops.sort_unstable();
        tops.dedup();
        assert_eq!(tops.len(), PRIVILEGE_STACKS + INTERRUPT_STACKS);
    }

    #[test]
    fn stack_tops_bound_their_regions() {
        let stacks = StackSet::new();
        let mut tss = TaskStateSegment::new();
        fill_task_state(&mut tss, &stacks).unwrap();

        let base = stacks.interrupt[DOUBLE_FAULT_IST_INDEX as usize].0.as_ptr() as u64;
        let interrupt = tss.interrupt_stack_table;
        let top = interrupt[DOUBLE_FAULT_IST_INDEX as usize].as_u64();
        assert_eq!(top - base, STACK_SIZE as u64);
        let iomap_base = tss.iomap_base;
        assert_eq!(iomap_base as usize, core::mem::size_of::<TaskStateSegment>());
    }

    #[test]
    fn aliased_stacks_are_rejected() {
        let top = VirtAddr::new(0x8000);
        assert_eq!(check_stack_top("ist1", top, &[]), Ok(()));
        assert_eq!(
            check_stack_top("ist2", top, &[top]),
            Err(BootError::BadStack { slot: "ist2" })
        );
        assert_eq!(
            check_stack_top("rsp0", VirtAddr::new(0x8008), &[]),
            Err(BootError::BadStack { slot: "rsp0" })
        );
        assert_eq!(
            check_stack_top("rsp1", VirtAddr::zero(), &[]),
            Err(BootError::BadStack { slot: "rsp1" })
        );
    }

    #[test]
    fn descriptors_follow_the_null_entry() {
        let tss = leak(TaskStateSegment::new());
        let mut gdt = GlobalDescriptorTable::new();
        let selectors = install_descriptors(&mut gdt, tss);
        assert_eq!(selectors.code, SegmentSelector::new(1, PrivilegeLevel::Ring0));
        assert_eq!(selectors.data, SegmentSelector::new(2, PrivilegeLevel::Ring0));
        assert_eq!(selectors.tss, SegmentSelector::new(3, PrivilegeLevel::Ring0));
    }

    #[test]
    fn task_register_reads_back_the_installed_selector() {
        let mut platform = RecordingPlatform::new();
        let stacks: &'static StackSet = leak(StackSet::new());
        let selectors = build_and_activate(
            &mut platform,
            leak(TaskStateSegment::new()),
            leak(GlobalDescriptorTable::new()),
            stacks,
        )
        .unwrap();

        assert_eq!(platform.task_register(), selectors.tss);
        assert_eq!(platform.steps, [Step::LoadGdt, Step::LoadTaskRegister]);
        assert_eq!(platform.loaded_selectors, Some(selectors));
    }

    #[test]
    fn mismatched_task_register_is_reported() {
        let mut platform = RecordingPlatform::new();
        platform.ignore_ltr = true;
        let err = build_and_activate(
            &mut platform,
            leak(TaskStateSegment::new()),
            leak(GlobalDescriptorTable::new()),
            leak(StackSet::new()),
        )
        .unwrap_err();
        assert_eq!(err, BootError::TaskRegisterMismatch { expected: 0x18, found: 0 });
    }
}
