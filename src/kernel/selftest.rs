//! Post-boot exercises of the console and the trap path.

use x86_64::instructions::interrupts;

use crate::config::{BootConfig, SelfTest, SELF_TEST_VECTOR};
use crate::console::{self, ConsoleSink};
use crate::interrupts::handlers;
use crate::kernel::banner;

/// Prints formatter samples: characters, strings, integers, tab stops and radixes.
pub fn printk_self_test<S: ConsoleSink + ?Sized>(sink: &mut S) -> core::fmt::Result {
    writeln!(sink, "\nTesting printk...")?;
    writeln!(sink, "{}", 't')?;
    writeln!(sink, "{}", "xxx")?;
    writeln!(sink, "{} {} {}", 1i32, 2i64, 3i128)?;
    writeln!(sink, "%")?;

    writeln!(sink, "\nTesting tab...")?;
    writeln!(sink, "date\t\tname\tscore")?;
    writeln!(sink, "2022-01-01\tDavid\t99")?;
    writeln!(sink, "2022-01-01\tJohn\t95")?;

    writeln!(sink, "\nTest base 8 : {} --> {:o}", 255, 255)?;
    writeln!(sink, "\nTest base 16 : {} --> {:x}", 255, 255)?;
    writeln!(sink, "\nTest base 16 : {} --> {:X}", 255, 255)
}

/// Raises the fault `test` describes.
///
/// Returns only for the exercises whose handler resumes.
pub fn trigger(test: SelfTest) {
    match test {
        SelfTest::None => {}
        SelfTest::UnassignedVector => {
            // SAFETY: the vector has a present gate to the fallback, which returns.
            unsafe { core::arch::asm!("int {v}", v = const SELF_TEST_VECTOR) };
        }
        SelfTest::Breakpoint => interrupts::int3(),
        SelfTest::InvalidRead { addr } => {
            // SAFETY: the read faults; the page fault handler never returns here.
            let value = unsafe { core::ptr::read_volatile(addr.as_ptr::<u32>()) };
            log::error!(
                "read of {:#x} returned {:#x} instead of faulting",
                addr.as_u64(),
                value
            );
        }
    }
}

/// The kernel body after bring-up.
pub fn run(config: &BootConfig) -> ! {
    console::with_console(|c| banner::show_welcome(c));

    if config.printk_self_test {
        let _ = console::with_console(|c| printk_self_test(c));
    }

    if let Some(vector) = config.self_test.vector() {
        log::info!("self-test {:?} raising vector {:#x}", config.self_test, vector);
        let before = handlers::trap_count(vector) + handlers::unknown_trap_count();
        trigger(config.self_test);
        let after = handlers::trap_count(vector) + handlers::unknown_trap_count();
        log::info!("self-test returned, {} trap(s) delivered", after - before);
        crate::kprintln!("Self-test resumed after {} trap(s).", after - before);
    }

    crate::hlt_loop()
}
