#![no_std]
#![no_main]

extern crate rlibc;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::fmt::Write;
use core::panic::PanicInfo;

use trap_bringup::config::{BootConfig, BootError};
use trap_bringup::console;
use trap_bringup::interrupts::{kernel_handlers, X86Platform};
use trap_bringup::kernel::{self, BootTables};
use trap_bringup::{hlt_loop, serial, serial_println};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.kernel_stack_size = 128 * 1024;
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial::init();

    match bring_up(boot_info) {
        Ok(config) => kernel::run(&config),
        Err(e) => {
            serial_println!("Kernel initialization failed: {}", e);
            hlt_loop()
        }
    }
}

fn bring_up(boot_info: &'static mut BootInfo) -> Result<BootConfig, BootError> {
    let config = BootConfig::from_boot_info(boot_info)?;
    serial::init_logger(config.log_level)?;

    let tables = BootTables::take().ok_or(BootError::TablesAlreadyTaken)?;
    let handlers = kernel_handlers()?;
    let report = kernel::boot(&mut X86Platform, &config, tables, &handlers)?;
    log::info!(
        "bring-up complete: code {:#x}, tss {:#x}",
        report.selectors.code.0,
        report.selectors.tss.0
    );
    Ok(config)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let msg = info.message();
    let loc = info.location();
    serial_println!("PANIC : {} | {:?}", msg, loc);
    console::try_with_console(|c| {
        let _ = writeln!(c, "PANIC : {}", msg);
    });

    hlt_loop()
}
