/// Kernel bring-up and the post-boot kernel body
pub mod banner;
pub mod init;
pub mod selftest;
pub mod status;

pub use init::{boot, BootReport, BootTables};
pub use selftest::run;
pub use status::{BootPhase, BootProgress, InitStatus};
