//! Recording doubles for the privileged and console seams.

use core::fmt;

use x86_64::structures::gdt::{GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use crate::config::{BootError, FramebufferHandle};
use crate::console::ConsoleSink;
use crate::framebuffer::Color;
use crate::interrupts::gdt::Selectors;
use crate::interrupts::idt::VectorTable;
use crate::interrupts::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    InitConsole,
    LoadGdt,
    LoadTaskRegister,
    LoadVectorTable,
}

/// A CPU that remembers what it was asked to load.
pub(crate) struct RecordingPlatform {
    pub steps: Vec<Step>,
    pub tr: SegmentSelector,
    /// Makes `ltr` a no-op, as if the CPU rejected the selector.
    pub ignore_ltr: bool,
    pub loaded_selectors: Option<Selectors>,
    pub idtr: Option<(VirtAddr, u16)>,
    /// Whether every entry was present at the moment the table was loaded.
    pub loaded_table_fully_present: bool,
    pub console_error: Option<BootError>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            tr: SegmentSelector(0),
            ignore_ltr: false,
            loaded_selectors: None,
            idtr: None,
            loaded_table_fully_present: false,
            console_error: None,
        }
    }

    pub fn position(&self, step: Step) -> Option<usize> {
        self.steps.iter().position(|s| *s == step)
    }
}

impl Platform for RecordingPlatform {
    fn init_console(&mut self, _handle: &FramebufferHandle) -> Result<(), BootError> {
        self.steps.push(Step::InitConsole);
        match self.console_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    unsafe fn load_gdt(&mut self, _gdt: &'static GlobalDescriptorTable, selectors: &Selectors) {
        self.steps.push(Step::LoadGdt);
        self.loaded_selectors = Some(*selectors);
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        self.steps.push(Step::LoadTaskRegister);
        if !self.ignore_ltr {
            self.tr = selector;
        }
    }

    fn task_register(&self) -> SegmentSelector {
        self.tr
    }

    unsafe fn load_vector_table(&mut self, table: &'static VectorTable) {
        self.steps.push(Step::LoadVectorTable);
        self.loaded_table_fully_present = table.entries().iter().all(|e| e.is_present());
        let pointer = table.pointer();
        let (base, limit) = (pointer.base, pointer.limit);
        self.idtr = Some((base, limit));
    }

    fn vector_table_pointer(&self) -> DescriptorTablePointer {
        let (base, limit) = self.idtr.unwrap_or((VirtAddr::zero(), 0));
        DescriptorTablePointer { limit, base }
    }
}

/// A console that keeps its text instead of drawing it.
pub(crate) struct RecordingSink {
    pub text: String,
    pub colored: Vec<(Color, Color, String)>,
    cols: usize,
}

impl RecordingSink {
    pub fn new(cols: usize) -> Self {
        Self {
            text: String::new(),
            colored: Vec::new(),
            cols,
        }
    }

    /// Completed and partial lines, without the empty tail after a final `\n`.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.text.split('\n').map(String::from).collect();
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    pub fn count_marker(&self, marker: &str) -> usize {
        self.text.matches(marker).count()
    }
}

impl fmt::Write for RecordingSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.push_str(s);
        Ok(())
    }
}

impl ConsoleSink for RecordingSink {
    fn write_colored(&mut self, fg: Color, bg: Color, text: &str) {
        self.text.push_str(text);
        self.colored.push((fg, bg, text.to_string()));
    }

    fn columns(&self) -> usize {
        self.cols
    }
}
