// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Mailbox cell access
//!
//! Both sides of the mailbox access it through [`MailboxIo`].  Accesses are
//! single 32-bit reads and writes, with no locking - safety relies on only
//! one command being outstanding at a time.

use core::sync::atomic::{AtomicU32, Ordering};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::MAILBOX_CELLS;

/// Access to the mailbox's cells.
///
/// Methods take `&self` so the host and coprocessor can share one mailbox.
/// Out of range cells read as 0, and writes to them are ignored.
pub trait MailboxIo {
    fn read_cell(&self, index: usize) -> u32;
    fn write_cell(&self, index: usize, value: u32);

    /// Reads `buf.len()` consecutive cells starting at `index`.
    fn read_cells(&self, index: usize, buf: &mut [u32]) {
        for (ii, word) in buf.iter_mut().enumerate() {
            *word = self.read_cell(index + ii);
        }
    }

    /// Writes `data` to consecutive cells starting at `index`.
    fn write_cells(&self, index: usize, data: &[u32]) {
        for (ii, &word) in data.iter().enumerate() {
            self.write_cell(index + ii, word);
        }
    }
}

impl<T: MailboxIo + ?Sized> MailboxIo for &T {
    fn read_cell(&self, index: usize) -> u32 {
        (**self).read_cell(index)
    }

    fn write_cell(&self, index: usize, value: u32) {
        (**self).write_cell(index, value)
    }
}

/// A mailbox in ordinary memory, for a host and coprocessor running as
/// tasks on the same device.
///
/// Cell writes are `Release` and reads `Acquire`, so cells written before
/// the opcode are visible to whoever observes the opcode.
///
/// ```rust,ignore
/// static MAILBOX: AtomicMailbox = AtomicMailbox::new();
/// ```
#[derive(Debug)]
pub struct AtomicMailbox {
    cells: [AtomicU32; MAILBOX_CELLS],
}

impl Default for AtomicMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicMailbox {
    pub const fn new() -> Self {
        Self {
            cells: [const { AtomicU32::new(0) }; MAILBOX_CELLS],
        }
    }
}

impl MailboxIo for AtomicMailbox {
    fn read_cell(&self, index: usize) -> u32 {
        self.cells
            .get(index)
            .map_or(0, |cell| cell.load(Ordering::Acquire))
    }

    fn write_cell(&self, index: usize, value: u32) {
        match self.cells.get(index) {
            Some(cell) => cell.store(value, Ordering::Release),
            None => warn!("Error: Write to mailbox cell {index} out of range"),
        }
    }
}

/// A mailbox at a fixed address, for example a shared RAM region which the
/// host also maps.  Each access is a volatile 32-bit access.
#[derive(Debug)]
pub struct RamMailboxIo {
    base: *mut u32,
}

impl RamMailboxIo {
    /// Creates a mailbox at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be 4 byte aligned and valid for reads and writes of
    /// [`MAILBOX_CELLS`] words for the lifetime of this object.  Nothing else
    /// on this side may access the region other than through this object.
    pub const unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

impl MailboxIo for RamMailboxIo {
    fn read_cell(&self, index: usize) -> u32 {
        if index >= MAILBOX_CELLS {
            return 0;
        }
        // Safety: index checked against the region size guaranteed by new()
        unsafe { core::ptr::read_volatile(self.base.add(index)) }
    }

    fn write_cell(&self, index: usize, value: u32) {
        if index >= MAILBOX_CELLS {
            warn!("Error: Write to mailbox cell {index} out of range");
            return;
        }
        // Safety: index checked against the region size guaranteed by new()
        unsafe { core::ptr::write_volatile(self.base.add(index), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CELL_ARG, CELL_OPCODE, CELL_PAGE};

    #[test]
    fn atomic_cells() {
        let mailbox = AtomicMailbox::new();
        mailbox.write_cell(CELL_ARG, 0x100);
        mailbox.write_cell(CELL_OPCODE, 0x14);
        assert_eq!(mailbox.read_cell(CELL_OPCODE), 0x14);
        assert_eq!(mailbox.read_cell(CELL_ARG), 0x100);

        mailbox.write_cell(MAILBOX_CELLS, 1);
        assert_eq!(mailbox.read_cell(MAILBOX_CELLS), 0);
    }

    #[test]
    fn bulk_cells_via_reference() {
        let mailbox = AtomicMailbox::new();
        let io = &mailbox;
        io.write_cells(CELL_PAGE, &[1, 2, 3]);
        let mut buf = [0u32; 4];
        io.read_cells(CELL_PAGE, &mut buf);
        assert_eq!(buf, [1, 2, 3, 0]);
    }

    #[test]
    fn ram_cells() {
        let mut region = [0u32; MAILBOX_CELLS];
        let io = unsafe { RamMailboxIo::new(region.as_mut_ptr()) };
        io.write_cell(CELL_OPCODE, 0x12);
        io.write_cell(MAILBOX_CELLS + 1, 0xDEAD);
        assert_eq!(io.read_cell(CELL_OPCODE), 0x12);
        assert_eq!(io.read_cell(MAILBOX_CELLS + 1), 0);
        assert_eq!(region[CELL_OPCODE], 0x12);
    }
}
