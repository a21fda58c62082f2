//! Frame persistence.
//!
//! [`FlashLog`] keeps an append-only log of length-prefixed records in a
//! dedicated NOR flash region:
//!
//! ```text
//! [len: u16 BE][record bytes][padding up to the write granularity]
//! ```
//!
//! A header reading as erased flash marks the first free slot, which is how
//! [`StorageSink::mount`] finds where to resume after a reset. Erase blocks are
//! erased only when the write cursor first enters them, so the log never
//! erases data it already holds. Once the region is full every append
//! fails with [`StorageError::OutOfSpace`]; the log does not wrap.
//!
//! A free header only counts when the rest of its block also reads erased.
//! Leftovers from an old image or a torn write make mount resume on the
//! next block boundary after the last good record, which then gets erased
//! before the first write.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::error::StorageError;

const HEADER_BYTES: usize = 2;

/// Destination of finished frames.
pub trait StorageSink {
    /// Brings the medium up. Called once at boot, before any append.
    fn mount(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Appends `bytes` to the store called `name`.
    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<T: StorageSink + ?Sized> StorageSink for &mut T {
    fn mount(&mut self) -> Result<(), StorageError> {
        (**self).mount()
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).append(name, bytes)
    }
}

/// Where a scan of the log stopped.
enum Tail {
    /// Erased slot, with the rest of its block erased too
    Free(u32),
    /// No usable slot; end of the last record found
    Stale(u32),
}

const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Append-only record log over the flash region `start..end`.
///
/// `BUF` bounds the padded size of one record and must cover the flash read
/// granularity.
pub struct FlashLog<F, const BUF: usize> {
    flash: F,
    name: &'static str,
    start: u32,
    end: u32,
    /// Byte value of erased flash
    erase_value: u8,
    mounted: bool,
    /// Next free slot
    cursor: u32,
    /// Everything from `cursor` up to here is known to be erased
    erased_until: u32,
}

impl<F: NorFlash, const BUF: usize> FlashLog<F, BUF> {
    /// Creates the log over `start..end`, named `name`. Both bounds must sit
    /// on erase block boundaries; nothing is touched until it is mounted.
    pub fn new(flash: F, name: &'static str, start: u32, end: u32, erase_value: u8) -> Self {
        Self {
            flash,
            name,
            start,
            end,
            erase_value,
            mounted: false,
            cursor: start,
            erased_until: start,
        }
    }

    pub fn release(self) -> F {
        self.flash
    }

    /// Bytes occupied by stored records, padding included.
    pub fn used(&self) -> u32 {
        self.cursor - self.start
    }

    /// Bytes still free in the log region.
    pub fn remaining(&self) -> u32 {
        self.end - self.cursor
    }

    /// Visits every stored record in append order and returns how many there
    /// were.
    pub fn records(&mut self, mut visit: impl FnMut(&[u8])) -> Result<usize, StorageError> {
        let mut count = 0;
        self.scan(|record| {
            count += 1;
            visit(record);
        })?;
        Ok(count)
    }

    fn span(len: usize) -> u32 {
        align_up((HEADER_BYTES + len) as u32, F::WRITE_SIZE as u32)
    }

    fn is_free(&self, header: [u8; HEADER_BYTES]) -> bool {
        header == [self.erase_value; HEADER_BYTES]
    }

    /// Walks the records from the region start.
    ///
    /// A block with a malformed header is skipped as a whole, and so is a
    /// free header followed by bytes that are not erased. Records past a
    /// skipped block are still visited.
    fn scan(&mut self, mut visit: impl FnMut(&[u8])) -> Result<Tail, StorageError> {
        let block = F::ERASE_SIZE as u32;
        let header_read = align_up(HEADER_BYTES as u32, F::READ_SIZE as u32) as usize;
        let mut buf = [0u8; BUF];
        let mut offset = self.start;
        let mut last_record_end = self.start;

        while offset + header_read as u32 <= self.end {
            self.read(offset, &mut buf[..header_read])?;
            let header = [buf[0], buf[1]];
            let block_end = align_up(offset + 1, block).min(self.end);

            if self.is_free(header) {
                if self.is_erased(offset, block_end)? {
                    return Ok(Tail::Free(offset));
                }
                warn!("stale bytes after {=u32:#x}, skipping block", offset);
                offset = block_end;
                continue;
            }

            let len = usize::from(u16::from_be_bytes(header));
            let span = Self::span(len);
            if len == 0 || span as usize > BUF || offset + span > self.end {
                warn!("malformed record at {=u32:#x}, skipping block", offset);
                offset = block_end;
                continue;
            }

            let record_read = align_up((HEADER_BYTES + len) as u32, F::READ_SIZE as u32) as usize;
            self.read(offset, &mut buf[..record_read])?;
            visit(&buf[HEADER_BYTES..HEADER_BYTES + len]);
            offset += span;
            last_record_end = offset;
        }

        Ok(Tail::Stale(last_record_end))
    }

    /// Whether `from..to` reads back as erased flash.
    fn is_erased(&mut self, from: u32, to: u32) -> Result<bool, StorageError> {
        let mut buf = [0u8; BUF];
        let chunk = (BUF / F::READ_SIZE * F::READ_SIZE) as u32;
        let mut offset = from;

        while offset < to {
            let len = chunk.min(to - offset) as usize;
            self.read(offset, &mut buf[..len])?;
            if buf[..len].iter().any(|b| *b != self.erase_value) {
                return Ok(false);
            }
            offset += len as u32;
        }

        Ok(true)
    }

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), StorageError> {
        self.flash.read(offset, bytes).map_err(|_| {
            error!("flash read at {=u32:#x} failed", offset);
            StorageError::Flash
        })
    }

    /// Erases blocks ahead of the cursor until `until` is covered.
    fn prepare(&mut self, until: u32) -> Result<(), StorageError> {
        let block = F::ERASE_SIZE as u32;

        while self.erased_until < until {
            let from = self.erased_until;
            trace!("erasing {=u32:#x}", from);
            self.flash.erase(from, from + block).map_err(|_| {
                error!("flash erase at {=u32:#x} failed", from);
                StorageError::Flash
            })?;
            self.erased_until = from + block;
        }

        Ok(())
    }
}

impl<F: NorFlash, const BUF: usize> StorageSink for FlashLog<F, BUF> {
    /// Validates the region and positions the cursor after the last record.
    fn mount(&mut self) -> Result<(), StorageError> {
        let block = F::ERASE_SIZE as u32;
        let (start, end) = (self.start, self.end);
        if start % block != 0
            || end % block != 0
            || end <= start
            || end as usize > self.flash.capacity()
        {
            error!("invalid log region {=u32:#x}..{=u32:#x}", start, end);
            return Err(StorageError::Flash);
        }

        match self.scan(|_| {})? {
            Tail::Free(cursor) => {
                // Checked erased up to the end of the cursor's block
                self.cursor = cursor;
                self.erased_until = align_up(cursor, block).min(end);
            }
            Tail::Stale(last_record_end) => {
                // Nothing after the last record can be trusted, resume on a
                // fresh block and erase it on entry
                self.cursor = align_up(last_record_end, block).min(end);
                self.erased_until = self.cursor;
                warn!(
                    "{=str}: no erased slot found, resuming at {=u32:#x}",
                    self.name,
                    self.cursor
                );
            }
        }
        self.mounted = true;

        info!(
            "{=str}: {=u32} of {=u32} bytes used",
            self.name,
            self.cursor - start,
            end - start
        );
        Ok(())
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        if name != self.name {
            return Err(StorageError::UnknownStore);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let span = Self::span(bytes.len());
        let header = match u16::try_from(bytes.len()) {
            Ok(len) if span as usize <= BUF => len.to_be_bytes(),
            _ => return Err(StorageError::RecordTooLarge),
        };
        if self.is_free(header) {
            return Err(StorageError::RecordTooLarge);
        }
        if self.cursor + span > self.end {
            warn!("{=str} is full", self.name);
            return Err(StorageError::OutOfSpace);
        }

        let mut buf = [self.erase_value; BUF];
        buf[..HEADER_BYTES].copy_from_slice(&header);
        buf[HEADER_BYTES..HEADER_BYTES + bytes.len()].copy_from_slice(bytes);

        self.prepare(self.cursor + span)?;
        self.flash
            .write(self.cursor, &buf[..span as usize])
            .map_err(|_| {
                error!("flash write at {=u32:#x} failed", self.cursor);
                StorageError::Flash
            })?;

        self.cursor += span;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use embedded_storage::nor_flash::{ErrorType, NorFlashErrorKind};

    const SIZE: usize = 256;
    const BLOCK: usize = 64;

    /// RAM backed flash with 4-byte writes and 64-byte erase blocks. Writing
    /// over bytes that are not erased fails like real NOR flash would.
    pub(crate) struct MemFlash {
        pub data: [u8; SIZE],
        pub erase_value: u8,
        pub erases: usize,
    }

    impl MemFlash {
        pub fn new(fill: u8, erase_value: u8) -> Self {
            Self {
                data: [fill; SIZE],
                erase_value,
                erases: 0,
            }
        }

        pub fn erased() -> Self {
            Self::new(0xFF, 0xFF)
        }
    }

    impl ErrorType for MemFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for MemFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            let source = self
                .data
                .get(offset..offset + bytes.len())
                .ok_or(NorFlashErrorKind::OutOfBounds)?;
            bytes.copy_from_slice(source);
            Ok(())
        }

        fn capacity(&self) -> usize {
            SIZE
        }
    }

    impl NorFlash for MemFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = BLOCK;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            let (from, to) = (from as usize, to as usize);
            if from % BLOCK != 0 || to % BLOCK != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            self.data[from..to].fill(self.erase_value);
            self.erases += (to - from) / BLOCK;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            if offset % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let target = &mut self.data[offset..offset + bytes.len()];
            if target.iter().any(|b| *b != self.erase_value) {
                return Err(NorFlashErrorKind::Other);
            }
            target.copy_from_slice(bytes);
            Ok(())
        }
    }

    type Log = FlashLog<MemFlash, 64>;

    fn mounted(flash: MemFlash, start: u32, erase_value: u8) -> Log {
        let mut log = Log::new(flash, "datalog.bin", start, 256, erase_value);
        log.mount().unwrap();
        log
    }

    fn record(seed: u8) -> [u8; 50] {
        let mut bytes = [0u8; 50];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
        bytes
    }

    fn stored(log: &mut Log) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        log.records(|r| records.push(r.to_vec())).unwrap();
        records
    }

    #[test]
    fn test_append_and_remount() {
        let mut log = mounted(MemFlash::erased(), 0, 0xFF);
        assert_eq!(log.used(), 0);

        log.append("datalog.bin", &record(1)).unwrap();
        log.append("datalog.bin", &record(2)).unwrap();
        // 2 byte header plus 50 bytes, already 4-byte aligned
        assert_eq!(log.used(), 104);

        let mut log = mounted(log.release(), 0, 0xFF);
        assert_eq!(log.used(), 104);
        log.append("datalog.bin", &record(3)).unwrap();

        assert_eq!(
            stored(&mut log),
            [record(1).to_vec(), record(2).to_vec(), record(3).to_vec()]
        );
    }

    #[test]
    fn test_padding_to_write_size() {
        let mut log = mounted(MemFlash::erased(), 0, 0xFF);

        log.append("datalog.bin", &[0xAB; 3]).unwrap();
        assert_eq!(log.used(), 8);

        let flash = log.release();
        assert_eq!(flash.data[..8], [0x00, 0x03, 0xAB, 0xAB, 0xAB, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_blocks_erased_on_entry() {
        // Never erased: writing anywhere without an erase first would fail
        let mut flash = MemFlash::new(0x5A, 0xFF);
        flash.data[..2].fill(0xFF);

        let mut log = mounted(flash, 0, 0xFF);
        log.append("datalog.bin", &record(1)).unwrap();
        assert_eq!(log.flash.erases, 1);

        // The second record straddles into the next block
        log.append("datalog.bin", &record(2)).unwrap();
        assert_eq!(log.flash.erases, 2);

        let mut log = mounted(log.release(), 0, 0xFF);
        log.append("datalog.bin", &record(3)).unwrap();
        assert_eq!(log.flash.erases, 3);
        assert_eq!(stored(&mut log).len(), 3);
    }

    #[test]
    fn test_mount_over_stale_bytes() {
        // One 4-byte record, then a free header with leftovers behind it
        let mut flash = MemFlash::new(0x5A, 0xFF);
        flash.data[..8].copy_from_slice(&[0x00, 0x04, 1, 2, 3, 4, 0xFF, 0xFF]);
        flash.data[8..10].fill(0xFF);

        let mut log = mounted(flash, 0, 0xFF);
        assert_eq!(log.used(), 64);
        log.append("datalog.bin", &record(0)).unwrap();
        log.append("datalog.bin", &record(1)).unwrap();

        // Records behind the skipped block are found again
        let mut log = mounted(log.release(), 0, 0xFF);
        assert_eq!(log.used(), 168);
        log.append("datalog.bin", &record(2)).unwrap();
        assert_eq!(
            stored(&mut log),
            [
                vec![1, 2, 3, 4],
                record(0).to_vec(),
                record(1).to_vec(),
                record(2).to_vec(),
            ]
        );
    }

    #[test]
    fn test_mount_over_garbage_region() {
        let mut log = mounted(MemFlash::new(0x5A, 0xFF), 0, 0xFF);
        assert_eq!(log.used(), 0);

        log.append("datalog.bin", &record(1)).unwrap();
        assert_eq!(log.flash.erases, 1);
        assert_eq!(stored(&mut log), [record(1).to_vec()]);
    }

    #[test]
    fn test_full_region() {
        let mut log = mounted(MemFlash::erased(), 0, 0xFF);

        for seed in 0..4 {
            log.append("datalog.bin", &record(seed)).unwrap();
        }
        assert_eq!(log.remaining(), 48);
        assert_eq!(
            log.append("datalog.bin", &record(4)),
            Err(StorageError::OutOfSpace)
        );
        assert_eq!(stored(&mut log).len(), 4);
    }

    #[test]
    fn test_rejects_unknown_store_and_large_records() {
        let mut log = mounted(MemFlash::erased(), 0, 0xFF);

        assert_eq!(
            log.append("other.bin", &record(0)),
            Err(StorageError::UnknownStore)
        );
        assert_eq!(
            log.append("datalog.bin", &[0; 63]),
            Err(StorageError::RecordTooLarge)
        );
        assert_eq!(log.used(), 0);
    }

    #[test]
    fn test_skips_malformed_block() {
        let mut flash = MemFlash::erased();
        flash.data[0] = 0x7F;
        flash.data[1] = 0x00;

        let mut log = mounted(flash, 0, 0xFF);
        assert_eq!(log.used(), 64);

        log.append("datalog.bin", &record(9)).unwrap();
        let mut log = mounted(log.release(), 0, 0xFF);
        assert_eq!(stored(&mut log), [record(9).to_vec()]);
    }

    #[test]
    fn test_zero_erase_value() {
        let mut log = mounted(MemFlash::new(0x00, 0x00), 64, 0x00);
        log.append("datalog.bin", &record(7)).unwrap();

        let mut log = mounted(log.release(), 64, 0x00);
        assert_eq!(log.used(), 52);
        assert_eq!(stored(&mut log), [record(7).to_vec()]);
    }

    #[test]
    fn test_invalid_region() {
        let mut log = Log::new(MemFlash::erased(), "datalog.bin", 10, 256, 0xFF);
        assert_eq!(log.mount(), Err(StorageError::Flash));

        let mut log = Log::new(MemFlash::erased(), "datalog.bin", 0, 512, 0xFF);
        assert_eq!(log.mount(), Err(StorageError::Flash));
        assert_eq!(
            log.append("datalog.bin", &record(0)),
            Err(StorageError::NotMounted)
        );
    }
}
