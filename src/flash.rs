//! Flash programming engine
//!
//! [`FlashEngine`] is the only path to mutate the bank. It checks every
//! request against the [`MemoryMap`] before touching the controller, and
//! wraps each mutation in an unlock/lock cycle that relocks even on failure.

use core::ops::{Deref, DerefMut};

use crate::status::{Fault, FlashError};

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

/// Fixed layout of the flash bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    /// First address of the bank
    pub bank_start: u32,
    /// One past the last address of the bank
    pub bank_end: u32,
    /// First address of the application region, page aligned
    pub app_start: u32,
    /// Erase granule in bytes
    pub page_size: u32,
}

impl MemoryMap {
    /// 128 KiB medium density STM32F1, bootloader in pages 0..10
    pub const STM32F103XB: MemoryMap = MemoryMap {
        bank_start: 0x0800_0000,
        bank_end: 0x0802_0000,
        app_start: 0x0800_2800,
        page_size: 0x400,
    };

    pub fn size(&self) -> u32 {
        self.bank_end - self.bank_start
    }

    pub fn page_count(&self) -> u32 {
        self.size() / self.page_size
    }

    /// Start address of page `page`, if it exists
    pub fn page_address(&self, page: u32) -> Option<u32> {
        if page < self.page_count() {
            Some(self.bank_start + page * self.page_size)
        } else {
            None
        }
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::STM32F103XB
    }
}

/// Flash controller primitives
///
/// Implementations talk to the hardware (or emulate it). No bounds checks
/// are expected here, [`FlashEngine`] does those.
pub trait FlashHal {
    /// Unlock the controller for program and erase
    fn unlock(&mut self) -> Result<(), Fault>;

    /// Relock the controller
    fn lock(&mut self);

    /// Program one halfword, blocking until the controller is done
    fn program_halfword(&mut self, address: u32, value: u16) -> Result<(), Fault>;

    /// Erase the page starting at `address`, blocking until the controller is done
    fn erase_page(&mut self, address: u32) -> Result<(), Fault>;

    /// Memory mapped read
    fn read_byte(&self, address: u32) -> u8;

    /// Hardware device identifier
    fn device_id(&self) -> u32;
}

/// Controller held unlocked for the lifetime of the guard
struct Unlocked<'a, H: FlashHal> {
    hal: &'a mut H,
}

impl<'a, H: FlashHal> Unlocked<'a, H> {
    fn new(hal: &'a mut H) -> Result<Self, Fault> {
        if let Err(e) = hal.unlock() {
            hal.lock();
            return Err(e);
        }
        Ok(Self { hal })
    }
}

impl<'a, H: FlashHal> Deref for Unlocked<'a, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.hal
    }
}

impl<'a, H: FlashHal> DerefMut for Unlocked<'a, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.hal
    }
}

impl<'a, H: FlashHal> Drop for Unlocked<'a, H> {
    fn drop(&mut self) {
        self.hal.lock();
    }
}

pub struct FlashEngine<H> {
    hal: H,
    map: MemoryMap,
}

impl<H: FlashHal> FlashEngine<H> {
    pub fn new(hal: H, map: MemoryMap) -> Self {
        Self { hal, map }
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn release(self) -> H {
        self.hal
    }

    /// Program one halfword in the application region
    pub fn program(&mut self, address: u32, value: u16) -> Result<(), FlashError> {
        let end = address.checked_add(2);
        if address < self.map.app_start || end.map_or(true, |e| e > self.map.bank_end) {
            warn!("Rejecting program at 0x{:08x}", address);
            return Err(FlashError::Bounds(address));
        }

        let mut hal = Unlocked::new(&mut self.hal)?;
        hal.program_halfword(address, value).map_err(|e| {
            error!("Program at 0x{:08x} failed: {}", address, e);
            FlashError::Fault(e)
        })
    }

    /// Erase `pages` consecutive pages starting at `address`
    ///
    /// `address` must be page aligned unless it falls within the final page
    /// of the bank, in which case that page is erased. Each erased page is
    /// read back and must be blank.
    pub fn erase(&mut self, address: u32, pages: u8) -> Result<(), FlashError> {
        let map = self.map;

        let final_page = map.bank_end - map.page_size;
        if address < map.app_start || address >= map.bank_end {
            warn!("Rejecting erase at 0x{:08x}", address);
            return Err(FlashError::Bounds(address));
        }
        if (address - map.bank_start) % map.page_size != 0 && address < final_page {
            warn!("Rejecting unaligned erase at 0x{:08x}", address);
            return Err(FlashError::Bounds(address));
        }

        let start = address - (address - map.bank_start) % map.page_size;
        let len = pages as u32 * map.page_size;
        if len > map.bank_end - start {
            warn!(
                "Rejecting erase of {} pages from 0x{:08x}: past end of bank",
                pages, start
            );
            return Err(FlashError::Bounds(address));
        }

        debug!("Erasing {} pages from 0x{:08x}", pages, start);

        {
            let mut hal = Unlocked::new(&mut self.hal)?;
            for page in (start..start + len).step_by(map.page_size as usize) {
                hal.erase_page(page).map_err(|e| {
                    error!("Erase of page 0x{:08x} failed: {}", page, e);
                    FlashError::Fault(e)
                })?;
            }
        }

        for page in (start..start + len).step_by(map.page_size as usize) {
            let dirty = (page..page + map.page_size).find(|a| self.hal.read_byte(*a) != ERASED);
            if let Some(a) = dirty {
                error!("Page 0x{:08x} not blank after erase (0x{:08x})", page, a);
                return Err(FlashError::Verify(page));
            }
        }

        Ok(())
    }

    /// Read one byte anywhere in the bank
    pub fn read_byte(&self, address: u32) -> Result<u8, FlashError> {
        if address < self.map.bank_start || address >= self.map.bank_end {
            return Err(FlashError::Bounds(address));
        }
        Ok(self.hal.read_byte(address))
    }

    pub fn device_id(&self) -> u32 {
        self.hal.device_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemFlash;
    use crate::status::Status;

    const MAP: MemoryMap = MemoryMap::STM32F103XB;

    fn engine() -> FlashEngine<MemFlash> {
        FlashEngine::new(MemFlash::new(MAP, 1034), MAP)
    }

    #[test]
    fn page_addresses() {
        assert_eq!(MAP.page_count(), 128);
        assert_eq!(MAP.page_address(0), Some(0x0800_0000));
        assert_eq!(MAP.page_address(10), Some(MAP.app_start));
        assert_eq!(MAP.page_address(127), Some(0x0801_FC00));
        assert_eq!(MAP.page_address(128), None);
    }

    #[test]
    fn program_writes_halfword() {
        let mut f = engine();
        f.program(0x0800_2800, 0xBEEF).unwrap();

        let [a, b] = 0xBEEFu16.to_ne_bytes();
        assert_eq!(f.read_byte(0x0800_2800), Ok(a));
        assert_eq!(f.read_byte(0x0800_2801), Ok(b));
        assert!(f.hal().is_locked());
    }

    #[test]
    fn program_rejects_out_of_bounds_without_touching_hardware() {
        let mut f = engine();
        let rejected = [
            MAP.bank_start,
            MAP.app_start - 2,
            MAP.bank_end - 1,
            MAP.bank_end,
            0xFFFF_FFFF,
        ];

        for a in rejected.iter() {
            assert_eq!(f.program(*a, 0), Err(FlashError::Bounds(*a)));
        }
        assert_eq!(f.hal().operations(), 0);
        assert_eq!(f.hal().unlocks(), 0);
    }

    #[test]
    fn program_accepts_last_halfword() {
        let mut f = engine();
        assert_eq!(f.program(MAP.bank_end - 2, 0x1234), Ok(()));
    }

    #[test]
    fn program_reports_hardware_fault_verbatim() {
        let mut f = engine();
        f.hal_mut().fail_next(Fault::Busy);

        let e = f.program(MAP.app_start, 0).unwrap_err();
        assert_eq!(e, FlashError::Fault(Fault::Busy));
        assert_eq!(Status::from(e), Status::Busy);
        assert!(f.hal().is_locked());
    }

    #[test]
    fn erase_clears_exact_range() {
        let map = MAP;
        let image = vec![0u8; map.size() as usize];
        let mut f = FlashEngine::new(MemFlash::with_image(map, 0, &image), map);

        let start = map.app_start + map.page_size;
        f.erase(start, 2).unwrap();

        assert_eq!(f.read_byte(start - 1), Ok(0x00));
        for a in start..start + 2 * map.page_size {
            assert_eq!(f.read_byte(a), Ok(ERASED));
        }
        assert_eq!(f.read_byte(start + 2 * map.page_size), Ok(0x00));
        assert!(f.hal().is_locked());
    }

    #[test]
    fn erase_requires_alignment() {
        let mut f = engine();
        assert_eq!(
            f.erase(MAP.app_start + 4, 1),
            Err(FlashError::Bounds(MAP.app_start + 4))
        );
        assert_eq!(f.hal().operations(), 0);
    }

    #[test]
    fn erase_within_final_page_erases_that_page() {
        let map = MAP;
        let image = vec![0u8; map.size() as usize];
        let mut f = FlashEngine::new(MemFlash::with_image(map, 0, &image), map);

        f.erase(map.bank_end - 10, 1).unwrap();
        assert_eq!(f.read_byte(map.bank_end - map.page_size), Ok(ERASED));
        assert_eq!(f.read_byte(map.bank_end - map.page_size - 1), Ok(0x00));
    }

    #[test]
    fn erase_rejects_bootloader_region_and_overrun() {
        let mut f = engine();
        assert_eq!(f.erase(MAP.bank_start, 1), Err(FlashError::Bounds(MAP.bank_start)));
        assert_eq!(
            f.erase(MAP.bank_end - MAP.page_size, 2),
            Err(FlashError::Bounds(MAP.bank_end - MAP.page_size))
        );
        assert_eq!(f.erase(MAP.bank_end, 1), Err(FlashError::Bounds(MAP.bank_end)));
        assert_eq!(f.hal().operations(), 0);
    }

    #[test]
    fn erase_detects_stuck_bytes() {
        let mut f = engine();
        let page = MAP.app_start + 3 * MAP.page_size;
        f.hal_mut().stick(page + 17, 0x00);

        let e = f.erase(page, 1).unwrap_err();
        assert_eq!(e, FlashError::Verify(page));
        assert_eq!(Status::from(e), Status::FlashPageError);
    }

    #[test]
    fn failed_unlock_still_relocks() {
        let mut f = engine();
        f.hal_mut().fail_unlock(Fault::Error);

        assert_eq!(f.erase(MAP.app_start, 1), Err(FlashError::Fault(Fault::Error)));
        assert!(f.hal().is_locked());
        assert_eq!(f.hal().operations(), 0);
    }

    #[test]
    fn read_is_coarse_checked() {
        let f = engine();
        assert_eq!(f.read_byte(MAP.bank_start), Ok(ERASED));
        assert_eq!(f.read_byte(MAP.bank_end - 1), Ok(ERASED));
        assert_eq!(f.read_byte(MAP.bank_end), Err(FlashError::Bounds(MAP.bank_end)));
        assert_eq!(
            f.read_byte(MAP.bank_start - 1),
            Err(FlashError::Bounds(MAP.bank_start - 1))
        );
    }
}
