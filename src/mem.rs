//! RAM backed flash bank
//!
//! Emulates the STM32F1 flash controller closely enough to run the
//! bootloader on a host: programming needs the controller unlocked, a
//! halfword aligned address and an erased target (writing zero is always
//! allowed), otherwise the controller reports an error like PGERR/WRPRTERR.

use crate::flash::{FlashHal, MemoryMap, ERASED};
use crate::status::Fault;

pub struct MemFlash {
    map: MemoryMap,
    data: Vec<u8>,
    device_id: u32,
    locked: bool,
    fail_next: Option<Fault>,
    fail_unlock: Option<Fault>,
    stuck: Vec<(u32, u8)>,
    operations: usize,
    unlocks: usize,
}

impl MemFlash {
    /// Create an erased bank
    pub fn new(map: MemoryMap, device_id: u32) -> Self {
        Self {
            map,
            data: vec![ERASED; map.size() as usize],
            device_id,
            locked: true,
            fail_next: None,
            fail_unlock: None,
            stuck: Vec::new(),
            operations: 0,
            unlocks: 0,
        }
    }

    /// Create a bank pre-filled from `image`, the rest left erased
    pub fn with_image(map: MemoryMap, device_id: u32, image: &[u8]) -> Self {
        let mut flash = Self::new(map, device_id);
        let len = core::cmp::min(image.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&image[..len]);
        flash
    }

    /// Bank contents, starting at `bank_start`
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of program and erase operations issued to the controller
    pub fn operations(&self) -> usize {
        self.operations
    }

    /// Number of successful unlocks
    pub fn unlocks(&self) -> usize {
        self.unlocks
    }

    /// Fail the next program or erase with `fault`
    pub fn fail_next(&mut self, fault: Fault) {
        self.fail_next = Some(fault);
    }

    /// Fail the next unlock with `fault`
    pub fn fail_unlock(&mut self, fault: Fault) {
        self.fail_unlock = Some(fault);
    }

    /// Pin the byte at `address` to `value` across erases
    pub fn stick(&mut self, address: u32, value: u8) {
        self.stuck.push((address, value));
    }

    fn offset(&self, address: u32) -> Option<usize> {
        if address >= self.map.bank_start && address < self.map.bank_end {
            Some((address - self.map.bank_start) as usize)
        } else {
            None
        }
    }

    fn begin(&mut self) -> Result<(), Fault> {
        if self.locked {
            return Err(Fault::Error);
        }
        self.operations += 1;
        match self.fail_next.take() {
            Some(f) => Err(f),
            None => Ok(()),
        }
    }
}

impl FlashHal for MemFlash {
    fn unlock(&mut self) -> Result<(), Fault> {
        if let Some(f) = self.fail_unlock.take() {
            return Err(f);
        }
        self.locked = false;
        self.unlocks += 1;
        Ok(())
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn program_halfword(&mut self, address: u32, value: u16) -> Result<(), Fault> {
        self.begin()?;

        if address % 2 != 0 {
            return Err(Fault::Error);
        }
        let offset = match self.offset(address) {
            Some(o) if o + 2 <= self.data.len() => o,
            _ => return Err(Fault::Error),
        };

        let current = &mut self.data[offset..offset + 2];
        if value != 0 && current.iter().any(|b| *b != ERASED) {
            return Err(Fault::Error);
        }
        current.copy_from_slice(&value.to_ne_bytes());

        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> Result<(), Fault> {
        self.begin()?;

        let page_size = self.map.page_size as usize;
        let offset = match self.offset(address) {
            Some(o) if o % page_size == 0 => o,
            _ => return Err(Fault::Error),
        };

        for b in &mut self.data[offset..offset + page_size] {
            *b = ERASED;
        }
        for (a, v) in &self.stuck {
            if *a >= address && *a < address + self.map.page_size {
                self.data[(*a - self.map.bank_start) as usize] = *v;
            }
        }

        Ok(())
    }

    fn read_byte(&self, address: u32) -> u8 {
        self.offset(address).map(|o| self.data[o]).unwrap_or(ERASED)
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }
}
