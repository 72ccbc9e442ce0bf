//! Register tables shared by every connection.
//!
//! Addresses are zero-based everywhere inside the crate. External register
//! numbers (40001 for the first holding register, 30001 for the first input
//! register) only appear at the edges, see [`register_number`] and
//! [`address_of`].

use std::{
    fmt,
    ops::Range,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::frame::{Address, Quantity, Word};

pub mod generator;
pub use self::generator::{Generator, GeneratorError, Pattern};

/// External number of holding register address 0.
pub const HOLDING_REGISTER_BASE: u32 = 40001;

/// External number of input register address 0.
pub const INPUT_REGISTER_BASE: u32 = 30001;

/// Largest table the 16-bit address space can reach.
pub const MAX_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// 保持寄存器，可读写
    Holding,
    /// 输入寄存器，客户端只读
    Input,
}

impl Table {
    const fn base(self) -> u32 {
        match self {
            Table::Holding => HOLDING_REGISTER_BASE,
            Table::Input => INPUT_REGISTER_BASE,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Holding => f.write_str("holding"),
            Table::Input => f.write_str("input"),
        }
    }
}

/// Converts a zero-based address into its external register number.
#[must_use]
pub const fn register_number(table: Table, address: Address) -> u32 {
    table.base() + address as u32
}

/// Converts an external register number back into a zero-based address.
#[must_use]
pub fn address_of(table: Table, number: u32) -> Option<Address> {
    number
        .checked_sub(table.base())
        .and_then(|offset| Address::try_from(offset).ok())
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Range {address}+{quantity} is outside the {table} table (capacity {capacity})")]
    OutOfRange {
        table: Table,
        address: usize,
        quantity: usize,
        capacity: usize,
    },
    #[error("Generator for {table} register at address {address} failed: {source}")]
    Generator {
        table: Table,
        address: Address,
        #[source]
        source: GeneratorError,
    },
    #[error("Table capacity must be between 1 and 65536, got {0}")]
    InvalidCapacity(usize),
}

/// Where a register gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Static(Word),
    Dynamic(Generator),
}

#[derive(Debug)]
struct RegisterBank {
    table: Table,
    cells: Vec<ValueSource>,
}

impl RegisterBank {
    fn new(table: Table, capacity: usize) -> Result<Self, StoreError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(StoreError::InvalidCapacity(capacity));
        }
        Ok(Self {
            table,
            cells: vec![ValueSource::Static(0); capacity],
        })
    }

    /// Validates `address..address+quantity`; a zero quantity is a range
    /// violation as well.
    fn range(&self, address: usize, quantity: usize) -> Result<Range<usize>, StoreError> {
        let capacity = self.cells.len();
        match address.checked_add(quantity) {
            Some(end) if quantity > 0 && end <= capacity => Ok(address..end),
            _ => Err(StoreError::OutOfRange {
                table: self.table,
                address,
                quantity,
                capacity,
            }),
        }
    }

    fn read(&mut self, range: Range<usize>, elapsed: Duration) -> Result<Vec<Word>, StoreError> {
        let table = self.table;
        let mut values = Vec::with_capacity(range.len());
        for address in range {
            let value = match &mut self.cells[address] {
                ValueSource::Static(word) => *word,
                ValueSource::Dynamic(gen) => {
                    gen.sample(elapsed).map_err(|source| StoreError::Generator {
                        table,
                        address: address as Address,
                        source,
                    })?
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    fn peek(&self, range: Range<usize>, elapsed: Duration) -> Result<Vec<Word>, StoreError> {
        let table = self.table;
        range
            .map(|address| match &self.cells[address] {
                ValueSource::Static(word) => Ok(*word),
                ValueSource::Dynamic(gen) => {
                    gen.peek(elapsed).map_err(|source| StoreError::Generator {
                        table,
                        address: address as Address,
                        source,
                    })
                }
            })
            .collect()
    }
}

#[derive(Debug)]
struct Tables {
    holding: RegisterBank,
    input: RegisterBank,
}

impl Tables {
    fn bank(&mut self, table: Table) -> &mut RegisterBank {
        match table {
            Table::Holding => &mut self.holding,
            Table::Input => &mut self.input,
        }
    }
}

/// The register space of the simulated device.
///
/// All access goes through one mutex: tables are small and generator state
/// must not be observed half-updated.
#[derive(Debug)]
pub struct RegisterStore {
    tables: Mutex<Tables>,
    start: Instant,
}

impl RegisterStore {
    pub fn new(holding_capacity: usize, input_capacity: usize) -> Result<Self, StoreError> {
        Ok(Self {
            tables: Mutex::new(Tables {
                holding: RegisterBank::new(Table::Holding, holding_capacity)?,
                input: RegisterBank::new(Table::Input, input_capacity)?,
            }),
            start: Instant::now(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // 寄存器状态在任何时刻都是完整的，锁中毒时直接继续使用
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the store was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[must_use]
    pub fn capacity(&self, table: Table) -> usize {
        self.lock().bank(table).cells.len()
    }

    /// Reads `quantity` registers starting at `address`, evaluating dynamic
    /// bindings at the current elapsed time.
    pub fn read(
        &self,
        table: Table,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, StoreError> {
        self.read_at(table, address, quantity, self.elapsed())
    }

    /// Like [`Self::read`] but at an explicit point in time.
    pub fn read_at(
        &self,
        table: Table,
        address: Address,
        quantity: Quantity,
        elapsed: Duration,
    ) -> Result<Vec<Word>, StoreError> {
        let mut tables = self.lock();
        let bank = tables.bank(table);
        let range = bank.range(usize::from(address), usize::from(quantity))?;
        bank.read(range, elapsed)
    }

    /// Reads without advancing random walk generators, for diagnostics that
    /// must not change what clients observe.
    pub fn peek(
        &self,
        table: Table,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, StoreError> {
        let elapsed = self.elapsed();
        let mut tables = self.lock();
        let bank = tables.bank(table);
        let range = bank.range(usize::from(address), usize::from(quantity))?;
        bank.peek(range, elapsed)
    }

    /// Overwrites registers with static values. Dynamic bindings in the
    /// range are replaced.
    pub fn write(&self, table: Table, address: Address, values: &[Word]) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let bank = tables.bank(table);
        let range = bank.range(usize::from(address), values.len())?;
        for (cell, &value) in bank.cells[range].iter_mut().zip(values) {
            *cell = ValueSource::Static(value);
        }
        Ok(())
    }

    pub fn set_static(&self, table: Table, address: Address, value: Word) -> Result<(), StoreError> {
        self.write(table, address, &[value])
    }

    /// Binds every address in `address..address+count` to its own instance
    /// of `pattern`.
    pub fn bind_dynamic(
        &self,
        table: Table,
        address: Address,
        count: usize,
        pattern: Pattern,
    ) -> Result<(), StoreError> {
        let gen = Generator::new(pattern).map_err(|source| StoreError::Generator {
            table,
            address,
            source,
        })?;
        let mut tables = self.lock();
        let bank = tables.bank(table);
        let range = bank.range(usize::from(address), count)?;
        for cell in &mut bank.cells[range] {
            *cell = ValueSource::Dynamic(gen.clone());
        }
        Ok(())
    }

    /// The value source currently bound to `address`.
    #[must_use]
    pub fn source(&self, table: Table, address: Address) -> Option<ValueSource> {
        self.lock()
            .bank(table)
            .cells
            .get(usize::from(address))
            .cloned()
    }
}
