//! Generic register abstractions for type-safe MSR programming

/// A named bit span inside a 64-bit register
///
/// Field descriptors are built in `const` context, so an offset/width pair
/// that does not fit in 64 bits fails the build instead of silently
/// shifting into a neighbouring field.
///
/// # Example
///
/// ```
/// use pmuset_raw::BitField;
///
/// const UMASK: BitField = BitField::new("umask", 8, 8);
///
/// let reg = UMASK.insert(0xFFFF_0000_0000_00C0, 0x41);
/// assert_eq!(reg, 0xFFFF_0000_0000_41C0);
/// assert_eq!(UMASK.extract(reg), 0x41);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    /// Human-readable field name, as printed in the SDM tables
    pub name: &'static str,
    /// Position of the least significant bit
    pub offset: u32,
    /// Number of bits
    pub width: u32,
}

impl BitField {
    /// Define a field; panics at compile time when used in `const` context
    /// with a span that leaves the 64-bit word.
    pub const fn new(name: &'static str, offset: u32, width: u32) -> Self {
        assert!(width > 0, "bit field must be at least one bit wide");
        assert!(offset + width <= 64, "bit field exceeds 64-bit register");
        Self {
            name,
            offset,
            width,
        }
    }

    /// Single-bit field at `offset`
    pub const fn flag(name: &'static str, offset: u32) -> Self {
        Self::new(name, offset, 1)
    }

    /// Largest value the field can hold
    pub const fn max_value(&self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// In-place mask: `((1 << width) - 1) << offset`
    pub const fn mask(&self) -> u64 {
        self.max_value() << self.offset
    }

    /// Field value contained in `reg`
    pub const fn extract(&self, reg: u64) -> u64 {
        (reg & self.mask()) >> self.offset
    }

    /// Replace the field in `reg` with `value`, leaving every other bit alone.
    ///
    /// Bits of `value` above the field width are discarded.
    pub const fn insert(&self, reg: u64, value: u64) -> u64 {
        (reg & !self.mask()) | ((value << self.offset) & self.mask())
    }

    /// True if any bit of the field is set
    pub const fn is_set(&self, reg: u64) -> bool {
        reg & self.mask() != 0
    }

    /// Set every bit of the field
    pub const fn set(&self, reg: u64) -> u64 {
        reg | self.mask()
    }

    /// Clear every bit of the field
    pub const fn clear(&self, reg: u64) -> u64 {
        reg & !self.mask()
    }

    /// Set or clear every bit of the field
    pub const fn assign(&self, reg: u64, on: bool) -> u64 {
        if on {
            self.set(reg)
        } else {
            self.clear(reg)
        }
    }
}

/// Union of the masks of `fields`
pub const fn mask_of(fields: &[BitField]) -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < fields.len() {
        mask |= fields[i].mask();
        i += 1;
    }
    mask
}

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// Layouts are decoded views. Writers that must preserve bits the layout
/// does not model should go through [`BitField::insert`] on the raw value
/// rather than re-encoding a layout.
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}
