//! Elf64 support.

use std::{fmt, io, num::NonZeroU64};

use nom::Err::Error;

use crate::{combinators::*, Input, Number, Read, Result, Write};

mod data;
mod file;
mod relocation;
mod section;
mod symbol;

pub use data::*;
pub use file::*;
pub use relocation::*;
pub use section::*;
pub use symbol::*;

/// An address within the file.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Address(pub u64);

impl Read<u64> for Address {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, address) = N::read_u64(input)?;

        Ok((input, Address(address)))
    }
}

impl Read<u32> for Address {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, address) = N::read_u32(input)?;

        Ok((input, Address(address.into())))
    }
}

impl Read<u64> for Option<Address> {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, address) = <Address as Read<u64>>::read::<N, E>(input)?;

        Ok((input, if address.0 == 0 { None } else { Some(address) }))
    }
}

impl Write<u64> for Address {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u64(self.0))
    }
}

impl Write<u32> for Address {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let address = self.0.try_into().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "address does not fit in `u32`")
        })?;

        buffer.write_all(&N::write_u32(address))
    }
}

impl Write<u64> for Option<Address> {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        match self {
            Some(address) => <Address as Write<u64>>::write::<N, _>(address, buffer),
            None => buffer.write_all(&N::write_u64(0)),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "0x{:08x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, formatter)
    }
}

impl From<Address> for usize {
    fn from(value: Address) -> Self {
        // Addresses within a relocatable object are file offsets; they fit.
        value.0 as usize
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value.into())
    }
}

/// An alignment value.
///
/// It's guaranteed to be a power of two, encoded in a `u64`. `None` stands
/// for the on-disk 0, i.e. no alignment constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Alignment(pub Option<NonZeroU64>);

impl Alignment {
    /// The raw on-disk value.
    pub fn value(&self) -> u64 {
        self.0.map_or(0, NonZeroU64::get)
    }
}

impl Read for Alignment {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (next_input, alignment) = N::read_u64(input)?;

        let alignment = match NonZeroU64::new(alignment) {
            Some(alignment) if !alignment.is_power_of_two() => {
                return Err(Error(E::from_error_kind(input, ErrorKind::Digit)))
            }
            alignment => alignment,
        };

        Ok((next_input, Self(alignment)))
    }
}

impl Write for Alignment {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u64(self.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        // From u64.
        assert_read_write!(
            Address: Read<u64> + Write<u64> {
                bytes_value(auto_endian) = 42u64,
                rust_value = Address(42),
            }
        );

        // From u32.
        assert_read_write!(
            Address: Read<u32> + Write<u32> {
                bytes_value(auto_endian) = 42u32,
                rust_value = Address(42),
            }
        );

        // As option: Some.
        assert_read_write!(
            Option<Address>: Read<u64> + Write<u64> {
                bytes_value(auto_endian) = 42u64,
                rust_value = Some(Address(42)),
            }
        );

        // As option: None.
        assert_read_write!(
            Option<Address>: Read<u64> + Write<u64> {
                bytes_value(auto_endian) = 0u64,
                rust_value = None,
            }
        );
    }

    #[test]
    fn test_alignment() {
        // No alignment.
        assert_read_write!(
            Alignment: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0u64,
                rust_value = Alignment(None),
            }
        );

        // Some value alignment.
        assert_read_write!(
            Alignment: Read<()> + Write<()> {
                bytes_value(auto_endian) = 512u64,
                rust_value = Alignment(NonZeroU64::new(512)),
            }
        );

        // Some invalid (because not a power of two) alignment.
        assert_eq!(
            Alignment::read::<crate::BigEndian, ()>(&513u64.to_be_bytes()),
            Err(nom::Err::Error(())),
        );
    }
}
