//! Hardware frame object

use canif_core::{CanId, FrameKind};

/// CAN-FD-compatible data length
///
/// The data length code (DLC) of CAN-FD frames supports limited data length
/// options. Classic frames support any length up to 8 bytes, which is a subset
/// of the CAN-FD options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataLength(u8);

impl DataLength {
    pub const MAX: usize = 64;

    pub const fn new(value: usize) -> Option<Self> {
        let floor = Self::new_floor(value);
        if floor.as_usize() == value {
            Some(floor)
        } else {
            None
        }
    }

    pub const fn new_floor(value: usize) -> Self {
        let floor = match value {
            0..8 => value,
            8..24 => value / 4 * 4,
            24..32 => value / 8 * 8,
            32..64 => value / 16 * 16,
            64.. => 64,
        };
        Self(floor as u8)
    }

    pub const fn new_ceil(value: usize) -> Option<Self> {
        if value <= Self::MAX {
            let ceil = match value {
                0..8 => value,
                8..24 => value.div_ceil(4) * 4,
                24..32 => value.div_ceil(8) * 8,
                32.. => value.div_ceil(16) * 16,
            };
            Some(Self(ceil as u8))
        } else {
            None
        }
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<DataLength> for usize {
    fn from(value: DataLength) -> Self {
        value.as_usize()
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// CAN-FD frame compatible data vector
///
/// The stored length is always a valid CAN data length. Frames above the
/// classic maximum only exist for the FD frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: DataLength,
    bytes: [u8; 64],
}

impl Data {
    /// Creates a new vector from a slice of compatible length.
    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        let length = DataLength::new(data.len()).ok_or(InvalidLength)?;
        let mut bytes = [0; 64];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self { length, bytes })
    }

    /// Creates a new vector from a slice of arbitrary length, padding with
    /// zeros up to the next valid length of the frame format.
    ///
    /// Fails when the slice exceeds the format's maximum payload.
    pub fn new_padded(data: &[u8], kind: FrameKind) -> Result<Self, InvalidLength> {
        if data.len() > kind.max_data_len() {
            return Err(InvalidLength);
        }
        let length = DataLength::new_ceil(data.len()).ok_or(InvalidLength)?;
        let mut bytes = [0; 64];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self { length, bytes })
    }

    pub fn new_zeros(length: DataLength) -> Self {
        Self {
            length,
            bytes: [0; 64],
        }
    }

    pub const fn empty() -> Self {
        Self {
            length: DataLength(0),
            bytes: [0; 64],
        }
    }

    pub fn length(&self) -> DataLength {
        self.length
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..usize::from(self.length)]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = usize::from(self.length);
        &mut self.bytes[..length]
    }
}

/// Frame handed to the driver for transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub can_id: CanId,
    pub kind: FrameKind,
    pub data: Data,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CAN_LENGTH: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

    fn ceil_length_ref(value: usize) -> Option<usize> {
        match VALID_CAN_LENGTH.binary_search(&value) {
            Ok(pos) => Some(VALID_CAN_LENGTH[pos]),
            Err(pos) => {
                if pos < VALID_CAN_LENGTH.len() {
                    Some(VALID_CAN_LENGTH[pos])
                } else {
                    None
                }
            }
        }
    }

    fn floor_length_ref(value: usize) -> usize {
        match VALID_CAN_LENGTH.binary_search(&value) {
            Ok(pos) => VALID_CAN_LENGTH[pos],
            Err(pos) => VALID_CAN_LENGTH[pos - 1],
        }
    }

    #[test]
    fn test_frame_length() {
        for len in 0usize..100 {
            assert_eq!(
                usize::from(DataLength::new_floor(len)),
                floor_length_ref(len)
            );
            assert_eq!(
                DataLength::new_ceil(len).map(|len| usize::from(len)),
                ceil_length_ref(len)
            );
        }
    }

    #[test]
    fn test_padded_data() {
        let data = Data::new_padded(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], FrameKind::Fd).unwrap();
        assert_eq!(data.length().as_usize(), 12);
        assert_eq!(&data[..], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0, 0]);

        assert!(Data::new_padded(&[0; 9], FrameKind::Classic).is_err());
        assert!(Data::new_padded(&[0; 65], FrameKind::Fd).is_err());

        let data = Data::new_padded(&[0xaa; 7], FrameKind::Classic).unwrap();
        assert_eq!(data.length().as_usize(), 7);
    }
}
