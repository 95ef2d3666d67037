//! Tuner firmware image.
//!
//! The firmware is not redistributable; it lives inside the Windows driver
//! (`ZTUB10.sys`) right after an eight byte signature and has to be cut out
//! of a user-supplied copy of that file.

use crate::error::{ProtocolError, Result};

/// Size of the firmware image in bytes.
pub const FIRMWARE_SIZE: usize = 56;

/// Bytes carried by one upload frame.
pub const FIRMWARE_CHUNK_SIZE: usize = 2;

/// Number of upload frames.
pub const FIRMWARE_CHUNKS: usize = FIRMWARE_SIZE / FIRMWARE_CHUNK_SIZE;

/// Marker that precedes the firmware inside the driver image.
pub const FIRMWARE_SIGNATURE: [u8; 8] = [0x44, 0x4e, 0x00, 0x00, 0x44, 0x4e, 0x00, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    image: [u8; FIRMWARE_SIZE],
}

impl Firmware {
    /// Wrap an already extracted image.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let image: [u8; FIRMWARE_SIZE] =
            raw.try_into()
                .map_err(|_| ProtocolError::InvalidFirmwareLength {
                    expected: FIRMWARE_SIZE,
                    actual: raw.len(),
                })?;
        Ok(Self { image })
    }

    /// Locate the firmware in a driver binary.
    ///
    /// Returns the image and the offset it was found at.
    pub fn extract_from_driver(driver: &[u8]) -> Result<(Self, usize)> {
        let magic = driver
            .windows(FIRMWARE_SIGNATURE.len())
            .position(|w| w == FIRMWARE_SIGNATURE)
            .ok_or(ProtocolError::FirmwareSignatureNotFound)?;
        let start = magic + FIRMWARE_SIGNATURE.len();
        let end = start + FIRMWARE_SIZE;
        let raw = driver
            .get(start..end)
            .ok_or(ProtocolError::InvalidFirmwareLength {
                expected: FIRMWARE_SIZE,
                actual: driver.len() - start,
            })?;
        Ok((Self::from_bytes(raw)?, start))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    /// Upload chunks in wire order.
    pub fn chunks(&self) -> impl Iterator<Item = [u8; FIRMWARE_CHUNK_SIZE]> + '_ {
        self.image
            .chunks_exact(FIRMWARE_CHUNK_SIZE)
            .map(|c| [c[0], c[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        (0..FIRMWARE_SIZE as u8).collect()
    }

    #[test]
    fn test_from_bytes_length() {
        assert!(Firmware::from_bytes(&sample_image()).is_ok());
        assert_eq!(
            Firmware::from_bytes(&[0u8; 55]).unwrap_err(),
            ProtocolError::InvalidFirmwareLength {
                expected: 56,
                actual: 55
            }
        );
    }

    #[test]
    fn test_chunks() {
        let fw = Firmware::from_bytes(&sample_image()).unwrap();
        let chunks: Vec<[u8; 2]> = fw.chunks().collect();
        assert_eq!(chunks.len(), 28);
        assert_eq!(chunks[0], [0, 1]);
        assert_eq!(chunks[27], [54, 55]);
    }

    #[test]
    fn test_extract_from_driver() {
        let mut driver = vec![0xffu8; 100];
        driver.extend_from_slice(&FIRMWARE_SIGNATURE);
        driver.extend_from_slice(&sample_image());
        driver.extend_from_slice(&[0xee; 32]);

        let (fw, offset) = Firmware::extract_from_driver(&driver).unwrap();
        assert_eq!(offset, 108);
        assert_eq!(fw.as_bytes(), &sample_image()[..]);
    }

    #[test]
    fn test_extract_missing_signature() {
        assert_eq!(
            Firmware::extract_from_driver(&[0u8; 256]).unwrap_err(),
            ProtocolError::FirmwareSignatureNotFound
        );
    }

    #[test]
    fn test_extract_truncated_image() {
        let mut driver = FIRMWARE_SIGNATURE.to_vec();
        driver.extend_from_slice(&[0u8; 10]);
        assert_eq!(
            Firmware::extract_from_driver(&driver).unwrap_err(),
            ProtocolError::InvalidFirmwareLength {
                expected: 56,
                actual: 10
            }
        );
    }
}
