//! Checksum algorithms used by the receiver protocols
//!
//! Supports: UBX 8-bit Fletcher, CRC-24Q (RTCM 3), NMEA XOR

/// Checksum algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    /// UBX two-byte running sum (CK_A, CK_B)
    UbxFletcher,
    /// Qualcomm CRC-24Q (polynomial 0x864CFB, init 0)
    Crc24q,
    /// XOR of all bytes between `$` and `*`
    NmeaXor,
}

impl ChecksumType {
    /// Get all available checksum types
    pub fn all() -> &'static [ChecksumType] {
        &[
            ChecksumType::UbxFletcher,
            ChecksumType::Crc24q,
            ChecksumType::NmeaXor,
        ]
    }

    /// Get name of checksum type
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumType::UbxFletcher => "UBX Fletcher-8",
            ChecksumType::Crc24q => "CRC-24Q",
            ChecksumType::NmeaXor => "NMEA XOR",
        }
    }

    /// Get output size in bytes as it appears on the wire
    pub fn size(&self) -> usize {
        match self {
            ChecksumType::NmeaXor => 1,
            ChecksumType::UbxFletcher => 2,
            ChecksumType::Crc24q => 3,
        }
    }
}

/// Calculate checksum for data, in wire byte order
pub fn calculate(data: &[u8], algorithm: ChecksumType) -> Vec<u8> {
    match algorithm {
        ChecksumType::UbxFletcher => ubx_checksum(data).to_vec(),
        ChecksumType::Crc24q => crc24q(data).to_be_bytes()[1..].to_vec(),
        ChecksumType::NmeaXor => vec![nmea_checksum(data)],
    }
}

/// Verify checksum
pub fn verify(data: &[u8], checksum: &[u8], algorithm: ChecksumType) -> bool {
    calculate(data, algorithm) == checksum
}

// ============ Individual checksum implementations ============

/// UBX checksum over class, id, length and payload (sync bytes excluded)
pub fn ubx_checksum(data: &[u8]) -> [u8; 2] {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;

    for &byte in data {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }

    [ck_a, ck_b]
}

const CRC24Q_POLY: u32 = 0x0186_4CFB;

const CRC24Q_TABLE: [u32; 256] = build_crc24q_table();

const fn build_crc24q_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24Q_POLY;
            }
            bit += 1;
        }
        table[i] = crc & 0x00FF_FFFF;
        i += 1;
    }
    table
}

/// CRC-24Q
/// Polynomial: 0x864CFB, Init: 0x000000, RefIn: false, RefOut: false
///
/// Running it over a whole RTCM 3 frame including its trailing CRC yields 0.
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &byte in data {
        let index = (((crc >> 16) ^ byte as u32) & 0xFF) as usize;
        crc = ((crc << 8) ^ CRC24Q_TABLE[index]) & 0x00FF_FFFF;
    }

    crc
}

/// NMEA checksum - XOR of all bytes
pub fn nmea_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ubx_checksum() {
        // CFG-PRT poll for USB
        let data = [0x06, 0x00, 0x01, 0x00, 0x03];
        assert_eq!(ubx_checksum(&data), [0x0A, 0x24]);
    }

    #[test]
    fn test_crc24q() {
        // Test vector: "123456789" should give 0xCDE703
        assert_eq!(crc24q(b"123456789"), 0xCDE703);
    }

    #[test]
    fn test_crc24q_residue_is_zero() {
        let mut frame = vec![0xD3, 0x00, 0x02, 0x3E, 0xD0];
        let crc = crc24q(&frame);
        frame.extend_from_slice(&crc.to_be_bytes()[1..]);
        assert_eq!(crc24q(&frame), 0);
    }

    #[test]
    fn test_nmea_checksum() {
        let body = b"GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(nmea_checksum(body), 0x47);
    }

    #[test]
    fn test_verify_and_sizes() {
        for ty in ChecksumType::all() {
            let sum = calculate(b"abc", *ty);
            assert_eq!(sum.len(), ty.size());
            assert!(verify(b"abc", &sum, *ty));
        }
    }
}
