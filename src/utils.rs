//! Small shared helpers: hex formatting for wire logging, and test-time
//! logger setup.

/// Formatting and display utilities.
pub mod format {
    /// Format a byte slice as a spaced hex string.
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as spaced 16-bit hex words.
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Logging utilities.
pub mod logging {
    /// Initialize a logger for test output; safe to call repeatedly.
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting() {
        let bytes = vec![0x01, 0x03, 0x10, 0xFF];
        assert_eq!(format::bytes_to_hex(&bytes), "01 03 10 FF");

        let registers = vec![0x1234, 0x5678];
        assert_eq!(format::registers_to_hex(&registers), "1234 5678");
    }
}
