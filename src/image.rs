//! # Process Image
//!
//! The in-memory register store for a locally hosted slave device. The
//! responder serves remote masters out of this image; the local application
//! reads and writes it through the typed accessors, which go through the
//! value codec so multi-register points, swaps and bounds behave exactly as
//! they do on the master side.
//!
//! Each of the four register banks is guarded by its own `RwLock`, and
//! multi-register operations hold the bank lock for the whole run, so the
//! responder never observes a torn multi-register value. Write listeners
//! fire synchronously after the mutation, and only for registers whose
//! value actually changed — a no-op write is silent.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::SlaveId;
use crate::value::{DataType, Locator, RegisterRange, Value};

/// A change to a coil or holding register, delivered to write listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterWrite {
    pub range: RegisterRange,
    pub offset: u16,
    pub old: Value,
    pub new: Value,
}

/// Callback invoked for every effective coil or holding-register write.
pub type WriteListener = Box<dyn Fn(&RegisterWrite) + Send + Sync>;

/// Mutable register image for one slave identity.
pub struct ProcessImage {
    slave_id: SlaveId,
    coils: RwLock<HashMap<u16, bool>>,
    discrete_inputs: RwLock<HashMap<u16, bool>>,
    holding_registers: RwLock<HashMap<u16, u16>>,
    input_registers: RwLock<HashMap<u16, u16>>,
    exception_status: RwLock<u8>,
    listeners: Mutex<Vec<WriteListener>>,
}

impl ProcessImage {
    /// Create an empty image for the given slave identity. Unwritten coils
    /// read `false` and unwritten registers read zero.
    pub fn new(slave_id: SlaveId) -> Self {
        Self {
            slave_id,
            coils: RwLock::new(HashMap::new()),
            discrete_inputs: RwLock::new(HashMap::new()),
            holding_registers: RwLock::new(HashMap::new()),
            input_registers: RwLock::new(HashMap::new()),
            exception_status: RwLock::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The slave identity this image serves.
    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    /// Register a write listener for coil and holding-register changes.
    pub fn add_write_listener(&self, listener: WriteListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Drop all registered write listeners.
    pub fn clear_write_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    fn notify(&self, writes: &[RegisterWrite]) {
        if writes.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().unwrap();
        for write in writes {
            for listener in listeners.iter() {
                listener(write);
            }
        }
    }

    // --- coils -----------------------------------------------------------

    pub fn coil(&self, offset: u16) -> bool {
        self.coils
            .read()
            .unwrap()
            .get(&offset)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_coil(&self, offset: u16, value: bool) {
        self.write_coil_run(offset, &[value]);
    }

    pub fn read_coils(&self, offset: u16, count: u16) -> Vec<bool> {
        let coils = self.coils.read().unwrap();
        (0..count)
            .map(|i| {
                coils
                    .get(&offset.wrapping_add(i))
                    .copied()
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Write a run of coils, notifying listeners of effective changes only.
    pub fn write_coil_run(&self, offset: u16, values: &[bool]) {
        let mut writes = Vec::new();
        {
            let mut coils = self.coils.write().unwrap();
            for (i, &value) in values.iter().enumerate() {
                let address = offset.wrapping_add(i as u16);
                let old = coils.get(&address).copied().unwrap_or(false);
                if old != value {
                    coils.insert(address, value);
                    writes.push(RegisterWrite {
                        range: RegisterRange::CoilStatus,
                        offset: address,
                        old: Value::Bool(old),
                        new: Value::Bool(value),
                    });
                }
            }
        }
        self.notify(&writes);
    }

    // --- discrete inputs -------------------------------------------------

    pub fn input(&self, offset: u16) -> bool {
        self.discrete_inputs
            .read()
            .unwrap()
            .get(&offset)
            .copied()
            .unwrap_or(false)
    }

    /// Discrete inputs are read-only for remote masters; only the local
    /// application sets them, and no listener fires.
    pub fn set_input(&self, offset: u16, value: bool) {
        self.discrete_inputs.write().unwrap().insert(offset, value);
    }

    pub fn read_discrete_inputs(&self, offset: u16, count: u16) -> Vec<bool> {
        let inputs = self.discrete_inputs.read().unwrap();
        (0..count)
            .map(|i| {
                inputs
                    .get(&offset.wrapping_add(i))
                    .copied()
                    .unwrap_or(false)
            })
            .collect()
    }

    // --- word registers --------------------------------------------------

    pub fn read_holding_registers(&self, offset: u16, count: u16) -> Vec<u16> {
        let registers = self.holding_registers.read().unwrap();
        (0..count)
            .map(|i| {
                registers
                    .get(&offset.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn read_input_registers(&self, offset: u16, count: u16) -> Vec<u16> {
        let registers = self.input_registers.read().unwrap();
        (0..count)
            .map(|i| {
                registers
                    .get(&offset.wrapping_add(i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Write a run of holding registers, notifying effective changes only.
    pub fn write_holding_run(&self, offset: u16, values: &[u16]) {
        let mut writes = Vec::new();
        {
            let mut registers = self.holding_registers.write().unwrap();
            for (i, &value) in values.iter().enumerate() {
                let address = offset.wrapping_add(i as u16);
                let old = registers.get(&address).copied().unwrap_or(0);
                if old != value {
                    registers.insert(address, value);
                    writes.push(RegisterWrite {
                        range: RegisterRange::HoldingRegister,
                        offset: address,
                        old: Value::U16(old),
                        new: Value::U16(value),
                    });
                }
            }
        }
        self.notify(&writes);
    }

    pub fn set_holding_register(&self, offset: u16, value: u16) {
        self.write_holding_run(offset, &[value]);
    }

    /// Input registers are read-only for remote masters; no listener fires.
    pub fn set_input_register(&self, offset: u16, value: u16) {
        self.input_registers.write().unwrap().insert(offset, value);
    }

    fn write_word_run(&self, range: RegisterRange, offset: u16, words: &[u16]) -> ModbusResult<()> {
        match range {
            RegisterRange::HoldingRegister => {
                self.write_holding_run(offset, words);
                Ok(())
            }
            RegisterRange::InputRegister => {
                let mut registers = self.input_registers.write().unwrap();
                for (i, &word) in words.iter().enumerate() {
                    registers.insert(offset.wrapping_add(i as u16), word);
                }
                Ok(())
            }
            _ => Err(ModbusError::invalid_data(format!(
                "{} is not a word range",
                range
            ))),
        }
    }

    fn read_word_run(&self, range: RegisterRange, offset: u16, count: u16) -> ModbusResult<Vec<u16>> {
        match range {
            RegisterRange::HoldingRegister => Ok(self.read_holding_registers(offset, count)),
            RegisterRange::InputRegister => Ok(self.read_input_registers(offset, count)),
            _ => Err(ModbusError::invalid_data(format!(
                "{} is not a word range",
                range
            ))),
        }
    }

    // --- typed access ----------------------------------------------------

    /// Read a typed point through the value codec.
    pub fn numeric(&self, range: RegisterRange, offset: u16, data_type: DataType) -> ModbusResult<Value> {
        if range.is_bit_range() {
            if data_type != DataType::Binary {
                return Err(ModbusError::invalid_data(format!(
                    "{} holds bits, not {:?}",
                    range, data_type
                )));
            }
            let value = match range {
                RegisterRange::CoilStatus => self.coil(offset),
                _ => self.input(offset),
            };
            return Ok(Value::Bool(value));
        }

        let locator = Locator::new(range, offset, data_type)?;
        let words = self.read_word_run(range, offset, locator.register_count)?;
        locator.decode(&words)
    }

    /// Write a typed point through the value codec. Out-of-bound values are
    /// rejected before the image changes at all.
    pub fn set_numeric(
        &self,
        range: RegisterRange,
        offset: u16,
        data_type: DataType,
        value: &Value,
    ) -> ModbusResult<()> {
        if range.is_bit_range() {
            if data_type != DataType::Binary {
                return Err(ModbusError::invalid_data(format!(
                    "{} holds bits, not {:?}",
                    range, data_type
                )));
            }
            let bit = match value {
                Value::Bool(b) => *b,
                _ => return Err(ModbusError::invalid_data("bit point expects a boolean")),
            };
            match range {
                RegisterRange::CoilStatus => self.set_coil(offset, bit),
                _ => self.set_input(offset, bit),
            }
            return Ok(());
        }

        let locator = Locator::new(range, offset, data_type)?;
        let words = locator.encode(value)?;
        self.write_word_run(range, offset, &words)
    }

    /// Read a string point occupying `register_count` registers.
    pub fn string(
        &self,
        range: RegisterRange,
        offset: u16,
        data_type: DataType,
        register_count: u16,
    ) -> ModbusResult<Value> {
        let locator = Locator::with_register_count(range, offset, data_type, register_count)?;
        let words = self.read_word_run(range, offset, register_count)?;
        locator.decode(&words)
    }

    /// Write a string point occupying `register_count` registers.
    pub fn set_string(
        &self,
        range: RegisterRange,
        offset: u16,
        data_type: DataType,
        register_count: u16,
        value: &Value,
    ) -> ModbusResult<()> {
        let locator = Locator::with_register_count(range, offset, data_type, register_count)?;
        let words = locator.encode(value)?;
        self.write_word_run(range, offset, &words)
    }

    // --- exception status ------------------------------------------------

    /// The status byte served by Read Exception Status (0x07).
    pub fn exception_status(&self) -> u8 {
        *self.exception_status.read().unwrap()
    }

    pub fn set_exception_status(&self, status: u8) {
        *self.exception_status.write().unwrap() = status;
    }
}

impl std::fmt::Debug for ProcessImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessImage")
            .field("slave_id", &self.slave_id)
            .field("coils", &self.coils.read().unwrap().len())
            .field("holding_registers", &self.holding_registers.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_coil_and_register_defaults() {
        let image = ProcessImage::new(1);
        assert!(!image.coil(10));
        assert_eq!(image.read_holding_registers(5, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_listener_fires_once_with_old_and_new() {
        let image = ProcessImage::new(1);
        let calls: Arc<Mutex<Vec<RegisterWrite>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        image.add_write_listener(Box::new(move |write| {
            sink.lock().unwrap().push(write.clone());
        }));

        image.set_coil(4, true);
        let recorded = calls.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].range, RegisterRange::CoilStatus);
        assert_eq!(recorded[0].offset, 4);
        assert_eq!(recorded[0].old, Value::Bool(false));
        assert_eq!(recorded[0].new, Value::Bool(true));
    }

    #[test]
    fn test_noop_write_is_suppressed() {
        let image = ProcessImage::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        image.add_write_listener(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        image.set_coil(7, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Same value again: no notification
        image.set_coil(7, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        image.set_coil(7, false);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Holding registers behave the same way
        image.set_holding_register(0, 42);
        image.set_holding_register(0, 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_multi_register_write_notifies_changed_only() {
        let image = ProcessImage::new(1);
        image.write_holding_run(0, &[1, 2, 3]);

        let calls: Arc<Mutex<Vec<u16>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        image.add_write_listener(Box::new(move |write| {
            sink.lock().unwrap().push(write.offset);
        }));

        // Only the middle register changes
        image.write_holding_run(0, &[1, 9, 3]);
        assert_eq!(calls.lock().unwrap().clone(), vec![1]);
    }

    #[test]
    fn test_typed_numeric_round_trip() {
        let image = ProcessImage::new(1);
        image
            .set_numeric(
                RegisterRange::HoldingRegister,
                10,
                DataType::Uint32Swapped,
                &Value::U32(0x8000_0001),
            )
            .unwrap();
        assert_eq!(image.read_holding_registers(10, 2), vec![0x0001, 0x8000]);
        assert_eq!(
            image
                .numeric(RegisterRange::HoldingRegister, 10, DataType::Uint32Swapped)
                .unwrap(),
            Value::U32(0x8000_0001)
        );

        // Input registers are locally writable too
        image
            .set_numeric(
                RegisterRange::InputRegister,
                0,
                DataType::Float32,
                &Value::F32(21.5),
            )
            .unwrap();
        assert_eq!(
            image
                .numeric(RegisterRange::InputRegister, 0, DataType::Float32)
                .unwrap(),
            Value::F32(21.5)
        );
    }

    #[test]
    fn test_out_of_bound_write_leaves_image_untouched() {
        let image = ProcessImage::new(1);
        let result = image.set_numeric(
            RegisterRange::HoldingRegister,
            0,
            DataType::Bcd16,
            &Value::U32(123_456),
        );
        assert!(result.is_err());
        assert_eq!(image.read_holding_registers(0, 1), vec![0]);
    }

    #[test]
    fn test_string_round_trip() {
        let image = ProcessImage::new(1);
        image
            .set_string(
                RegisterRange::HoldingRegister,
                100,
                DataType::Varchar,
                4,
                &Value::Str("valve7".into()),
            )
            .unwrap();
        assert_eq!(
            image
                .string(RegisterRange::HoldingRegister, 100, DataType::Varchar, 4)
                .unwrap(),
            Value::Str("valve7".into())
        );
    }

    #[test]
    fn test_exception_status() {
        let image = ProcessImage::new(1);
        assert_eq!(image.exception_status(), 0);
        image.set_exception_status(0x6D);
        assert_eq!(image.exception_status(), 0x6D);
    }

    #[test]
    fn test_bit_range_typed_access() {
        let image = ProcessImage::new(1);
        image
            .set_numeric(
                RegisterRange::CoilStatus,
                3,
                DataType::Binary,
                &Value::Bool(true),
            )
            .unwrap();
        assert!(image.coil(3));
        assert!(image
            .set_numeric(
                RegisterRange::CoilStatus,
                3,
                DataType::Uint16,
                &Value::U16(1)
            )
            .is_err());
    }
}
