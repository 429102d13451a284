//! The typed data cell: one heterogeneously-typed value under a
//! reader/writer lock, with an attached [`Attribute`] snapshot.
//!
//! Grounded on `original_source/src/DataItem.h` (not retrieved in full,
//! referenced from `DataSource.h`/`DataTarget.h`) and `PythonData.cpp`'s
//! scalar/vector type-checked access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::attribute::Attribute;
use crate::error::{EngineError, Result};
use crate::types::{DataType, DataValue, TypedData};

struct Inner {
    value: DataValue,
    attribute: Attribute,
}

/// A typed, lock-guarded storage slot owned by exactly one source.
///
/// `std::sync::RwLock` already provides the concurrent-readers /
/// exclusive-writer discipline `spec.md` \S4.1 asks for (I1); unlike the
/// original C++ implementation we don't need to hand-roll reference
/// counting around a single OS lock handle, so each target that reads
/// the cell acquires its own [`RwLockReadGuard`] directly (invariant I3
/// still holds: every guard observes the attribute as of the last
/// completed write, because the write lock is exclusive).
pub struct DataCell {
    inner: RwLock<Inner>,
    expired: AtomicBool,
}

impl Default for DataCell {
    fn default() -> Self {
        DataCell {
            inner: RwLock::new(Inner {
                value: DataValue::Undefined,
                attribute: Attribute::new(),
            }),
            expired: AtomicBool::new(false),
        }
    }
}

/// A held read lock on a [`DataCell`].
pub struct CellReadGuard<'a>(RwLockReadGuard<'a, Inner>);

impl CellReadGuard<'_> {
    /// Type-checked read of the cell's current value.
    pub fn get_data<T: TypedData>(&self) -> Result<T> {
        T::from_value(&self.0.value)
    }

    /// The cell's current value, untyped.
    pub fn value(&self) -> &DataValue {
        &self.0.value
    }

    /// The attribute snapshot associated with the currently stored
    /// value (I3).
    pub fn attribute(&self) -> &Attribute {
        &self.0.attribute
    }

    /// The runtime [`DataType`] currently stored.
    pub fn data_type(&self) -> DataType {
        self.0.value.data_type()
    }
}

/// A held write lock on a [`DataCell`].
pub struct CellWriteGuard<'a>(RwLockWriteGuard<'a, Inner>);

impl CellWriteGuard<'_> {
    /// Replaces the stored value in place (`set-new-data`), allowed
    /// only while the write lock is held, which this type statically
    /// guarantees (I1, I2).
    pub fn set_new_data(&mut self, value: DataValue) {
        self.0.value = value;
    }

    /// Sets the attribute to be published alongside the current value.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.0.attribute = attribute;
    }

    /// The attribute currently staged for this write.
    pub fn attribute(&self) -> &Attribute {
        &self.0.attribute
    }

    /// Type-checked read-back of the value being written, useful right
    /// before publish.
    pub fn get_data<T: TypedData>(&self) -> Result<T> {
        T::from_value(&self.0.value)
    }
}

impl DataCell {
    /// Creates an empty, `undefined`-typed cell.
    pub fn new() -> Self {
        DataCell::default()
    }

    /// Blocking read lock.
    pub fn read_lock(&self) -> CellReadGuard<'_> {
        CellReadGuard(self.inner.read().expect("data cell lock poisoned"))
    }

    /// Non-blocking read lock.
    pub fn try_read_lock(&self) -> Option<CellReadGuard<'_>> {
        self.inner.try_read().ok().map(CellReadGuard)
    }

    /// Blocking write lock.
    pub fn write_lock(&self) -> CellWriteGuard<'_> {
        CellWriteGuard(self.inner.write().expect("data cell lock poisoned"))
    }

    /// Non-blocking write lock.
    pub fn try_write_lock(&self) -> Option<CellWriteGuard<'_>> {
        self.inner.try_write().ok().map(CellWriteGuard)
    }

    /// Marks the cell's stored value as stale. Monotonic: once set,
    /// stays set until the next write replaces it (a fresh write
    /// implicitly un-expires the cell, see [`DataCell::write_lock`]
    /// callers in `module.rs`).
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Clears the expired bit; called by a source right before it
    /// stages a fresh write.
    pub fn un_expire(&self) {
        self.expired.store(false, Ordering::SeqCst);
    }

    /// Whether [`DataCell::expire`] has been called since the last
    /// [`DataCell::un_expire`].
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Type-checked snapshot read, acquiring and releasing the read
    /// lock internally.
    pub fn get_data<T: TypedData>(&self) -> Result<T> {
        self.read_lock().get_data::<T>()
    }

    /// The runtime type currently stored, without copying the value.
    pub fn data_type(&self) -> DataType {
        self.read_lock().data_type()
    }
}

/// Raised when an access expects a particular `T` but the cell holds
/// something else; kept distinct from [`EngineError`] construction
/// helpers so call sites read naturally.
pub fn type_mismatch(expected: DataType, found: DataType) -> EngineError {
    EngineError::TypeMismatch {
        expected: expected.short_name(),
        found: found.short_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cell_is_undefined_and_not_expired() {
        let cell = DataCell::new();
        assert_eq!(cell.data_type(), DataType::Undefined);
        assert!(!cell.is_expired());
    }

    #[test]
    fn write_then_read_round_trips_value_and_attribute() {
        let cell = DataCell::new();
        {
            let mut w = cell.write_lock();
            w.set_new_data(DataValue::I32(42));
            w.set_attribute(Attribute::new());
        }
        let r = cell.read_lock();
        assert_eq!(r.get_data::<i32>().unwrap(), 42);
    }

    #[test]
    fn get_data_wrong_type_is_type_mismatch() {
        let cell = DataCell::new();
        {
            let mut w = cell.write_lock();
            w.set_new_data(DataValue::I32(42));
        }
        assert!(cell.get_data::<String>().is_err());
    }

    #[test]
    fn expire_is_monotonic_until_un_expire() {
        let cell = DataCell::new();
        cell.expire();
        assert!(cell.is_expired());
        cell.un_expire();
        assert!(!cell.is_expired());
    }
}
