//! The closed set of data types that can flow through a cell, and the
//! tagged value holder built on top of it.
//!
//! Mirrors `PythonData.cpp` / `DataItem`'s type tags: a scalar/vector
//! container flag orthogonal to the element kind, plus `undefined`.

use crate::error::EngineError;
use std::fmt;

/// An opaque 2-D numeric buffer, the "matrix" element kind. The engine
/// does not interpret its contents; it only moves it around.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    /// Row count.
    pub rows: usize,
    /// Column count.
    pub cols: usize,
    /// Row-major sample storage.
    pub data: Vec<f64>,
}

impl Matrix {
    /// Builds a matrix, panicking if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "matrix data length mismatch");
        Matrix { rows, cols, data }
    }
}

/// Element kind, independent of scalar/vector container shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// UTF-8 string.
    String,
    /// Opaque 2-D numeric buffer.
    Matrix,
}

/// The runtime type recorded on a data cell: an element kind, whether it
/// is wrapped in a vector, or the special `undefined` state of a cell
/// that has never been written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// No value has ever been written to the cell.
    Undefined,
    /// A single scalar of the given element kind.
    Scalar(ElemType),
    /// A `Vec` of the given element kind.
    Vector(ElemType),
}

impl DataType {
    /// Canonical, reversible short name used on the wire between
    /// components (`spec.md` \S6), e.g. `"int32"`, `"int32Vect"`.
    pub fn short_name(&self) -> String {
        match self {
            DataType::Undefined => "undefined".to_string(),
            DataType::Scalar(e) => elem_short_name(*e).to_string(),
            DataType::Vector(e) => format!("{}Vect", elem_short_name(*e)),
        }
    }

    /// Inverse of [`DataType::short_name`].
    pub fn from_short_name(name: &str) -> Option<DataType> {
        if name == "undefined" {
            return Some(DataType::Undefined);
        }
        if let Some(stem) = name.strip_suffix("Vect") {
            return elem_from_short_name(stem).map(DataType::Vector);
        }
        elem_from_short_name(name).map(DataType::Scalar)
    }
}

fn elem_short_name(e: ElemType) -> &'static str {
    match e {
        ElemType::I32 => "int32",
        ElemType::U32 => "uint32",
        ElemType::I64 => "int64",
        ElemType::U64 => "uint64",
        ElemType::F32 => "float",
        ElemType::F64 => "double",
        ElemType::String => "string",
        ElemType::Matrix => "matrix",
    }
}

fn elem_from_short_name(name: &str) -> Option<ElemType> {
    Some(match name {
        "int32" => ElemType::I32,
        "uint32" => ElemType::U32,
        "int64" => ElemType::I64,
        "uint64" => ElemType::U64,
        "float" => ElemType::F32,
        "double" => ElemType::F64,
        "string" => ElemType::String,
        "matrix" => ElemType::Matrix,
        _ => return None,
    })
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// The tagged value a [`crate::cell::DataCell`] stores.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    /// The never-written state.
    Undefined,
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Mat(Matrix),
    VecI32(Vec<i32>),
    VecU32(Vec<u32>),
    VecI64(Vec<i64>),
    VecU64(Vec<u64>),
    VecF32(Vec<f32>),
    VecF64(Vec<f64>),
    VecStr(Vec<String>),
    VecMat(Vec<Matrix>),
}

impl DataValue {
    /// The [`DataType`] this value carries.
    pub fn data_type(&self) -> DataType {
        use DataValue::*;
        match self {
            Undefined => DataType::Undefined,
            I32(_) => DataType::Scalar(ElemType::I32),
            U32(_) => DataType::Scalar(ElemType::U32),
            I64(_) => DataType::Scalar(ElemType::I64),
            U64(_) => DataType::Scalar(ElemType::U64),
            F32(_) => DataType::Scalar(ElemType::F32),
            F64(_) => DataType::Scalar(ElemType::F64),
            Str(_) => DataType::Scalar(ElemType::String),
            Mat(_) => DataType::Scalar(ElemType::Matrix),
            VecI32(_) => DataType::Vector(ElemType::I32),
            VecU32(_) => DataType::Vector(ElemType::U32),
            VecI64(_) => DataType::Vector(ElemType::I64),
            VecU64(_) => DataType::Vector(ElemType::U64),
            VecF32(_) => DataType::Vector(ElemType::F32),
            VecF64(_) => DataType::Vector(ElemType::F64),
            VecStr(_) => DataType::Vector(ElemType::String),
            VecMat(_) => DataType::Vector(ElemType::Matrix),
        }
    }

    /// Renders the value as a display string, as a `DataLogger` would
    /// before handing it to a sink.
    pub fn to_log_string(&self) -> String {
        use DataValue::*;
        match self {
            Undefined => "undefined".to_string(),
            I32(v) => v.to_string(),
            U32(v) => v.to_string(),
            I64(v) => v.to_string(),
            U64(v) => v.to_string(),
            F32(v) => v.to_string(),
            F64(v) => v.to_string(),
            Str(v) => v.clone(),
            Mat(m) => format!("matrix[{}x{}]", m.rows, m.cols),
            VecI32(v) => format!("{v:?}"),
            VecU32(v) => format!("{v:?}"),
            VecI64(v) => format!("{v:?}"),
            VecU64(v) => format!("{v:?}"),
            VecF32(v) => format!("{v:?}"),
            VecF64(v) => format!("{v:?}"),
            VecStr(v) => format!("{v:?}"),
            VecMat(v) => format!("matrix_vec[{}]", v.len()),
        }
    }
}

/// Trait implemented for every Rust type that can be round-tripped
/// through a [`DataValue`]. `get-data<T>()` in `spec.md` \S4.1 is
/// `DataCell::get_data::<T>()`, type-checked through this trait.
pub trait TypedData: Sized + Clone {
    /// The [`DataType`] this Rust type corresponds to.
    const DATA_TYPE: fn() -> DataType;

    /// Extracts a reference of `Self` out of a [`DataValue`], failing
    /// with [`EngineError::TypeMismatch`] on any other variant.
    fn from_value(value: &DataValue) -> crate::error::Result<Self>;

    /// Wraps `self` into the matching [`DataValue`] variant.
    fn into_value(self) -> DataValue;
}

macro_rules! typed_data_scalar {
    ($rust:ty, $variant:ident, $elem:ident) => {
        impl TypedData for $rust {
            const DATA_TYPE: fn() -> DataType =
                || DataType::Scalar(ElemType::$elem);

            fn from_value(value: &DataValue) -> crate::error::Result<Self> {
                match value {
                    DataValue::$variant(v) => Ok(v.clone()),
                    other => Err(crate::cell::type_mismatch(DataType::Scalar(ElemType::$elem), other.data_type())),
                }
            }

            fn into_value(self) -> DataValue {
                DataValue::$variant(self)
            }
        }
    };
}

typed_data_scalar!(i32, I32, I32);
typed_data_scalar!(u32, U32, U32);
typed_data_scalar!(i64, I64, I64);
typed_data_scalar!(u64, U64, U64);
typed_data_scalar!(f32, F32, F32);
typed_data_scalar!(f64, F64, F64);
typed_data_scalar!(String, Str, String);
typed_data_scalar!(Matrix, Mat, Matrix);

macro_rules! typed_data_vector {
    ($rust:ty, $variant:ident, $elem:ident) => {
        impl TypedData for Vec<$rust> {
            const DATA_TYPE: fn() -> DataType =
                || DataType::Vector(ElemType::$elem);

            fn from_value(value: &DataValue) -> crate::error::Result<Self> {
                match value {
                    DataValue::$variant(v) => Ok(v.clone()),
                    other => Err(crate::cell::type_mismatch(DataType::Vector(ElemType::$elem), other.data_type())),
                }
            }

            fn into_value(self) -> DataValue {
                DataValue::$variant(self)
            }
        }
    };
}

typed_data_vector!(i32, VecI32, I32);
typed_data_vector!(u32, VecU32, U32);
typed_data_vector!(i64, VecI64, I64);
typed_data_vector!(u64, VecU64, U64);
typed_data_vector!(f32, VecF32, F32);
typed_data_vector!(f64, VecF64, F64);
typed_data_vector!(String, VecStr, String);
typed_data_vector!(Matrix, VecMat, Matrix);
