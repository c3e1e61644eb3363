//! Typed native payloads

use crate::data::Data;
use crate::errno::BinderErrno;

/// One reply or argument payload as stored by the runtime.
///
/// The runtime keeps the width tag of numeric payloads; consumers decide how
/// to widen them.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeData {
    /// Zero-terminated string
    Stringz(String),
    /// Boolean
    Bool(bool),
    /// 8-bit signed integer
    I8(i8),
    /// 8-bit unsigned integer
    U8(u8),
    /// 16-bit signed integer
    I16(i16),
    /// 16-bit unsigned integer
    U16(u16),
    /// 32-bit signed integer
    I32(i32),
    /// 32-bit unsigned integer
    U32(u32),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit unsigned integer
    U64(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// Serialized JSON text
    Json(String),
    /// In-memory structured tree
    Tree(Data),
    /// Type the bridge does not know how to convert
    Opaque {
        /// Runtime type name
        type_name: String,
    },
}

impl NativeData {
    /// Runtime type name
    pub fn type_name(&self) -> &str {
        match self {
            NativeData::Stringz(_) => "stringz",
            NativeData::Bool(_) => "bool",
            NativeData::I8(_) => "i8",
            NativeData::U8(_) => "u8",
            NativeData::I16(_) => "i16",
            NativeData::U16(_) => "u16",
            NativeData::I32(_) => "i32",
            NativeData::U32(_) => "u32",
            NativeData::I64(_) => "i64",
            NativeData::U64(_) => "u64",
            NativeData::Float(_) => "float",
            NativeData::Double(_) => "double",
            NativeData::Json(_) => "json",
            NativeData::Tree(_) => "json_c",
            NativeData::Opaque { type_name } => type_name,
        }
    }
}

/// Completed call: status plus reply payloads
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Verb status, or a binder-reserved status when the call was refused
    pub status: i32,
    /// Reply payloads
    pub data: Vec<NativeData>,
}

impl Reply {
    /// Reply with a status and payloads
    pub fn new(status: i32, data: Vec<NativeData>) -> Self {
        Self { status, data }
    }

    /// Refusal reply carrying a binder status
    pub fn refused(errno: BinderErrno) -> Self {
        Self {
            status: errno.status(),
            data: Vec::new(),
        }
    }

    /// Binder-reserved status, when the call was refused
    pub fn errno(&self) -> Option<BinderErrno> {
        BinderErrno::from_status(self.status)
    }
}
