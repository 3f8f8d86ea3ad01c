//! record — шов с внешней сериализацией: типизированные значения полей,
//! дескрипторы и трейт Record.
//!
//! Сериализация объекта в байты и метаданные полей (какие поля
//! индексировать, их виды) производятся внешним кодогенератором; движок
//! потребляет их через этот узкий интерфейс. Дескрипторы попадают в каталог
//! при create_collection и дальше каталог — источник истины.

use serde::{Deserialize, Serialize};

use crate::errors::{GaldrError, Result};

/// Виды индексируемых полей. Enum хранится как подлежащее целое.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str,
    Char,
    Timestamp,
    Duration,
    Enum,
}

/// Значение поля документа.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Char(char),
    /// Микросекунды от эпохи.
    Timestamp(i64),
    /// Наносекунды.
    Duration(i64),
    Enum(u64),
}

impl Value {
    pub fn kind(&self) -> Option<FieldKind> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => FieldKind::Bool,
            Value::U8(_) => FieldKind::U8,
            Value::U16(_) => FieldKind::U16,
            Value::U32(_) => FieldKind::U32,
            Value::U64(_) => FieldKind::U64,
            Value::I8(_) => FieldKind::I8,
            Value::I16(_) => FieldKind::I16,
            Value::I32(_) => FieldKind::I32,
            Value::I64(_) => FieldKind::I64,
            Value::F32(_) => FieldKind::F32,
            Value::F64(_) => FieldKind::F64,
            Value::Str(_) => FieldKind::Str,
            Value::Char(_) => FieldKind::Char,
            Value::Timestamp(_) => FieldKind::Timestamp,
            Value::Duration(_) => FieldKind::Duration,
            Value::Enum(_) => FieldKind::Enum,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Проверка соответствия дескриптору поля.
    pub fn check_kind(&self, d: &FieldDescriptor) -> Result<()> {
        match self.kind() {
            None => {
                if d.nullable {
                    Ok(())
                } else {
                    Err(GaldrError::invalid_arg(format!(
                        "field '{}' is not nullable",
                        d.name
                    )))
                }
            }
            Some(k) if k == d.kind => Ok(()),
            Some(k) => Err(GaldrError::invalid_arg(format!(
                "field '{}' expects {:?}, got {:?}",
                d.name, d.kind, k
            ))),
        }
    }
}

/// Дескриптор поля из сгенерированных метаданных типа.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub indexed: bool,
    pub primary: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            indexed: false,
            primary: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Поле первичного ключа; оно индексировано всегда.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.indexed = true;
        self
    }
}

/// Документ глазами движка. Реализация обычно порождается внешним
/// кодогенератором; движку важны только идентификатор, значения
/// индексируемых полей и байтовая (де)сериализация.
pub trait Record: Sized {
    /// Дескрипторы полей типа (включая поле первичного ключа).
    fn descriptors() -> Vec<FieldDescriptor>;

    fn doc_id(&self) -> u64;

    fn set_doc_id(&mut self, id: u64);

    /// Значение поля по имени; None — поле типу неизвестно.
    fn field_value(&self, field: &str) -> Option<Value>;

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}
