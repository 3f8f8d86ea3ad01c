//! Общие помощники интеграционных тестов: уникальные пути и тестовый тип
//! документа (эмуляция сгенерированного Record).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use GaldrDB::{FieldDescriptor, FieldKind, GaldrError, Record, Value};

pub fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("galdr-{}-{}-{}.db", prefix, pid, t))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub name: String,
    pub age: i32,
    pub nullable_int: Option<i64>,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            age,
            nullable_int: None,
        }
    }
}

impl Record for Person {
    fn descriptors() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", FieldKind::U64).primary(),
            FieldDescriptor::new("name", FieldKind::Str).indexed(),
            FieldDescriptor::new("age", FieldKind::I32).indexed(),
            FieldDescriptor::new("nullable_int", FieldKind::I64)
                .nullable()
                .indexed(),
        ]
    }

    fn doc_id(&self) -> u64 {
        self.id
    }

    fn set_doc_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::U64(self.id)),
            "name" => Some(Value::Str(self.name.clone())),
            "age" => Some(Value::I32(self.age)),
            "nullable_int" => Some(
                self.nullable_int
                    .map(Value::I64)
                    .unwrap_or(Value::Null),
            ),
            _ => None,
        }
    }

    fn encode(&self) -> GaldrDB::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| GaldrError::InvalidArgument(format!("encode person: {}", e)))
    }

    fn decode(bytes: &[u8]) -> GaldrDB::Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| GaldrError::Corruption(format!("decode person: {}", e)))
    }
}

/// Удаление файлов базы после теста (best-effort).
pub fn cleanup(path: &PathBuf) {
    let _ = std::fs::remove_file(path);
    let mut wal = path.as_os_str().to_os_string();
    wal.push(".wal");
    let _ = std::fs::remove_file(PathBuf::from(wal));
}
