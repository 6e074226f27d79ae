//! Logical schema types. Pure data; the stores behind compute nodes own the
//! physical layout.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Decimal,
    Utf8,
    Date,
}

impl DataType {
    /// Column type used in generated `CREATE TABLE` statements.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int32 => "INT",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::Decimal => "DECIMAL(15,2)",
            DataType::Utf8 => "VARCHAR(255)",
            DataType::Date => "DATE",
        }
    }

    /// Lenient parse used by the plan DSL; unknown names map to `Utf8`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => DataType::Boolean,
            "int32" | "int" | "integer" => DataType::Int32,
            "int64" | "bigint" => DataType::Int64,
            "float64" | "double" | "float" => DataType::Float64,
            "decimal" => DataType::Decimal,
            "date" => DataType::Date,
            _ => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Concatenate two schemas (join output).
    pub fn merge(&self, other: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Schema { fields }
    }

    /// Column list for `CREATE TABLE`, e.g. `a INT, b VARCHAR(255)`.
    pub fn column_defs(&self) -> String {
        let defs: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, f.data_type.sql_name()))
            .collect();
        defs.join(", ")
    }
}
