//! Descriptor model produced by the parser and consumed by every downstream
//! component. Everything here is immutable once built: the parser hands out
//! owned values, the grapher and compiler only ever borrow them.

use std::fmt;

/// Raw bytes read from a [`crate::resolver::SourceResolver`], tagged with the
/// import path they were fetched under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }
}

/// The dialect a schema file declares via `syntax = "...";`. Only `Proto3` is
/// accepted; anything else is surfaced as `IngestError::UnsupportedDialect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Proto3,
    Proto2,
    Unknown,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Proto3 => write!(f, "proto3"),
            Dialect::Proto2 => write!(f, "proto2"),
            Dialect::Unknown => write!(f, "unknown"),
        }
    }
}

/// Cardinality of a field. proto3 fields are `Singular` unless explicitly
/// marked `optional` or `repeated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Optional,
    Repeated,
}

/// What a field actually holds. This is the tagged-variant replacement for
/// runtime reflection over a generic descriptor: every downstream component
/// matches on `FieldKind` directly instead of probing a descriptor at
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(String),
    Message {
        type_name: String,
        type_package: Option<String>,
    },
    Enum {
        type_name: String,
        type_package: Option<String>,
    },
    Map {
        key_kind: String,
        value_kind: String,
    },
}

impl FieldKind {
    /// The string the compiler writes into a `Parameter` node's `type` field.
    pub fn type_label(&self) -> &str {
        match self {
            FieldKind::Scalar(s) => s,
            FieldKind::Message { .. } => "message",
            FieldKind::Enum { .. } => "enum",
            FieldKind::Map { .. } => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub cardinality: Cardinality,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnumOptions {
    pub allow_alias: bool,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDescriptor {
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub name: String,
    pub options: EnumOptions,
    pub values: Vec<EnumValueDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageOptions {
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub name: String,
    pub options: MessageOptions,
    pub fields: Vec<FieldDescriptor>,
    /// Declared inside this message. Parsed but, per the original system's
    /// top-level-only walk, never promoted to their own graph nodes.
    pub nested_messages: Vec<MessageDescriptor>,
    pub nested_enums: Vec<EnumDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub input_type_name: String,
    pub output_type_name: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

/// One parsed schema file's worth of declarations, keyed by its (raw,
/// versioned) package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub pkg_name: String,
    pub dialect: Dialect,
    pub imports: Vec<String>,
    pub enums: Vec<EnumDescriptor>,
    pub messages: Vec<MessageDescriptor>,
    pub services: Vec<ServiceDescriptor>,
    pub file_path: String,
}

impl PackageDescriptor {
    /// Splits `pkg_name` on `.`; the last segment must start with `v`/`V`.
    /// Returns `(short_package, version)`, e.g. `demo.v1` -> `("demo", "v1")`.
    pub fn version_split(&self) -> Result<(String, String), BadVersionSuffix> {
        version_split(&self.pkg_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadVersionSuffix(pub String);

impl fmt::Display for BadVersionSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package name '{}' has no v<N> version segment", self.0)
    }
}

impl std::error::Error for BadVersionSuffix {}

pub fn version_split(pkg_name: &str) -> Result<(String, String), BadVersionSuffix> {
    let parts: Vec<&str> = pkg_name.split('.').collect();
    let last = *parts
        .last()
        .ok_or_else(|| BadVersionSuffix(pkg_name.to_string()))?;
    let starts_with_v = last
        .chars()
        .next()
        .map(|c| c == 'v' || c == 'V')
        .unwrap_or(false);
    let rest_is_numeric = last.len() > 1 && last[1..].chars().all(|c| c.is_ascii_digit());
    if !starts_with_v || !rest_is_numeric {
        return Err(BadVersionSuffix(pkg_name.to_string()));
    }
    let version = last.to_string();
    let short = parts[..parts.len() - 1].join(".");
    Ok((short, version))
}

/// Builds `name[_sub]*_vN`, the sole stable identity a downstream query can
/// bind to.
pub fn versioned_key(version: &str, parts: &[&str]) -> String {
    format!("{}_{}", parts.join("_"), version)
}

/// Seven ordered fragments produced per package by the compiler, consumed
/// once by the assembler.
#[derive(Debug, Clone, Default)]
pub struct CompilationOutput {
    pub metadata: String,
    pub enums: String,
    pub message_defs: String,
    pub message_params: String,
    pub service_defs: String,
    pub service_methods: String,
    pub relations: String,
}

impl CompilationOutput {
    pub fn fragments(&self) -> [&str; 7] {
        [
            &self.metadata,
            &self.enums,
            &self.message_defs,
            &self.message_params,
            &self.service_defs,
            &self.service_methods,
            &self.relations,
        ]
    }
}
