//! Schema Parser (spec §4.2): turns raw proto3 source into a
//! [`PackageDescriptor`], resolving imports transitively through a
//! [`SourceResolver`] the same way the teacher walks `to_analyze` in
//! `fetch.rs::resolve_all_dependencies` — except here the walk happens
//! inline during parse rather than as a second pass, since each file's
//! `import` statements are already in hand once that file is parsed.

use std::collections::{HashMap, HashSet, VecDeque};

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::{debug, instrument};

use crate::error::{ParseError, SourceError};
use crate::model::{
    Cardinality, Dialect, EnumDescriptor, EnumOptions, EnumValueDescriptor, FieldDescriptor,
    FieldKind, MessageDescriptor, MessageOptions, MethodDescriptor, PackageDescriptor,
    ServiceDescriptor,
};
use crate::resolver::SourceResolver;

#[derive(Parser)]
#[grammar = "proto3.pest"]
struct Proto3Grammar;

/// Parses the entry files and every file they transitively import, via
/// `resolver`. Each distinct import path is fetched and parsed exactly
/// once; already-visited paths are skipped even if imported by more than
/// one file.
#[instrument(skip(resolver, entry_paths), fields(entries = entry_paths.len()))]
pub async fn parse_tree(
    resolver: &dyn SourceResolver,
    entry_paths: &[String],
) -> Result<Vec<PackageDescriptor>, ParseError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = entry_paths.iter().cloned().collect();
    let mut packages = Vec::new();

    while let Some(path) = queue.pop_front() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let bytes = resolver.resolve(&path).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| ParseError::Syntax {
            file: path.clone(),
            message: "source is not valid UTF-8".to_string(),
        })?;
        let pkg = parse_source(&path, text)?;
        for import in &pkg.imports {
            if !visited.contains(import) {
                queue.push_back(import.clone());
            }
        }
        packages.push(pkg);
    }

    debug!(packages = packages.len(), "parsed transitive import tree");
    let packages = link_imports(packages)?;
    Ok(reclassify_cross_package_fields(packages))
}

/// `build_field_kind` classifies every qualified `ident_path` as a
/// provisional `FieldKind::Message` — at the point a single file is
/// parsed, an imported package's own declarations aren't in hand yet, so
/// there's no way to tell a cross-package enum reference from a message
/// one. Once every file in the tree has been parsed, each qualified
/// reference can be checked against the actual package it names and
/// promoted to `FieldKind::Enum` when that package declares the name as
/// an enum rather than a message.
fn reclassify_cross_package_fields(packages: Vec<PackageDescriptor>) -> Vec<PackageDescriptor> {
    let enum_table: HashMap<String, HashSet<String>> = packages
        .iter()
        .map(|p| (p.pkg_name.clone(), p.enums.iter().map(|e| e.name.clone()).collect()))
        .collect();

    packages
        .into_iter()
        .map(|pkg| {
            let messages = pkg
                .messages
                .into_iter()
                .map(|m| reclassify_message_cross_package(m, &enum_table))
                .collect();
            PackageDescriptor { messages, ..pkg }
        })
        .collect()
}

fn reclassify_message_cross_package(
    msg: MessageDescriptor,
    enum_table: &HashMap<String, HashSet<String>>,
) -> MessageDescriptor {
    let fields = msg
        .fields
        .into_iter()
        .map(|f| reclassify_field_cross_package(f, enum_table))
        .collect();
    let nested_messages = msg
        .nested_messages
        .into_iter()
        .map(|m| reclassify_message_cross_package(m, enum_table))
        .collect();
    MessageDescriptor {
        fields,
        nested_messages,
        ..msg
    }
}

fn reclassify_field_cross_package(
    field: FieldDescriptor,
    enum_table: &HashMap<String, HashSet<String>>,
) -> FieldDescriptor {
    let kind = match field.kind {
        FieldKind::Message {
            type_name,
            type_package: Some(type_package),
        } if enum_table
            .get(&type_package)
            .map(|names| names.contains(&type_name))
            .unwrap_or(false) =>
        {
            FieldKind::Enum {
                type_name,
                type_package: Some(type_package),
            }
        }
        other => other,
    };
    FieldDescriptor { kind, ..field }
}

/// Rewrites each package's `imports` from raw file paths (what the `import`
/// statement names) to the package names they resolve to, so the
/// Dependency Grapher and Per-Package Compiler — both keyed by package
/// name, never by file path — see the same identifiers `pkg_name` uses.
fn link_imports(descriptors: Vec<PackageDescriptor>) -> Result<Vec<PackageDescriptor>, ParseError> {
    let path_to_pkg: std::collections::HashMap<String, String> = descriptors
        .iter()
        .map(|d| (d.file_path.clone(), d.pkg_name.clone()))
        .collect();

    descriptors
        .into_iter()
        .map(|mut d| {
            let mut linked = Vec::with_capacity(d.imports.len());
            for import_path in &d.imports {
                let pkg_name = path_to_pkg.get(import_path).ok_or_else(|| ParseError::UnresolvedImport {
                    file: d.file_path.clone(),
                    import: import_path.clone(),
                })?;
                linked.push(pkg_name.clone());
            }
            d.imports = linked;
            Ok(d)
        })
        .collect()
}

/// Parses a single file's text into a [`PackageDescriptor`]. Does not
/// resolve imports; callers needing the transitive closure should use
/// [`parse_tree`].
#[instrument(skip(text), fields(bytes = text.len()))]
pub fn parse_source(file_path: &str, text: &str) -> Result<PackageDescriptor, ParseError> {
    let mut pairs = Proto3Grammar::parse(Rule::file, text).map_err(|e| ParseError::Syntax {
        file: file_path.to_string(),
        message: e.to_string(),
    })?;

    let file_pair = pairs.next().ok_or_else(|| ParseError::Syntax {
        file: file_path.to_string(),
        message: "empty parse tree".to_string(),
    })?;

    let mut dialect = Dialect::Unknown;
    let mut pkg_name = None;
    let mut imports = Vec::new();
    let mut enums = Vec::new();
    let mut messages = Vec::new();
    let mut services = Vec::new();

    for stmt in file_pair.into_inner() {
        match stmt.as_rule() {
            Rule::syntax_stmt => {
                let literal = inner_string(stmt);
                dialect = match literal.as_str() {
                    "proto3" => Dialect::Proto3,
                    "proto2" => Dialect::Proto2,
                    _ => Dialect::Unknown,
                };
            }
            Rule::package_stmt => {
                let mut inner = stmt.into_inner();
                pkg_name = Some(inner.next().unwrap().as_str().to_string());
            }
            Rule::import_stmt => {
                imports.push(inner_string(stmt));
            }
            Rule::enum_decl => {
                enums.push(build_enum(stmt));
            }
            Rule::message_decl => {
                messages.push(build_message(stmt));
            }
            Rule::service_decl => {
                services.push(build_service(stmt));
            }
            Rule::option_stmt | Rule::EOI => {}
            _ => {}
        }
    }

    if dialect != Dialect::Proto3 {
        return Err(ParseError::UnsupportedDialect {
            file: file_path.to_string(),
            found: dialect.to_string(),
        });
    }

    let pkg_name = pkg_name.ok_or_else(|| ParseError::Syntax {
        file: file_path.to_string(),
        message: "missing package declaration".to_string(),
    })?;

    let local_enum_names: HashSet<String> = enums.iter().map(|e: &EnumDescriptor| e.name.clone()).collect();
    let messages = messages
        .into_iter()
        .map(|m| reclassify_message(m, &local_enum_names))
        .collect();

    debug!(
        package = %pkg_name,
        messages = messages.len(),
        enums = enums.len(),
        services = services.len(),
        "parsed source file"
    );

    Ok(PackageDescriptor {
        pkg_name,
        dialect,
        imports,
        enums,
        messages,
        services,
        file_path: file_path.to_string(),
    })
}

fn inner_string(pair: Pair<Rule>) -> String {
    for child in pair.into_inner() {
        if child.as_rule() == Rule::string {
            return strip_quotes(child.as_str());
        }
    }
    String::new()
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// Reads an `option name = value;` statement's name and, when the value is
/// the bare (unquoted) literal `true`/`false`, its boolean value.
fn option_bool(pair: Pair<Rule>) -> Option<(String, bool)> {
    let mut inner = pair.into_inner();
    let name = inner.next()?.as_str().to_string();
    let value = inner.next()?.as_str().trim();
    match value {
        "true" => Some((name, true)),
        "false" => Some((name, false)),
        _ => None,
    }
}

fn build_enum(pair: Pair<Rule>) -> EnumDescriptor {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let mut values = Vec::new();
    let mut allow_alias = false;
    let mut deprecated = false;
    let mut explicit_allow_alias = None;

    for item in inner {
        match item.as_rule() {
            Rule::enum_value => {
                let mut value_inner = item.into_inner();
                let value_name = value_inner.next().unwrap().as_str().to_string();
                let number: i32 = value_inner.next().unwrap().as_str().parse().unwrap_or(0);
                values.push(EnumValueDescriptor {
                    name: value_name,
                    number,
                });
            }
            Rule::option_stmt => {
                if let Some((opt_name, value)) = option_bool(item) {
                    match opt_name.as_str() {
                        "allow_alias" => explicit_allow_alias = Some(value),
                        "deprecated" => deprecated = value,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let mut seen_numbers = HashSet::new();
    for v in &values {
        if !seen_numbers.insert(v.number) {
            allow_alias = true;
        }
    }
    if let Some(explicit) = explicit_allow_alias {
        allow_alias = explicit;
    }

    EnumDescriptor {
        name,
        options: EnumOptions {
            allow_alias,
            deprecated,
        },
        values,
    }
}

fn build_message(pair: Pair<Rule>) -> MessageDescriptor {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();

    let mut fields = Vec::new();
    let mut nested_messages = Vec::new();
    let mut nested_enums = Vec::new();
    let mut deprecated = false;

    for item in inner {
        match item.as_rule() {
            Rule::field_decl => fields.push(build_field(item)),
            Rule::message_decl => nested_messages.push(build_message(item)),
            Rule::enum_decl => nested_enums.push(build_enum(item)),
            Rule::oneof_decl => {
                for sub in item.into_inner() {
                    if sub.as_rule() == Rule::field_decl {
                        fields.push(build_field(sub));
                    }
                }
            }
            Rule::option_stmt => {
                if let Some((opt_name, value)) = option_bool(item) {
                    if opt_name == "deprecated" {
                        deprecated = value;
                    }
                }
            }
            _ => {}
        }
    }

    let local_enum_names: HashSet<String> =
        nested_enums.iter().map(|e| e.name.clone()).collect();
    let fields = fields
        .into_iter()
        .map(|f| reclassify_field(f, &local_enum_names))
        .collect();

    MessageDescriptor {
        name,
        options: MessageOptions { deprecated },
        fields,
        nested_messages,
        nested_enums,
    }
}

fn build_field(pair: Pair<Rule>) -> FieldDescriptor {
    let mut cardinality = Cardinality::Singular;
    let mut kind = None;
    let mut name = None;
    let mut number = 0;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::field_modifier => {
                cardinality = match item.as_str() {
                    "optional" => Cardinality::Optional,
                    "repeated" => Cardinality::Repeated,
                    _ => Cardinality::Singular,
                };
            }
            Rule::field_type => {
                kind = Some(build_field_kind(item));
            }
            Rule::ident => {
                name = Some(item.as_str().to_string());
            }
            Rule::number => {
                number = item.as_str().parse().unwrap_or(0);
            }
            _ => {}
        }
    }

    FieldDescriptor {
        name: name.unwrap_or_default(),
        number,
        cardinality,
        kind: kind.unwrap_or_else(|| FieldKind::Scalar("string".to_string())),
    }
}

fn build_field_kind(pair: Pair<Rule>) -> FieldKind {
    let inner = pair.into_inner().next();
    match inner {
        Some(p) if p.as_rule() == Rule::map_type => {
            let mut types = p.into_inner();
            let key = scalar_of(types.next().unwrap());
            let value = scalar_of(types.next().unwrap());
            FieldKind::Map {
                key_kind: key,
                value_kind: value,
            }
        }
        Some(p) if p.as_rule() == Rule::scalar_type => FieldKind::Scalar(p.as_str().to_string()),
        Some(p) => {
            // ident_path: provisionally a message reference; reclassified
            // against locally-known enum names once the whole file is parsed.
            let full = p.as_str();
            let (type_package, type_name) = split_qualified(full);
            FieldKind::Message {
                type_name,
                type_package,
            }
        }
        None => FieldKind::Scalar("string".to_string()),
    }
}

fn scalar_of(pair: Pair<Rule>) -> String {
    match pair.as_rule() {
        Rule::field_type => scalar_of(pair.into_inner().next().unwrap()),
        Rule::scalar_type => pair.as_str().to_string(),
        Rule::map_type => "map".to_string(),
        _ => pair.as_str().to_string(),
    }
}

fn split_qualified(full: &str) -> (Option<String>, String) {
    match full.rsplit_once('.') {
        Some((pkg, name)) => (Some(pkg.to_string()), name.to_string()),
        None => (None, full.to_string()),
    }
}

fn reclassify_message(msg: MessageDescriptor, local_enum_names: &HashSet<String>) -> MessageDescriptor {
    let fields = msg
        .fields
        .into_iter()
        .map(|f| reclassify_field(f, local_enum_names))
        .collect();
    MessageDescriptor { fields, ..msg }
}

fn reclassify_field(field: FieldDescriptor, local_enum_names: &HashSet<String>) -> FieldDescriptor {
    let kind = match field.kind {
        FieldKind::Message {
            type_name,
            type_package,
        } if type_package.is_none() && local_enum_names.contains(&type_name) => FieldKind::Enum {
            type_name,
            type_package,
        },
        other => other,
    };
    FieldDescriptor { kind, ..field }
}

fn build_service(pair: Pair<Rule>) -> ServiceDescriptor {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let mut methods = Vec::new();

    for item in inner {
        if item.as_rule() == Rule::rpc_decl {
            methods.push(build_method(item));
        }
    }

    ServiceDescriptor { name, methods }
}

fn build_method(pair: Pair<Rule>) -> MethodDescriptor {
    let mut name = None;
    let mut types = Vec::new();
    let mut client_streaming = false;
    let mut server_streaming = false;
    let mut pending_stream = false;

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::ident => name = Some(item.as_str().to_string()),
            Rule::rpc_stream => pending_stream = true,
            Rule::ident_path => {
                if types.is_empty() {
                    client_streaming = pending_stream;
                } else {
                    server_streaming = pending_stream;
                }
                pending_stream = false;
                types.push(item.as_str().to_string());
            }
            _ => {}
        }
    }

    MethodDescriptor {
        name: name.unwrap_or_default(),
        input_type_name: types.first().cloned().unwrap_or_default(),
        output_type_name: types.get(1).cloned().unwrap_or_default(),
        client_streaming,
        server_streaming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trivial_package() {
        let src = r#"
            syntax = "proto3";
            package demo.v1;

            message Ping {
              string text = 1;
            }
        "#;
        let pkg = parse_source("demo.proto", src).unwrap();
        assert_eq!(pkg.pkg_name, "demo.v1");
        assert_eq!(pkg.dialect, Dialect::Proto3);
        assert_eq!(pkg.messages.len(), 1);
        assert_eq!(pkg.messages[0].fields.len(), 1);
    }

    #[test]
    fn rejects_proto2() {
        let src = r#"
            syntax = "proto2";
            package demo.v1;
        "#;
        let err = parse_source("demo.proto", src).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedDialect { .. }));
    }

    #[test]
    fn detects_enum_alias() {
        let src = r#"
            syntax = "proto3";
            package demo.v1;

            enum Status {
              UNKNOWN = 0;
              ACTIVE = 1;
              ACTIVE_ALIAS = 1;
            }
        "#;
        let pkg = parse_source("demo.proto", src).unwrap();
        assert!(pkg.enums[0].options.allow_alias);
    }

    #[test]
    fn reads_explicit_deprecated_options() {
        let src = r#"
            syntax = "proto3";
            package demo.v1;

            enum Status {
              option deprecated = true;
              UNKNOWN = 0;
            }

            message Old {
              option deprecated = true;
              string text = 1;
            }
        "#;
        let pkg = parse_source("demo.proto", src).unwrap();
        assert!(pkg.enums[0].options.deprecated);
        assert!(pkg.messages[0].options.deprecated);
    }

    #[test]
    fn classifies_map_and_enum_fields() {
        let src = r#"
            syntax = "proto3";
            package demo.v1;

            enum Status { UNKNOWN = 0; }

            message Widget {
              map<string, int32> counts = 1;
              Status status = 2;
            }
        "#;
        let pkg = parse_source("demo.proto", src).unwrap();
        let widget = &pkg.messages[0];
        assert!(matches!(widget.fields[0].kind, FieldKind::Map { .. }));
        assert!(matches!(widget.fields[1].kind, FieldKind::Enum { .. }));
    }

    #[test]
    fn reclassifies_cross_package_enum_reference() {
        let common = parse_source(
            "common.proto",
            r#"
                syntax = "proto3";
                package common.v1;

                enum Status { UNKNOWN = 0; }
            "#,
        )
        .unwrap();
        let user = parse_source(
            "user.proto",
            r#"
                syntax = "proto3";
                package user.v1;
                import "common.proto";

                message User {
                  common.v1.Status status = 1;
                }
            "#,
        )
        .unwrap();

        // Before the tree-wide pass, a qualified reference to another
        // file's enum is only ever a provisional `Message` guess.
        assert!(matches!(
            user.messages[0].fields[0].kind,
            FieldKind::Message { .. }
        ));

        let packages = reclassify_cross_package_fields(vec![common, user]);
        let user_pkg = packages.iter().find(|p| p.pkg_name == "user.v1").unwrap();
        assert!(matches!(
            user_pkg.messages[0].fields[0].kind,
            FieldKind::Enum { .. }
        ));
    }

    #[test]
    fn parses_service_with_rpc() {
        let src = r#"
            syntax = "proto3";
            package demo.v1;

            message Req {}
            message Resp {}

            service Pinger {
              rpc Ping(Req) returns (Resp);
            }
        "#;
        let pkg = parse_source("demo.proto", src).unwrap();
        assert_eq!(pkg.services.len(), 1);
        assert_eq!(pkg.services[0].methods[0].input_type_name, "Req");
        assert_eq!(pkg.services[0].methods[0].output_type_name, "Resp");
    }
}
