//! Per-Package Compiler (spec §4.5), ported key-for-key from
//! `compiler.go::ProtoCypherCompiler`: seven named fragments, each an
//! append-only buffer owned by one fan-out task, joined with
//! `tokio::join!` in place of the original's `sync.WaitGroup` goroutines.
//! Version extraction, `VersionedKey` formatting, and every Cypher
//! node/edge template below are carried over from the original verbatim.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use tracing::{debug, instrument};

use crate::error::CompileError;
use crate::model::{
    CompilationOutput, Cardinality, FieldDescriptor, FieldKind, PackageDescriptor,
};

/// What the compiler needs to know about every OTHER package in the ingest
/// batch in order to resolve cross-package message/enum references and
/// detect unresolved ones. Built once per ingest by the caller.
#[derive(Default)]
pub struct CompileContext {
    /// package name -> (message names, enum names) declared in that package.
    pub declared: HashMap<String, (HashSet<String>, HashSet<String>)>,
}

impl CompileContext {
    pub fn build(packages: &[PackageDescriptor]) -> Self {
        let mut declared = HashMap::new();
        for pkg in packages {
            let messages: HashSet<String> = pkg.messages.iter().map(|m| m.name.clone()).collect();
            let enums: HashSet<String> = pkg.enums.iter().map(|e| e.name.clone()).collect();
            declared.insert(pkg.pkg_name.clone(), (messages, enums));
        }
        Self { declared }
    }

    fn is_known_message(&self, package_hint: Option<&str>, current_pkg: &str, name: &str) -> bool {
        let pkg = package_hint.unwrap_or(current_pkg);
        self.declared
            .get(pkg)
            .map(|(msgs, _)| msgs.contains(name))
            .unwrap_or(false)
    }

    fn is_known_enum(&self, package_hint: Option<&str>, current_pkg: &str, name: &str) -> bool {
        let pkg = package_hint.unwrap_or(current_pkg);
        self.declared
            .get(pkg)
            .map(|(_, enums)| enums.contains(name))
            .unwrap_or(false)
    }
}

fn append_query(buf: &mut String, query: &str) {
    buf.push_str(query);
    buf.push('\n');
}

/// Compiles one package into its seven Cypher fragments. Fans the
/// independent fragments out with `tokio::join!`; `relations` runs last
/// since it needs the node keys the other five fragments collect.
#[instrument(skip(pkg, ctx), fields(package = %pkg.pkg_name))]
pub async fn compile_package(
    pkg: &PackageDescriptor,
    ctx: &CompileContext,
) -> Result<CompilationOutput, CompileError> {
    let (short_pkg, ver) = pkg.version_split()?;

    let (metadata, (enums, enum_keys), (message_defs, msg_keys), message_params, (service_defs, svc_keys), service_methods) =
        tokio::join!(
            compile_metadata(pkg, &ver, &short_pkg),
            compile_enums(pkg, &ver),
            compile_message_defs(pkg, &ver, &short_pkg),
            compile_message_params(pkg, &ver, &short_pkg, ctx),
            compile_service_defs(pkg, &ver, &short_pkg),
            compile_service_methods(pkg, &ver),
        );
    let message_params = message_params?;

    let relations = compile_relations(pkg, &enum_keys, &msg_keys, &svc_keys);

    debug!(
        package = %pkg.pkg_name,
        enums = enum_keys.len(),
        messages = msg_keys.len(),
        services = svc_keys.len(),
        "compiled package fragments"
    );

    Ok(CompilationOutput {
        metadata,
        enums,
        message_defs,
        message_params,
        service_defs,
        service_methods,
        relations,
    })
}

async fn compile_metadata(pkg: &PackageDescriptor, ver: &str, short_pkg: &str) -> String {
    let mut buf = String::new();
    let imports = pkg.imports.join(", ");
    append_query(
        &mut buf,
        &format!(
            "({pkg_name}:Package {{\n  name: \"{pkg_name}\",\n  package: \"{short}\",\n  version: \"{version}\",\n  dialect: \"{dialect}\",\n  imports: \"{imports}\"\n}}),",
            pkg_name = pkg.pkg_name,
            short = short_pkg,
            version = ver,
            dialect = pkg.dialect,
            imports = imports,
        ),
    );
    buf
}

async fn compile_enums(pkg: &PackageDescriptor, ver: &str) -> (String, Vec<String>) {
    let mut buf = String::new();
    let mut enum_keys = Vec::new();

    for enum_decl in &pkg.enums {
        let enum_key = crate::model::versioned_key(ver, &[&enum_decl.name]);
        enum_keys.push(enum_key.clone());

        append_query(
            &mut buf,
            &format!(
                "({key}:Enum {{\n  package: \"{pkg}\",\n  name: \"{name}\",\n  version: \"{ver}\",\n  allowAlias: {alias},\n  deprecated: {dep}\n}}),",
                key = enum_key,
                pkg = pkg.pkg_name,
                name = enum_decl.name,
                ver = ver,
                alias = enum_decl.options.allow_alias,
                dep = enum_decl.options.deprecated,
            ),
        );

        let mut by_number: HashMap<i32, Vec<String>> = HashMap::new();
        for value in &enum_decl.values {
            let value_key = crate::model::versioned_key(ver, &[&enum_decl.name, &value.name]);
            append_query(
                &mut buf,
                &format!(
                    "({key}:EnumValue {{\n  name: \"{name}\",\n  number: {num}\n}}),",
                    key = value_key,
                    name = value.name,
                    num = value.number,
                ),
            );
            by_number.entry(value.number).or_default().push(value_key);
        }

        for aliases in by_number.values() {
            if aliases.len() < 2 {
                continue;
            }
            let first = &aliases[0];
            for next in &aliases[1..] {
                append_query(&mut buf, &format!("({next})-[:ALIAS]->({first}),"));
            }
        }
    }

    (buf, enum_keys)
}

async fn compile_message_defs(
    pkg: &PackageDescriptor,
    ver: &str,
    short_pkg: &str,
) -> (String, Vec<String>) {
    let mut buf = String::new();
    let mut msg_keys = Vec::new();

    for msg in &pkg.messages {
        let key = crate::model::versioned_key(ver, &[&msg.name]);
        msg_keys.push(key.clone());
        append_query(
            &mut buf,
            &format!(
                "({key}:Message {{\n  package: \"{pkg}\",\n  version: \"{ver}\",\n  name: \"{name}\",\n  deprecated: {dep}\n}}),",
                key = key,
                pkg = short_pkg,
                ver = ver,
                name = msg.name,
                dep = msg.options.deprecated,
            ),
        );
    }

    (buf, msg_keys)
}

async fn compile_message_params(
    pkg: &PackageDescriptor,
    ver: &str,
    short_pkg: &str,
    ctx: &CompileContext,
) -> Result<String, CompileError> {
    let mut buf = String::new();

    for msg in &pkg.messages {
        let msg_key = crate::model::versioned_key(ver, &[&msg.name]);
        for field in &msg.fields {
            let param_key = crate::model::versioned_key(ver, &[&msg.name, &field.name]);
            write_parameter_node(&mut buf, pkg, short_pkg, ver, &msg.name, &param_key, field);
            append_query(&mut buf, &format!("({msg_key})-[:HAS_PARAMETER]->({param_key}),"));
            write_type_relations(&mut buf, pkg, ver, short_pkg, &param_key, field, ctx)?;
        }
    }

    Ok(buf)
}

fn write_parameter_node(
    buf: &mut String,
    pkg: &PackageDescriptor,
    short_pkg: &str,
    ver: &str,
    msg_name: &str,
    param_key: &str,
    field: &FieldDescriptor,
) {
    let (t_key, t_val) = match &field.kind {
        FieldKind::Map { key_kind, value_kind } => (key_kind.clone(), value_kind.clone()),
        _ => (String::new(), String::new()),
    };
    let _ = pkg;
    let repeated = matches!(field.cardinality, Cardinality::Repeated);
    let optional = matches!(field.cardinality, Cardinality::Optional);

    let mut node = String::new();
    let _ = write!(
        node,
        "({key}:Parameter {{\n  package: \"{pkg}\",\n  message: \"{msg}\",\n  repeated: {repeated},\n  optional: {optional},\n  field: \"{field}\",\n  type: \"{ftype}\",\n  number: {num},\n  tKey: \"{tkey}\",\n  tVal: \"{tval}\"\n}}),",
        key = param_key,
        pkg = short_pkg,
        msg = msg_name,
        repeated = repeated,
        optional = optional,
        field = field.name,
        ftype = field.kind.type_label(),
        num = field.number,
        tkey = t_key,
        tval = t_val,
        ver = ver,
    );
    let _ = ver;
    append_query(buf, &node);
}

fn write_type_relations(
    buf: &mut String,
    pkg: &PackageDescriptor,
    ver: &str,
    short_pkg: &str,
    param_key: &str,
    field: &FieldDescriptor,
    ctx: &CompileContext,
) -> Result<(), CompileError> {
    match &field.kind {
        FieldKind::Message { type_name, type_package } => {
            let hint = type_package.as_deref();
            let cross_package_undeclared = hint
                .map(|p| p != pkg.pkg_name && !pkg.imports.iter().any(|imp| imp == p))
                .unwrap_or(false);
            if cross_package_undeclared || !ctx.is_known_message(hint, &pkg.pkg_name, type_name) {
                return Err(CompileError::UnresolvedReference {
                    message: field.name.clone(),
                    field: field.name.clone(),
                    kind: "message",
                    reference: type_name.clone(),
                });
            }
            append_query(
                buf,
                &format!(
                    "({param_key})-[:USES_MSG_TYPE]->({key}),",
                    param_key = param_key,
                    key = crate::model::versioned_key(ver, &[type_name]),
                ),
            );
            // `type_package`, when present, is already the referenced
            // type's full versioned package name (e.g. "common.v1"), since
            // that's what a qualified proto3 field type names. Only emit
            // the edge when it differs from the package being compiled.
            if let Some(field_pkg) = type_package {
                if field_pkg != &pkg.pkg_name {
                    append_query(
                        buf,
                        &format!(
                            "({param_key})-[:FROM_PACKAGE]->({field_pkg}),",
                            param_key = param_key,
                            field_pkg = field_pkg,
                        ),
                    );
                }
            }
            let _ = short_pkg;
            Ok(())
        }
        FieldKind::Enum { type_name, type_package } => {
            let hint = type_package.as_deref();
            let cross_package_undeclared = hint
                .map(|p| p != pkg.pkg_name && !pkg.imports.iter().any(|imp| imp == p))
                .unwrap_or(false);
            if cross_package_undeclared || !ctx.is_known_enum(hint, &pkg.pkg_name, type_name) {
                return Err(CompileError::UnresolvedReference {
                    message: field.name.clone(),
                    field: field.name.clone(),
                    kind: "enum",
                    reference: type_name.clone(),
                });
            }
            append_query(
                buf,
                &format!(
                    "({param_key})-[:USES_ENUM_TYPE]->({key}),",
                    param_key = param_key,
                    key = crate::model::versioned_key(ver, &[type_name]),
                ),
            );
            Ok(())
        }
        // Map fields never gain USES_*_TYPE/FROM_PACKAGE edges: key/value
        // kinds are recorded on the Parameter node itself (`tKey`/`tVal`),
        // per the original's map-suppression rule.
        FieldKind::Map { .. } | FieldKind::Scalar(_) => Ok(()),
    }
}

async fn compile_service_defs(
    pkg: &PackageDescriptor,
    ver: &str,
    short_pkg: &str,
) -> (String, Vec<String>) {
    let mut buf = String::new();
    let mut svc_keys = Vec::new();

    for svc in &pkg.services {
        let key = crate::model::versioned_key(ver, &[&svc.name]);
        svc_keys.push(key.clone());
        append_query(
            &mut buf,
            &format!(
                "({key}:Service {{\n  name: \"{name}\",\n  package: \"{pkg}\",\n  version: \"{ver}\"\n}}),",
                key = key,
                name = svc.name,
                pkg = short_pkg,
                ver = ver,
            ),
        );
    }

    (buf, svc_keys)
}

async fn compile_service_methods(pkg: &PackageDescriptor, ver: &str) -> String {
    let mut buf = String::new();

    for svc in &pkg.services {
        let svc_key = crate::model::versioned_key(ver, &[&svc.name]);
        for method in &svc.methods {
            let method_key = crate::model::versioned_key(ver, &[&svc.name, &method.name]);
            let input_key = crate::model::versioned_key(ver, &[&method.input_type_name]);
            let output_key = crate::model::versioned_key(ver, &[&method.output_type_name]);

            append_query(
                &mut buf,
                &format!(
                    "({method_key}:Method {{\n  name: \"{name}\",\n  clientStreaming: {cs},\n  serverStreaming: {ss}\n}}),",
                    method_key = method_key,
                    name = method.name,
                    cs = method.client_streaming,
                    ss = method.server_streaming,
                ),
            );
            append_query(&mut buf, &format!("({input_key})-[:INPUT]->({method_key}),"));
            append_query(&mut buf, &format!("({output_key})-[:OUTPUT]->({method_key}),"));
            append_query(&mut buf, &format!("({method_key})-[:RPC_METHOD]->({svc_key}),"));
        }
    }

    buf
}

fn compile_relations(
    pkg: &PackageDescriptor,
    enum_keys: &[String],
    msg_keys: &[String],
    svc_keys: &[String],
) -> String {
    let mut buf = String::new();
    for key in enum_keys {
        append_query(&mut buf, &format!("({key})-[:DEFINED_IN]->({pkg}),", key = key, pkg = pkg.pkg_name));
    }
    for key in msg_keys {
        append_query(&mut buf, &format!("({key})-[:DEFINED_IN]->({pkg}),", key = key, pkg = pkg.pkg_name));
    }
    for key in svc_keys {
        append_query(&mut buf, &format!("({key})-[:DEFINED_IN]->({pkg}),", key = key, pkg = pkg.pkg_name));
    }
    for import in &pkg.imports {
        append_query(
            &mut buf,
            &format!("({pkg})-[:IMPORTS]->({import});", pkg = pkg.pkg_name, import = import),
        );
    }
    buf
}
