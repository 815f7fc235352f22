use criterion::{criterion_group, criterion_main, Criterion};
use protograph::compiler::{compile_package, CompileContext};
use protograph::model::{
    Cardinality, Dialect, EnumDescriptor, EnumOptions, FieldDescriptor, FieldKind,
    MessageDescriptor, MessageOptions, PackageDescriptor,
};
use std::hint::black_box;

fn trivial_package() -> PackageDescriptor {
    PackageDescriptor {
        pkg_name: "demo.v1".to_string(),
        dialect: Dialect::Proto3,
        imports: vec![],
        enums: vec![],
        messages: vec![MessageDescriptor {
            name: "Ping".to_string(),
            options: MessageOptions::default(),
            fields: vec![FieldDescriptor {
                name: "text".to_string(),
                number: 1,
                cardinality: Cardinality::Singular,
                kind: FieldKind::Scalar("string".to_string()),
            }],
            nested_messages: vec![],
            nested_enums: vec![],
        }],
        services: vec![],
        file_path: "demo.proto".to_string(),
    }
}

fn large_package(field_count: usize) -> PackageDescriptor {
    let fields = (0..field_count)
        .map(|i| FieldDescriptor {
            name: format!("field_{i}"),
            number: i as i32 + 1,
            cardinality: Cardinality::Singular,
            kind: FieldKind::Scalar("int32".to_string()),
        })
        .collect();

    PackageDescriptor {
        pkg_name: "bulk.v1".to_string(),
        dialect: Dialect::Proto3,
        imports: vec![],
        enums: vec![EnumDescriptor {
            name: "Status".to_string(),
            options: EnumOptions::default(),
            values: vec![],
        }],
        messages: vec![MessageDescriptor {
            name: "Wide".to_string(),
            options: MessageOptions::default(),
            fields,
            nested_messages: vec![],
            nested_enums: vec![],
        }],
        services: vec![],
        file_path: "bulk.proto".to_string(),
    }
}

fn bench_compile_trivial_package(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pkg = trivial_package();
    let ctx = CompileContext::build(std::slice::from_ref(&pkg));

    c.bench_function("compile_trivial_package", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(compile_package(black_box(&pkg), black_box(&ctx)).await.unwrap())
            })
        })
    });
}

fn bench_compile_wide_message(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pkg = large_package(200);
    let ctx = CompileContext::build(std::slice::from_ref(&pkg));

    c.bench_function("compile_wide_message_200_fields", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(compile_package(black_box(&pkg), black_box(&ctx)).await.unwrap())
            })
        })
    });
}

criterion_group!(benches, bench_compile_trivial_package, bench_compile_wide_message);
criterion_main!(benches);
