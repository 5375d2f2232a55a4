use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use sylva_query::api::{Engine, EngineConfig, EvaluateOptions, ReturnType};
use sylva_query::compiler::{CompiledQuery, compile};
use sylva_query::engine::runtime::{DynamicContextBuilder, Error, Language, StaticContext};
use sylva_query::model::simple::{SimpleDocumentWriter, SimpleNode, SimpleNodeBuilder, SimpleNodeFactory, attr, doc, elem, text};
use sylva_query::parser::parse_module;
use sylva_query::xdm::XdmItem as I;
use sylva_query::{evaluate, evaluate_stream};

fn sample_queries() -> Vec<&'static str> {
    vec![
        "1 + 2 * 3",
        "string-length('Lorem ipsum dolor sit amet, consectetur adipiscing elit.')",
        "/root/section/item[@type='a'][position() < 5]/@id",
        "for $n in 1 to 100 return $n * $n",
        "if (exists(/root/section/item[@featured='true'])) then 'featured' else 'none'",
        "for $i in //item group by $t := $i/@type order by $t return $t || ':' || count($i)",
        "map:merge(for $i in //item return map{string($i/@id): string($i)})?*",
        "(//item[@type='b'] | //section[@name='alpha']/item) ! string(@id)",
    ]
}

fn build_sample_document() -> SimpleNode {
    let section = |name: &str, start: usize, count: usize| -> SimpleNodeBuilder {
        elem("section").attr(attr("name", name)).children((start..start + count).map(|i| {
            let mut item = elem("item")
                .attr(attr("id", &format!("item-{i}")))
                .attr(attr("type", if i % 2 == 0 { "b" } else { "a" }));
            if i % 7 == 0 {
                item = item.attr(attr("featured", "true"));
            }
            item.child(text(&format!("Item {i}")))
        }))
    };
    doc()
        .child(
            elem("root")
                .attr(attr("xml:lang", "en"))
                .child(section("alpha", 1, 40))
                .child(section("beta", 41, 40))
                .child(section("gamma", 81, 40)),
        )
        .build()
}

fn benchmark_parser(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("parser/parse_module", |b| {
        b.iter(|| {
            for q in &queries {
                let ast = parse_module(black_box(q), Language::XQuery31).expect("parse failure");
                black_box(ast);
            }
        });
    });
}

fn benchmark_compiler(c: &mut Criterion) {
    let queries = sample_queries();
    let ctx = StaticContext::default();
    c.bench_function("compiler/compile", |b| {
        b.iter(|| {
            for q in &queries {
                let compiled = compile(black_box(q), &ctx).expect("compile failure");
                black_box(compiled);
            }
        });
    });
}

fn prepared_compiled_queries() -> Result<Vec<(String, CompiledQuery)>, Error> {
    let ctx = StaticContext::default();
    sample_queries()
        .into_iter()
        .map(|q| compile(q, &ctx).map(|c| (q.to_string(), c)))
        .collect()
}

fn benchmark_evaluator(c: &mut Criterion) {
    let document = build_sample_document();
    let ctx = DynamicContextBuilder::default()
        .with_context_item(I::Node(document.clone()))
        .build();
    let compiled = prepared_compiled_queries().expect("compile failure");

    let mut group = c.benchmark_group("evaluator/evaluate");
    for (name, query) in &compiled {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| {
                let result = evaluate::<SimpleNode>(q, black_box(&ctx)).expect("eval failure");
                black_box(result.len());
            });
        });
    }
    group.finish();
}

fn benchmark_streaming(c: &mut Criterion) {
    let document = build_sample_document();
    let ctx = DynamicContextBuilder::default()
        .with_context_item(I::Node(document))
        .build();
    let query = compile("//item[@type = 'a']", &StaticContext::default()).expect("compile failure");
    c.bench_function("evaluator/first_of_stream", |b| {
        b.iter(|| {
            let seq = evaluate_stream::<SimpleNode>(&query, black_box(&ctx)).expect("eval failure");
            black_box(seq.first().expect("eval failure"));
        });
    });
}

fn benchmark_native_backend(c: &mut Criterion) {
    let document = build_sample_document();
    let options = EvaluateOptions::builder().return_type(ReturnType::AllNodes).build();
    let query = "//section/item[@type = 'b' and not(@featured = 'true')]";
    let mut group = c.benchmark_group("engine/all_nodes");
    for native_backend in [false, true] {
        let engine = Engine::<SimpleNode>::builder()
            .config(EngineConfig {
                compile_cache_capacity: 16,
                native_backend,
            })
            .build();
        let label = if native_backend { "native" } else { "interpreted" };
        group.bench_function(label, |b| {
            b.iter(|| {
                let out = engine
                    .evaluate(black_box(query), Some(I::Node(document.clone())), [], &options)
                    .expect("eval failure");
                black_box(out);
            });
        });
    }
    group.finish();
}

fn benchmark_updates(c: &mut Criterion) {
    let engine = Engine::<SimpleNode>::new();
    c.bench_function("update/insert_and_apply", |b| {
        b.iter_batched(
            build_sample_document,
            |document| {
                let options = EvaluateOptions::builder()
                    .node_factory(Arc::new(SimpleNodeFactory::for_document(&document)))
                    .document_writer(Arc::new(SimpleDocumentWriter))
                    .build();
                let pending = engine
                    .evaluate_updating_expression(
                        "for $s in //section return insert node <item id='new'/> as first into $s",
                        Some(I::Node(document.clone())),
                        [],
                        &options,
                    )
                    .expect("eval failure");
                let report = engine
                    .execute_pending_update_list(pending.pending_update_list, &options)
                    .expect("apply failure");
                black_box(report.applied);
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    benchmark_parser,
    benchmark_compiler,
    benchmark_evaluator,
    benchmark_streaming,
    benchmark_native_backend,
    benchmark_updates
);
criterion_main!(benches);
