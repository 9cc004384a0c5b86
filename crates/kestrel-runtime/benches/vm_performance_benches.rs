//! VM Performance Benchmarks
//!
//! Benchmarks for VM execution covering:
//! - Arithmetic in loops (integer and float)
//! - Function calls (simple, recursive, closures)
//! - Array and ordered map operations
//! - Method dispatch on class instances
//! - Exception handling
//! - Channel round trips between tasks
//!
//! Programs are compiled once per benchmark; only execution is measured,
//! except in the compile benchmarks.
//!
//! Run with: cargo bench --bench vm_performance_benches

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kestrel_runtime::api::NativeRegistry;
use kestrel_runtime::ast::build::*;
use kestrel_runtime::ast::{Program, Stmt};
use kestrel_runtime::{Bytecode, Compiler, Runtime, Vm};
use std::sync::Arc;

fn compile(program: &Program) -> (Bytecode, Arc<NativeRegistry>) {
    let natives = NativeRegistry::with_prelude();
    let bytecode = Compiler::new(&natives)
        .compile(program)
        .expect("Compilation failed");
    (bytecode, Arc::new(natives))
}

fn bench_program(c: &mut Criterion, name: &str, statements: Vec<Stmt>) {
    let (bytecode, natives) = compile(&program(statements));
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut vm = Vm::new(black_box(bytecode.clone()), Arc::clone(&natives));
            vm.run().expect("run failed");
            black_box(vm.last_popped_value().clone())
        })
    });
}

/// `let i = 0; while (i < n) { body; i = i + 1 }`
fn counted_loop(n: i64, body: Vec<Stmt>) -> Vec<Stmt> {
    let mut body = body;
    body.push(expr(assign("i", infix("+", id("i"), int(1)))));
    vec![let_("i", int(0)), while_(infix("<", id("i"), int(n)), body)]
}

fn fib() -> Stmt {
    let_(
        "fib",
        func(
            &["n"],
            vec![ret(ternary(
                infix("<", id("n"), int(2)),
                id("n"),
                infix(
                    "+",
                    call(id("fib"), vec![infix("-", id("n"), int(1))]),
                    call(id("fib"), vec![infix("-", id("n"), int(2))]),
                ),
            ))],
        ),
    )
}

// ============================================================================
// Arithmetic Benchmarks
// ============================================================================

fn bench_arithmetic_add(c: &mut Criterion) {
    let mut statements = vec![let_("sum", int(0))];
    statements.extend(counted_loop(
        1000,
        vec![expr(assign("sum", infix("+", id("sum"), id("i"))))],
    ));
    statements.push(expr(id("sum")));
    bench_program(c, "vm_arithmetic_add_1000", statements);
}

fn bench_arithmetic_float(c: &mut Criterion) {
    let mut statements = vec![let_("result", float(1.0))];
    statements.extend(counted_loop(
        1000,
        vec![expr(assign("result", infix("*", id("result"), float(1.001))))],
    ));
    statements.push(expr(id("result")));
    bench_program(c, "vm_arithmetic_float_mul_1000", statements);
}

// ============================================================================
// Function Call Benchmarks
// ============================================================================

fn bench_function_calls(c: &mut Criterion) {
    let mut statements = vec![
        let_("add", func(&["a", "b"], vec![ret(infix("+", id("a"), id("b")))])),
        let_("acc", int(0)),
    ];
    statements.extend(counted_loop(
        1000,
        vec![expr(assign("acc", call(id("add"), vec![id("acc"), int(1)])))],
    ));
    statements.push(expr(id("acc")));
    bench_program(c, "vm_function_calls_1000", statements);
}

fn bench_recursive_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("vm_recursive_fib");
    for n in [10i64, 15, 20] {
        let (bytecode, natives) = compile(&program(vec![
            fib(),
            expr(call(id("fib"), vec![int(n)])),
        ]));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut vm = Vm::new(bytecode.clone(), Arc::clone(&natives));
                vm.run().expect("run failed");
            })
        });
    }
    group.finish();
}

fn bench_closure_counter(c: &mut Criterion) {
    let mut statements = vec![
        let_(
            "make",
            func(
                &[],
                vec![
                    let_("n", int(0)),
                    ret(func(&[], vec![ret(assign("n", infix("+", id("n"), int(1))))])),
                ],
            ),
        ),
        let_("counter", call(id("make"), vec![])),
    ];
    statements.extend(counted_loop(1000, vec![expr(call(id("counter"), vec![]))]));
    bench_program(c, "vm_closure_counter_1000", statements);
}

// ============================================================================
// Collection Benchmarks
// ============================================================================

fn bench_array_push_index(c: &mut Criterion) {
    let mut statements = vec![let_("xs", array(vec![])), let_("total", int(0))];
    statements.extend(counted_loop(
        500,
        vec![
            expr(call(id("push"), vec![id("xs"), id("i")])),
            expr(assign("total", infix("+", id("total"), index(id("xs"), id("i"))))),
        ],
    ));
    statements.push(expr(id("total")));
    bench_program(c, "vm_array_push_index_500", statements);
}

fn bench_ordered_map_writes(c: &mut Criterion) {
    let mut statements = vec![let_("m", ordered(vec![]))];
    statements.extend(counted_loop(
        500,
        vec![expr(index_assign(id("m"), id("i"), infix("*", id("i"), int(2))))],
    ));
    statements.push(expr(call(id("len"), vec![id("m")])));
    bench_program(c, "vm_ordered_map_writes_500", statements);
}

// ============================================================================
// Class and Exception Benchmarks
// ============================================================================

fn bench_method_dispatch(c: &mut Criterion) {
    let mut statements = vec![
        class(
            "Acc",
            None,
            vec![
                property("total"),
                method(
                    "add",
                    &["n"],
                    vec![expr(member_assign(
                        this(),
                        "total",
                        infix("+", member(this(), "total"), id("n")),
                    ))],
                ),
            ],
        ),
        let_("acc", call(id("Acc"), vec![int(0)])),
    ];
    statements.extend(counted_loop(
        1000,
        vec![expr(method_call(id("acc"), "add", vec![id("i")]))],
    ));
    bench_program(c, "vm_method_dispatch_1000", statements);
}

fn bench_try_catch(c: &mut Criterion) {
    let mut statements = vec![let_("caught", int(0))];
    statements.extend(counted_loop(
        500,
        vec![try_(
            vec![throw(id("i"))],
            Some((
                Some("e"),
                vec![expr(assign("caught", infix("+", id("caught"), int(1))))],
            )),
            None,
        )],
    ));
    statements.push(expr(id("caught")));
    bench_program(c, "vm_try_catch_500", statements);
}

// ============================================================================
// Concurrency Benchmarks
// ============================================================================

fn bench_channel_round_trip(c: &mut Criterion) {
    let mut statements = vec![
        let_("ch", channel(Some(int(16)))),
        let_(
            "produce",
            func(
                &["out"],
                vec![
                    let_("k", int(0)),
                    while_(
                        infix("<", id("k"), int(200)),
                        vec![
                            expr(send(id("out"), id("k"))),
                            expr(assign("k", infix("+", id("k"), int(1)))),
                        ],
                    ),
                    expr(call(id("close"), vec![id("out")])),
                ],
            ),
        ),
        expr(spawn(id("produce"), vec![id("ch")])),
        let_("sum", int(0)),
        let_("v", recv(id("ch"))),
    ];
    statements.push(while_(
        infix("!=", id("v"), null()),
        vec![
            expr(assign("sum", infix("+", id("sum"), id("v")))),
            expr(assign("v", recv(id("ch")))),
        ],
    ));
    statements.push(expr(id("sum")));
    bench_program(c, "vm_channel_round_trip_200", statements);
}

// ============================================================================
// Compile Benchmarks
// ============================================================================

fn bench_compile_and_run(c: &mut Criterion) {
    let tree = program(vec![fib(), expr(call(id("fib"), vec![int(10)]))]);
    c.bench_function("runtime_compile_and_run_fib10", |b| {
        b.iter(|| {
            let mut runtime = Runtime::new();
            black_box(runtime.run(black_box(&tree)).expect("run failed"))
        })
    });
}

criterion_group!(
    arithmetic_benches,
    bench_arithmetic_add,
    bench_arithmetic_float,
);

criterion_group!(
    function_benches,
    bench_function_calls,
    bench_recursive_fib,
    bench_closure_counter,
);

criterion_group!(
    collection_benches,
    bench_array_push_index,
    bench_ordered_map_writes,
);

criterion_group!(object_benches, bench_method_dispatch, bench_try_catch,);

criterion_group!(concurrency_benches, bench_channel_round_trip,);

criterion_group!(compile_benches, bench_compile_and_run,);

criterion_main!(
    arithmetic_benches,
    function_benches,
    collection_benches,
    object_benches,
    concurrency_benches,
    compile_benches,
);
