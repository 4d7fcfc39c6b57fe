//! Benchmarks for chunk building.

use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use akh_ebc::causal::{CausalGraph, InstantiationId, InstantiationSpec, PreferenceSpec};
use akh_ebc::chunker::Chunker;
use akh_ebc::config::ChunkerConfig;
use akh_ebc::registry::SymbolTable;
use akh_ebc::rete::MemoryRuleNetwork;

struct World {
    graph: CausalGraph,
    network: MemoryRuleNetwork,
    chunker: Chunker,
    inst: InstantiationId,
}

/// A substate firing over `width` superstate elements, reached through a
/// chain of `depth` local copies.
fn world(width: usize, depth: usize) -> World {
    let symbols = Arc::new(SymbolTable::new());
    let mut graph = CausalGraph::new(Arc::clone(&symbols));
    let network = MemoryRuleNetwork::new(Arc::clone(&symbols));
    let chunker = Chunker::new(ChunkerConfig::default(), Arc::clone(&symbols)).unwrap();

    let s1 = graph.add_goal().unwrap();
    let s2 = graph.add_goal().unwrap();
    let item = symbols.str_constant("item").unwrap();
    let done = symbols.str_constant("done").unwrap();

    let mut spec = InstantiationSpec::new("sum", s2);
    for i in 0..width {
        let obj = graph.add_identifier('O', 1).unwrap();
        let value = symbols.int_constant(i as i64).unwrap();
        let w_item = graph.add_wme(s1, item, obj, None).unwrap();
        let w_val = graph.add_wme(obj, item, value, None).unwrap();

        // Copy the value down into the substate `depth` times.
        let mut cond = graph.condition_for_wme(w_val).unwrap();
        for _ in 0..depth {
            let step = graph
                .add_instantiation(
                    InstantiationSpec::new("copy", s2)
                        .condition(graph.condition_for_wme(w_item).unwrap())
                        .condition(cond),
                )
                .unwrap();
            let pref = graph
                .add_preference(step, PreferenceSpec::acceptable(s2, item, value))
                .unwrap();
            let w = graph.add_wme_for_preference(pref).unwrap();
            cond = graph.condition_for_wme(w).unwrap();
        }
        spec = spec.condition(cond);
    }
    let inst = graph.add_instantiation(spec).unwrap();
    graph
        .add_preference(inst, PreferenceSpec::acceptable(s1, done, done))
        .unwrap();

    World {
        graph,
        network,
        chunker,
        inst,
    }
}

fn bench_chunk_build(c: &mut Criterion) {
    for (width, depth) in [(4, 1), (16, 4), (64, 8)] {
        c.bench_function(&format!("chunk_build_{width}x{depth}"), |bench| {
            bench.iter_batched(
                || world(width, depth),
                |mut w| {
                    black_box(
                        w.chunker
                            .attempt_chunk(&mut w.graph, &mut w.network, w.inst)
                            .unwrap(),
                    );
                    w
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_chunk_build);
criterion_main!(benches);
