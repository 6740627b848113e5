use criterion::{Criterion, criterion_group, criterion_main};
use lume_core::chunk::{ChunkImage, ConstImage, ProtoImage, UpvalImage, decode_chunk, encode_chunk};
use lume_core::{Runtime, Value};
use std::hint::black_box;

fn table_bench(c: &mut Criterion) {
    c.bench_function("table_set_get_int", |b| {
        let mut rt = Runtime::new().unwrap();
        let t = rt.new_table().unwrap();
        let g = rt.globals();
        rt.table_set_str(g, "t", Value::Table(t)).unwrap();
        b.iter(|| {
            for i in 1..=1_000 {
                rt.table_set_int(t, i, Value::integer(i)).unwrap();
            }
            let mut sum = 0;
            for i in 1..=1_000 {
                sum += rt.table_get_int(t, i).as_integer().unwrap_or(0);
            }
            black_box(sum)
        })
    });

    c.bench_function("table_string_keys", |b| {
        let mut rt = Runtime::new().unwrap();
        let keys: Vec<String> = (0..256).map(|i| format!("field_{i}")).collect();
        b.iter(|| {
            let t = rt.new_table().unwrap();
            let th = rt.main_thread();
            rt.push(th, Value::Table(t)).unwrap();
            for (i, k) in keys.iter().enumerate() {
                rt.table_set_str(t, k, Value::integer(i as i64)).unwrap();
            }
            rt.pop(th, 1);
            black_box(rt.table_len(t))
        })
    });
}

fn intern_bench(c: &mut Criterion) {
    c.bench_function("intern_existing", |b| {
        let mut rt = Runtime::new().unwrap();
        b.iter(|| black_box(rt.new_string(b"function").unwrap()))
    });

    c.bench_function("intern_fresh", |b| {
        let mut rt = Runtime::new().unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(rt.new_string(format!("s{n}").as_bytes()).unwrap())
        })
    });
}

fn gc_bench(c: &mut Criterion) {
    c.bench_function("full_gc_10k_live", |b| {
        let mut rt = Runtime::new().unwrap();
        let keep = rt.new_table().unwrap();
        let g = rt.globals();
        rt.table_set_str(g, "keep", Value::Table(keep)).unwrap();
        for i in 1..=10_000 {
            let t = rt.new_table().unwrap();
            rt.table_set_int(keep, i, Value::Table(t)).unwrap();
        }
        b.iter(|| rt.full_gc().unwrap())
    });

    c.bench_function("alloc_garbage_incremental", |b| {
        let mut rt = Runtime::new().unwrap();
        b.iter(|| {
            for _ in 0..1_000 {
                black_box(rt.new_table().unwrap());
            }
        })
    });
}

fn chunk_bench(c: &mut Criterion) {
    let main = ProtoImage {
        source: Some(b"@bench.lua".to_vec()),
        max_stack_size: 8,
        code: vec![0x0080_0026; 512],
        constants: (0..128)
            .map(|i| {
                if i % 2 == 0 {
                    ConstImage::Integer(i)
                } else {
                    ConstImage::Str(format!("name{i}").into_bytes())
                }
            })
            .collect(),
        upvalues: vec![UpvalImage {
            name: Some(b"_ENV".to_vec()),
            in_stack: true,
            index: 0,
        }],
        line_info: (0..512).collect(),
        ..ProtoImage::default()
    };
    let image = ChunkImage { num_upvalues: 1, main };
    let bytes = encode_chunk(&image, false).unwrap();

    c.bench_function("chunk_encode", |b| b.iter(|| black_box(encode_chunk(&image, false).unwrap())));
    c.bench_function("chunk_decode", |b| b.iter(|| black_box(decode_chunk(&bytes).unwrap())));
    c.bench_function("chunk_undump", |b| {
        let mut rt = Runtime::new().unwrap();
        let th = rt.main_thread();
        b.iter(|| {
            let top = rt.stack_top(th);
            black_box(rt.undump(th, &bytes, "=bench").unwrap());
            rt.set_top(th, top).unwrap();
        })
    });
}

criterion_group!(benches, table_bench, intern_bench, gc_bench, chunk_bench);
criterion_main!(benches);
