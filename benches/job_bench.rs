// Benchmark for job parsing and virtual streaming throughput
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use plotter_rs::gcode::InstructionContext;
use plotter_rs::job::Job;
use plotter_rs::streaming::{EngineOptions, StreamingEngine};
use plotter_rs::{PlotterSettings, Tool, ToolRegistry};

fn drawing(lines: usize) -> String {
    let mut gcode = String::new();
    for i in 0..lines {
        let x = (i % 400) as f64 * 0.5;
        let y = (i / 400) as f64 * 0.5;
        gcode.push_str(&format!("G1 X{:.3} Y{:.3}\n", x, y));
    }
    gcode
}

fn bench_job_parse(c: &mut Criterion) {
    let gcode = drawing(10_000);
    let settings = PlotterSettings::default();
    let tools = ToolRegistry::new();
    let ctx = InstructionContext::new(&settings, &tools);
    c.bench_function("parse 10k G1 lines", |b| {
        b.iter(|| {
            let job = Job::parse(&gcode, &Tool::None, false, &ctx);
            assert_eq!(job.len(), 10_000);
        });
    });
}

fn bench_virtual_stream(c: &mut Criterion) {
    let gcode = drawing(1_000);
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("stream 1k lines to virtual plotter", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (mut engine, _events) =
                    StreamingEngine::with_channel(PlotterSettings::default(), ToolRegistry::new(), EngineOptions::default());
                engine.connect_virtual().unwrap();
                engine.set_initially_loaded_tool(Tool::None).unwrap();
                let job = Job::parse(&gcode, engine.loaded_tool(), false, &engine.context());
                engine.start_job(job).unwrap();
                while engine.active_job().is_some() {
                    engine.step().await;
                }
            });
        });
    });
}

criterion_group!(benches, bench_job_parse, bench_virtual_stream);
criterion_main!(benches);
