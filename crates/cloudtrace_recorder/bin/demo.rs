//! # Cloud Trace Recorder Demo
//!
//! Generates random spans from several producer tasks and records them
//! through a [`Recorder`].
//!
//! By default bundles go to a [`JsonFileSink`] so the demo runs offline; each
//! upload appends one `patchTraces` request body per line.
//! With `--live`, traces are uploaded to Cloud Trace using
//! `GOOGLE_CLOUD_PROJECT` and the service-account key file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`.
//!
//! ## Running
//!
//! ```bash
//! # Offline, writes cloudtrace-demo.json
//! cargo run -p cloudtrace_recorder --bin cloudtrace-demo -- --quick
//!
//! # Upload to Cloud Trace
//! GOOGLE_CLOUD_PROJECT=my-project \
//! GOOGLE_APPLICATION_CREDENTIALS=key.json \
//!     cargo run -p cloudtrace_recorder --bin cloudtrace-demo -- --live
//!
//! # Debug logging from the recorder
//! RUST_LOG=cloudtrace_recorder=debug cargo run -p cloudtrace_recorder --bin cloudtrace-demo
//! ```

use anyhow::Context;
use chrono::Utc;
use cloudtrace_recorder::span::tags;
use cloudtrace_recorder::{
    JsonFileSink, LogField, RawSpan, Recorder, RecorderConfig, RecorderMetrics, SpanRecorder,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const OUTPUT_PATH: &str = "cloudtrace-demo.json";

const OPERATIONS: &[(&str, &str, &str)] = &[
    ("GET", "/api/users", tags::SPAN_KIND_RPC_SERVER),
    ("POST", "/api/orders", tags::SPAN_KIND_RPC_SERVER),
    ("GET", "/api/inventory", tags::SPAN_KIND_RPC_CLIENT),
    ("PUT", "/api/cart", tags::SPAN_KIND_RPC_SERVER),
    ("GET", "/healthz", tags::SPAN_KIND_RPC_CLIENT),
];

const HOSTS: &[&str] = &["users.internal", "orders.internal", "inventory.internal"];

#[derive(Debug, Default)]
struct ProducerStats {
    spans: u64,
    unsampled: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let live = args.iter().any(|a| a == "--live");
    let quick = args.iter().any(|a| a == "--quick");

    let (num_producers, spans_per_producer) = if quick { (4, 250) } else { (8, 2_000) };

    println!("Cloud Trace Recorder Demo");
    println!("   Mode: {}", if live { "live (Cloud Trace)" } else { "offline (json file)" });
    println!("   Producers: {}", num_producers);
    println!("   Spans per producer: {}", spans_per_producer);
    println!();

    let recorder = if live {
        let config = RecorderConfig::from_env()
            .context("reading GOOGLE_CLOUD_PROJECT / GOOGLE_APPLICATION_CREDENTIALS")?;
        Recorder::cloud_trace(config).context("building Cloud Trace recorder")?
    } else {
        let sink = JsonFileSink::create(OUTPUT_PATH)
            .with_context(|| format!("creating {OUTPUT_PATH}"))?;
        Recorder::new(RecorderConfig::new("demo-project"), sink).context("building recorder")?
    };
    let recorder = Arc::new(recorder);

    let start = Instant::now();
    let mut producers = Vec::with_capacity(num_producers);
    for producer_id in 0..num_producers {
        let recorder = Arc::clone(&recorder);
        producers.push(tokio::spawn(async move {
            run_producer(producer_id as u64, spans_per_producer, recorder).await
        }));
    }

    let mut totals = ProducerStats::default();
    for (id, handle) in producers.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => {
                totals.spans += stats.spans;
                totals.unsampled += stats.unsampled;
            }
            Err(e) => tracing::error!(producer = id, error = %e, "producer panicked"),
        }
    }
    let generation_time = start.elapsed();

    let recorder = Arc::try_unwrap(recorder)
        .map_err(|_| anyhow::anyhow!("recorder is still shared after producers finished"))?;
    print_metrics(recorder.metrics(), &totals, generation_time);

    recorder.shutdown().await;
    println!("   Shutdown complete in {:.2?}", start.elapsed());
    if !live {
        println!("   Bundles appended to {}", OUTPUT_PATH);
    }
    Ok(())
}

async fn run_producer(producer_id: u64, count: u64, recorder: Arc<Recorder>) -> ProducerStats {
    let mut stats = ProducerStats::default();
    for seq in 0..count {
        let span = random_span(producer_id, seq);
        if !span.context.sampled {
            stats.unsampled += 1;
        }
        recorder.record_span(&span);
        stats.spans += 1;

        if seq % 100 == 99 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    stats
}

fn random_span(producer_id: u64, seq: u64) -> RawSpan {
    let mut rng = rand::thread_rng();
    let (method, path, kind) = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let trace_id = rng.r#gen::<u64>() | 1;
    let span_id = (producer_id << 48) | (seq + 1);
    let parent = if rng.gen_bool(0.8) { rng.r#gen::<u64>() } else { 0 };
    let status: u16 = if rng.gen_bool(0.1) { 500 } else { 200 };

    let mut span = RawSpan::new(trace_id, span_id, parent, format!("{method} {path}"))
        .with_duration(Duration::from_micros(rng.gen_range(100..250_000)))
        .with_sampled(rng.gen_bool(0.9))
        .with_tag(tags::SPAN_KIND, kind)
        .with_tag(tags::HTTP_METHOD, method)
        .with_tag(tags::HTTP_URL, format!("https://{}{}", HOSTS[0], path))
        .with_tag(tags::HTTP_STATUS_CODE, status)
        .with_tag(tags::PEER_HOSTNAME, HOSTS[rng.gen_range(0..HOSTS.len())])
        .with_tag("producer", producer_id);

    if status >= 500 {
        span.log(
            Utc::now(),
            vec![
                LogField::new("event", "error"),
                LogField::new("message", "upstream returned 500"),
            ],
        );
    }
    span
}

fn print_metrics(metrics: &RecorderMetrics, totals: &ProducerStats, elapsed: Duration) {
    println!("Results");
    println!("   Spans generated:      {:>10}", totals.spans);
    println!("   Unsampled (skipped):  {:>10}", totals.unsampled);
    println!("   Spans recorded:       {:>10}", metrics.spans_recorded());
    println!("   Records enqueued:     {:>10}", metrics.records_enqueued());
    println!("   Overflows:            {:>10}", metrics.overflows());
    println!("   Bundles flushed:      {:>10}", metrics.bundles_flushed());
    println!("   Traces uploaded:      {:>10}", metrics.traces_uploaded());
    println!("   Upload errors:        {:>10}", metrics.upload_errors());
    let rate = totals.spans as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("   Spans/second:         {:>10.0}", rate);
    println!();
}
