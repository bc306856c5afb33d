use std::{
    io::{BufRead as _, BufReader},
    net::TcpListener,
    thread,
    time::Duration,
};

use metrics_exporter_collector::CollectorBuilder;
use rand::Rng as _;

fn main() {
    tracing_subscriber::fmt::init();

    // Stand in for the collector: print every line received.
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind local collector");
    let addr = listener.local_addr().expect("failed to get local collector address");
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                println!("collector <- {line}");
            }
        }
    });

    let mut exporter = CollectorBuilder::default()
        .with_remote_address(addr.to_string())
        .expect("failed to parse remote address")
        .with_service("demo")
        .with_host("localhost")
        .with_export_interval(Duration::from_secs(1))
        .with_telemetry(false)
        .build()
        .expect("failed to build exporter");

    let loops = exporter.counter("server_loops", 60).expect("failed to register counter");
    let lucky = exporter.gauge("lucky_iterations", 60).expect("failed to register gauge");
    let delta = exporter
        .histogram("server_loop_delta_secs", 60, &[0.25, 0.5, 0.75])
        .expect("failed to register histogram");

    let handle = exporter.start().expect("failed to start exporter");

    let loops = loops.with(&["system", "foo"]);
    let mut rng = rand::rng();

    // Pretend to do some work for a few export intervals.
    for _ in 0..50 {
        loops.add(1.0);
        delta.with(&["system", "foo"]).observe(rng.random_range(0.0..1.0));
        if rng.random_bool(0.75) {
            lucky.add(1.0);
        }

        thread::sleep(Duration::from_millis(100));
    }

    handle.shutdown().expect("exporter stopped with an error");
}
