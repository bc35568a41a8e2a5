use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const DAY: i64 = 86_400_000; // 1 day in ms

async fn connect(host: &str, port: u16, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("custody")
        .password("custody");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Fresh tenant name so phases don't interfere.
fn tenant() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn register(client: &Client, table: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO {table} (id) VALUES ('{id}')"))
        .await
        .unwrap();
    id
}

fn insert_sql(resource: Ulid, assignee: Ulid, from: i64, until: i64) -> String {
    format!(
        "INSERT INTO assignments (resource_id, assignee_id, valid_from, valid_until) \
         VALUES ('{resource}', '{assignee}', {from}, {until})"
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &tenant()).await;
    let item = register(&client, "items").await;
    let person = register(&client, "persons").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let from = (i as i64) * DAY;
        let t = Instant::now();
        client
            .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} assignments in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;
    let db = tenant();

    let setup = connect(host, port, &db).await;
    let person = register(&setup, "persons").await;
    let mut items = Vec::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        items.push(register(&setup, "items").await);
    }
    drop(setup);

    let start = Instant::now();
    let mut handles = Vec::new();

    // One resource per task: lanes never contend.
    for item in items {
        let host = host.to_string();
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            for j in 0..n_per_task {
                let from = (j as i64) * DAY;
                client
                    .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} assignments = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended(host: &str, port: u16) {
    let n_tasks = 10;
    let slots = 500i64;
    let db = tenant();

    let setup = connect(host, port, &db).await;
    let item = register(&setup, "items").await;
    let person = register(&setup, "persons").await;
    drop(setup);

    let created = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    // Every task races for the same day slots on one resource.
    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let created = created.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            for slot in 0..slots {
                let from = slot * DAY;
                match client
                    .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
                    .await
                {
                    Ok(()) => created.fetch_add(1, Ordering::Relaxed),
                    Err(_) => conflicts.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let created = created.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks racing for {slots} slots: {created} created, {} rejected in {:.2}s",
        conflicts.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    assert_eq!(created as i64, slots, "each slot must be granted exactly once");
}

async fn phase4_read_under_load(host: &str, port: u16) {
    let db = tenant();
    let setup = connect(host, port, &db).await;
    let person = register(&setup, "persons").await;
    let mut items = Vec::new();
    for _ in 0..20 {
        let item = register(&setup, "items").await;
        for i in 0..25 {
            let from = (i as i64) * DAY;
            setup
                .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
                .await
                .unwrap();
        }
        items.push(item);
    }
    drop(setup);

    // Writers keep appending to their own resources in the same tenant.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let item = register(&client, "items").await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let from = i * DAY;
                let _ = client
                    .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        let item = items[r % items.len()];
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let sql = if i % 2 == 0 {
                    format!("SELECT * FROM assignments WHERE resource_id = '{item}'")
                } else {
                    format!("SELECT * FROM holdings WHERE assignee_id = '{person}'")
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("history/holdings query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant()).await;
            let item = register(&client, "items").await;
            let person = register(&client, "persons").await;

            for i in 0..ops_per_conn {
                let from = (i as i64) * DAY;
                client
                    .batch_execute(&insert_sql(item, person, from, from + DAY - 1))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CUSTODY_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CUSTODY_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CUSTODY_PORT");

    println!("=== custody stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent writes, one resource per task");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] contended writes on a single resource");
    phase3_contended(&host, port).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
