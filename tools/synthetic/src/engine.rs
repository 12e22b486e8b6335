use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::config::{SyntheticConfig, Transport};
use crate::protocols::{Protocol, SCRATCH_LEN};
use crate::report::{LatencySummary, LoadTestReport, StepReport};
use crate::schedule::{Packet, StepPlan, gen_schedule, ramp_steps};
use crate::transport::{Connection, RecvHalf, SendHalf, TransportError};

/// packets later than this behind their target start are skipped
pub const MAX_SEND_LAG: Duration = Duration::from_millis(5);
/// how long receivers keep waiting after the last scheduled send
pub const RECV_GRACE: Duration = Duration::from_millis(500);
/// lead time so every thread starts from the same instant
const START_DELAY: Duration = Duration::from_millis(10);
/// below this distance to a send target the sender yields instead of sleeping
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

pub async fn run(config: SyntheticConfig) -> Result<LoadTestReport> {
    let protocol = Protocol::new(config.protocol, config.workload);
    let plans = ramp_steps(config.start_mpps, config.mpps, config.samples);
    info!(
        addr = %config.addr,
        threads = config.threads,
        protocol = ?protocol.kind(),
        transport = ?config.transport,
        distribution = config.distribution.name(),
        samples = plans.len(),
        "starting runtime client"
    );
    if let Some(path) = &config.config_path {
        debug!(?path, "client config path recorded, not parsed");
    }

    let mut steps = Vec::with_capacity(plans.len());
    for plan in plans {
        let step = run_step(&config, &protocol, plan)
            .await
            .with_context(|| format!("sample {} at {} mpps failed", plan.step, plan.target_mpps))?;
        info!(
            step = step.step,
            target_pps = step.target_pps,
            achieved_pps = step.achieved_pps,
            dropped = step.dropped,
            never_sent = step.never_sent,
            p99_us = ?step.latency.p99_us,
            "sample complete"
        );
        steps.push(step);
    }

    Ok(LoadTestReport::new(&config, steps))
}

#[derive(Debug)]
struct ThreadResult {
    packets: Vec<Packet>,
    /// nanoseconds since the step start, per packet index
    sent_at: Vec<Option<u64>>,
    received_at: Vec<Option<u64>>,
    errors: usize,
}

async fn run_step(config: &SyntheticConfig, protocol: &Protocol, plan: StepPlan) -> Result<StepReport> {
    let per_thread_pps = plan.target_pps() / config.threads as f64;
    let runtime = config.runtime();
    let started_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let mut connections = Vec::with_capacity(config.threads);
    for thread in 0..config.threads {
        let conn = Connection::connect(config.addr, config.transport)
            .await
            .with_context(|| format!("thread {thread} failed to connect to {}", config.addr))?;
        connections.push(conn);
    }

    debug!(
        per_thread = (per_thread_pps * runtime.as_secs_f64()) as u64,
        threads = config.threads,
        "generating schedules"
    );
    let schedules = build_schedules(config, plan, per_thread_pps).await?;

    // the clock starts only once every schedule is in memory
    let start = Instant::now() + START_DELAY;
    let deadline = start + runtime + RECV_GRACE;

    let mut tasks = JoinSet::new();
    for (conn, (rng, packets)) in connections.into_iter().zip(schedules) {
        let protocol = protocol.clone();
        let transport = config.transport;
        tasks.spawn(async move {
            run_thread(conn, packets, protocol, transport, rng, start, deadline).await
        });
    }

    let mut results = Vec::with_capacity(config.threads);
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.context("worker task join failed")?);
    }

    Ok(summarize(config, plan, &results, started_unix_ms))
}

async fn build_schedules(
    config: &SyntheticConfig,
    plan: StepPlan,
    per_thread_pps: f64,
) -> Result<Vec<(StdRng, Vec<Packet>)>> {
    let threads = config.threads;
    let seed = config.seed;
    let runtime = config.runtime();
    let distribution = config.distribution;
    tokio::task::spawn_blocking(move || {
        (0..threads)
            .map(|thread| {
                let mut rng = StdRng::seed_from_u64(thread_seed(seed, plan.step, thread));
                let packets = gen_schedule(per_thread_pps, runtime, &distribution, &mut rng);
                debug!(thread, scheduled = packets.len(), "schedule generated");
                (rng, packets)
            })
            .collect()
    })
    .await
    .context("schedule generation failed")
}

fn thread_seed(seed: u64, step: usize, thread: usize) -> u64 {
    seed ^ ((step as u64) << 32) ^ thread as u64
}

async fn run_thread(
    conn: Connection,
    packets: Vec<Packet>,
    protocol: Protocol,
    transport: Transport,
    mut rng: StdRng,
    start: Instant,
    deadline: Instant,
) -> ThreadResult {
    let Connection { mut tx, rx } = conn;
    let (done_tx, done_rx) = oneshot::channel();

    let receiver = tokio::spawn(receive_loop(
        rx,
        protocol.clone(),
        packets.len(),
        start,
        deadline,
        done_rx,
    ));

    let mut sent_at = vec![None; packets.len()];
    let mut errors = 0;
    let mut buf = Vec::with_capacity(SCRATCH_LEN);
    for packet in &packets {
        let target = start + Duration::from_nanos(packet.target_start);
        if Instant::now().saturating_duration_since(target) > MAX_SEND_LAG {
            continue;
        }
        wait_until(target).await;

        buf.clear();
        protocol.gen_request(packet, transport, &mut rng, &mut buf);
        let sent_ns = elapsed_ns(start);
        match tx.send(&buf).await {
            Ok(()) => sent_at[packet.index as usize] = Some(sent_ns),
            Err(err) => {
                errors += 1;
                debug!(?err, index = packet.index, "send failed");
            }
        }
    }
    let sent = sent_at.iter().filter(|t| t.is_some()).count();
    let _ = done_tx.send(sent);
    finish_sending(&mut tx).await;

    let (received_at, recv_errors) = match receiver.await {
        Ok(value) => value,
        Err(err) => {
            warn!(?err, "receiver task failed");
            (vec![None; packets.len()], 1)
        }
    };

    ThreadResult {
        packets,
        sent_at,
        received_at,
        errors: errors + recv_errors,
    }
}

/// Timers only fire at millisecond granularity, so the last stretch before
/// `target` is spent yielding instead.
async fn wait_until(target: Instant) {
    if let Some(early) = target.checked_sub(SPIN_THRESHOLD) {
        if Instant::now() < early {
            sleep_until(early).await;
        }
    }
    while Instant::now() < target {
        tokio::task::yield_now().await;
    }
}

async fn finish_sending(tx: &mut SendHalf) {
    // a closed write half lets a TCP server drain and hang up, which ends
    // the receiver with Eof
    if let Err(err) = tx.shutdown().await {
        debug!(?err, "shutdown failed");
    }
}

async fn receive_loop(
    mut rx: RecvHalf,
    protocol: Protocol,
    scheduled: usize,
    start: Instant,
    deadline: Instant,
    mut done: oneshot::Receiver<usize>,
) -> (Vec<Option<u64>>, usize) {
    let mut received_at = vec![None; scheduled];
    let mut scratch = vec![0u8; SCRATCH_LEN];
    let mut received = 0usize;
    let mut errors = 0usize;
    let mut expected = scheduled;
    let mut sender_done = false;
    // udp reads are cancel safe, stream reads are not
    let watch_sender = rx.transport() == Transport::Udp;

    while received < expected {
        tokio::select! {
            res = timeout_at(deadline, protocol.read_response(&mut rx, &mut scratch)) => match res {
                Err(_) => break,
                Ok(Ok(index)) => match received_at.get_mut(index as usize) {
                    Some(slot) if slot.is_none() => {
                        *slot = Some(elapsed_ns(start));
                        received += 1;
                    }
                    Some(_) => debug!(index, "duplicate response"),
                    None => {
                        errors += 1;
                        debug!(index, "response for unknown index");
                    }
                },
                Ok(Err(TransportError::Eof)) => break,
                Ok(Err(err)) => {
                    errors += 1;
                    debug!(?err, "bad response");
                    if !watch_sender {
                        // stream framing is lost
                        break;
                    }
                }
            },
            sent = &mut done, if watch_sender && !sender_done => {
                sender_done = true;
                expected = sent.unwrap_or(scheduled);
            }
        }
    }

    (received_at, errors)
}

fn elapsed_ns(start: Instant) -> u64 {
    Instant::now()
        .saturating_duration_since(start)
        .as_nanos()
        .min(u64::MAX as u128) as u64
}

fn summarize(
    config: &SyntheticConfig,
    plan: StepPlan,
    results: &[ThreadResult],
    started_unix_ms: u128,
) -> StepReport {
    let mut scheduled = 0;
    let mut sent = 0;
    let mut received = 0;
    let mut errors = 0;
    let mut latencies = Vec::new();

    for result in results {
        errors += result.errors;
        for packet in &result.packets {
            // warm-up traffic is sent but not measured
            if packet.target_start < config.rampup_ns {
                continue;
            }
            let index = packet.index as usize;
            scheduled += 1;
            let Some(sent_ns) = result.sent_at[index] else {
                continue;
            };
            sent += 1;
            if let Some(recv_ns) = result.received_at[index] {
                received += 1;
                latencies.push(recv_ns.saturating_sub(sent_ns));
            }
        }
    }
    latencies.sort_unstable();

    let measured_secs = config
        .runtime()
        .saturating_sub(config.rampup())
        .as_secs_f64()
        .max(1e-9);

    StepReport {
        step: plan.step,
        target_mpps: plan.target_mpps,
        target_pps: plan.target_pps(),
        achieved_pps: received as f64 / measured_secs,
        scheduled,
        sent,
        received,
        dropped: sent - received,
        never_sent: scheduled - sent,
        errors,
        latency: LatencySummary::from_sorted(&latencies),
        started_unix_ms,
    }
}
