//! dring End-to-End Smoke Test
//!
//! Drives the full stack against the simulated device:
//!   Part A: queue discovery and setup
//!   Part B: FEC decode data path (device thread, interrupts, policies)
//!   Part C: command queue batches over a byte-offset ring
//!   Part D: stop/flush, hung flush, release
//!   Part E: context registry
//!
//! Run: ./target/release/dring-smoke
//! Log level: DRING_LOG=debug ./target/release/dring-smoke

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dring_core::regs::RegisterIo;
use dring_core::request::{status, Completion, RequestRef};
use dring_core::RingError;
use dring_module::batch::BatchCoordinator;
use dring_module::command::{AesMode, CipherOp, CommandPayload};
use dring_module::control::{layout, QueueControl, QueueHandle, QueueKind};
use dring_module::fec::{BufferRef, DecodeOp, DecodePayload};
use dring_module::{
    ContextRegistry, DescriptorRing, Doorbell, EventFdNotifier, HeapRegisters, MismatchPolicy,
    RingConfig,
};
use dring_sim::{HeadReport, SimDevice};
use tracing_subscriber::EnvFilter;

const QUEUES: usize = 8;
const BOUND: &[usize] = &[0, 1, 2, 4, 5, 6];

type Regs = Arc<HeapRegisters>;
type DecodeRing = DescriptorRing<DecodePayload, Regs>;

// ── Check runner ──

/// Numbered pass/fail checks grouped by smoke part. Check ids read
/// `A.1`, `A.2`, ..., restarting in each part.
struct TestRunner {
    part: char,
    in_part: usize,
    passed: usize,
    failed: Vec<String>,
}

const RULE: &str = "════════════════════════════════════════════════════════════";

impl TestRunner {
    fn new() -> Self {
        Self { part: '-', in_part: 0, passed: 0, failed: Vec::new() }
    }

    fn part(&mut self, part: char, title: &str) {
        self.part = part;
        self.in_part = 0;
        println!("\n{}\n  Part {}: {}\n{}", RULE, part, title, RULE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.in_part += 1;
        let id = format!("{}.{}", self.part, self.in_part);
        if ok {
            self.passed += 1;
            println!("  {:<5} ok    {}", id, name);
        } else {
            println!("  {:<5} FAIL  {} ({})", id, name, reason);
            self.failed.push(id);
        }
    }

    fn pass(&mut self, name: &str) {
        self.check(name, true, "");
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.check(name, false, reason);
    }

    fn failed(&self) -> bool {
        !self.failed.is_empty()
    }

    fn summary(&self) {
        println!("\n{}", RULE);
        println!("  {} passed, {} failed", self.passed, self.failed.len());
        if self.failed() {
            println!("  failed checks: {}", self.failed.join(" "));
        }
        println!("{}", RULE);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DRING_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Register file of a device with the `BOUND` queues mapped to us.
fn device_registers(map_done: bool) -> Regs {
    let regs = Arc::new(HeapRegisters::new(layout::register_file_size(QUEUES)));
    regs.write_u32(layout::QUEUE_MAP_DONE, map_done as u32);
    for q in 0..QUEUES {
        let value = if BOUND.contains(&q) { q as u32 } else { layout::INVALID_QUEUE };
        regs.write_u32(layout::queue_map(q), value);
    }
    regs
}

fn decode_op(id: u64) -> DecodeOp {
    DecodeOp::new(
        RequestRef(id),
        BufferRef::new(0x10_0000 + id * 0x400, 0x400),
        BufferRef::new(0x80_0000 + id * 0x100, 0x100),
        0x400,
    )
    .with_crc24b()
}

/// A device that decodes everything cleanly in two iterations.
fn clean_decoder(view: dring_module::DeviceView<DecodePayload>, regs: &Regs, queue: &QueueHandle) -> SimDevice<DecodePayload, Regs> {
    SimDevice::for_queue(view, Arc::clone(regs), queue).with_handler(|slot| {
        slot.payload.iter = 1;
        slot.payload.crc_pass = 1;
        slot.payload.et_pass = 1;
    })
}

/// Poll `ring` until `want` completions arrived or `timeout` expired.
fn drain(ring: &mut DecodeRing, want: usize, timeout: Duration) -> Vec<Completion> {
    let mut out = Vec::with_capacity(want);
    let deadline = Instant::now() + timeout;
    while out.len() < want && Instant::now() < deadline {
        let room = want - out.len();
        if ring.dequeue_into(&mut out, room) == 0 {
            std::thread::yield_now();
        }
    }
    out
}

// ════════════════════════════════════════════════════════════
// Part A: Queue discovery and setup
// ════════════════════════════════════════════════════════════

fn test_setup(
    t: &mut TestRunner,
    regs: &Regs,
    config: &RingConfig,
) -> Option<(QueueControl<Regs>, DecodeRing, QueueHandle)> {
    t.part('A', "Queue discovery and setup");

    // A1: queue map not programmed
    let err = QueueControl::discover(device_registers(false), QUEUES, config).err();
    t.check("discover before map done -> QueueMapNotReady",
        err == Some(RingError::QueueMapNotReady), &format!("{:?}", err));

    // A2: discover
    let ctl = match QueueControl::discover(Arc::clone(regs), QUEUES, config) {
        Ok(ctl) => { t.pass("discover"); ctl }
        Err(e) => {
            t.fail("discover", &e.to_string());
            return None;
        }
    };
    t.check(&format!("bound queues = {}", BOUND.len()), ctl.bound_queues() == BOUND.len(),
        &format!("got {}", ctl.bound_queues()));

    // A3: invalid size releases the queue again
    let err = ctl.setup(QueueKind::Decode, 100, 0, 0).err();
    t.check("setup size 100 -> InvalidSize",
        err == Some(RingError::InvalidSize(100)) && ctl.assigned_queues() == 0,
        &format!("{:?}, assigned {}", err, ctl.assigned_queues()));

    // A4: ring + queue
    let mut ring = match DecodeRing::new(config, Arc::clone(regs), Doorbell::Index { offset: 0 }) {
        Ok(ring) => ring,
        Err(e) => {
            t.fail("create decode ring", &e.to_string());
            return None;
        }
    };
    t.check(&format!("ring capacity {}", ring.capacity()), ring.capacity() == 64,
        "expected 64");

    let queue = match ctl.setup_ring(QueueKind::Decode, &mut ring, 0) {
        Ok(q) => { t.pass(&format!("setup decode queue -> q{}", q.index())); q }
        Err(e) => {
            t.fail("setup decode queue", &e.to_string());
            return None;
        }
    };
    t.check("decode queue from lower half", (queue.index() as usize) < QUEUES / 2,
        &format!("q{}", queue.index()));
    t.check("ring doorbell = queue shadow tail", ring.doorbell() == queue.doorbell(),
        &format!("{:?}", ring.doorbell()));

    // A5: start
    let started = ctl.start(&queue, &mut ring);
    t.check("start", started.is_ok() && ctl.is_enabled(&queue), &format!("{:?}", started));

    Some((ctl, ring, queue))
}

// ════════════════════════════════════════════════════════════
// Part B: FEC decode data path
// ════════════════════════════════════════════════════════════

fn test_decode_path(
    t: &mut TestRunner,
    ctl: &QueueControl<Regs>,
    ring: &mut DecodeRing,
    queue: &QueueHandle,
    regs: &Regs,
) {
    t.part('B', "FEC decode data path");

    let notifier = match EventFdNotifier::create() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            t.fail("eventfd notifier", &e.to_string());
            return;
        }
    };
    let _ = ctl.set_interrupts(queue, ring.producer(), true);

    // B1: stream through a device thread
    const TOTAL: u64 = 500;
    let sim = SimDevice::for_queue(ring.device_view(), Arc::clone(regs), queue)
        .with_notifier(notifier.clone())
        .with_handler(|slot| {
            let id = slot.request_ref.0;
            slot.payload.iter = (id % 4) as u8;
            slot.payload.crc_pass = (id % 10 != 7) as u8;
            slot.payload.et_pass = (id % 25 != 3) as u8;
        });
    let stop = Arc::new(AtomicBool::new(false));
    let device = match sim.spawn(Arc::clone(&stop)) {
        Ok(h) => h,
        Err(e) => {
            t.fail("spawn device thread", &e.to_string());
            return;
        }
    };

    let start = Instant::now();
    let deadline = start + Duration::from_secs(10);
    let mut next = 0u64;
    let mut done: Vec<Completion> = Vec::with_capacity(TOTAL as usize);
    while (done.len() as u64) < TOTAL && Instant::now() < deadline {
        if next < TOTAL {
            let mut ops: Vec<DecodeOp> = (next..(next + 16).min(TOTAL)).map(decode_op).collect();
            next += ring.enqueue(&mut ops) as u64;
        }
        ring.dequeue_into(&mut done, 32);
    }
    let elapsed = start.elapsed();
    stop.store(true, Ordering::Release);
    let stats = device.join().unwrap_or_default();

    t.check(&format!("{} decodes completed in {:?}", done.len(), elapsed),
        done.len() as u64 == TOTAL, &format!("got {}", done.len()));
    t.check("completions in submission order",
        done.iter().enumerate().all(|(i, c)| c.request.0 == i as u64), "order broken");

    let crc = done.iter().filter(|c| c.status & status::CRC_ERROR != 0).count();
    let syn = done.iter().filter(|c| c.status & status::SYNDROME_ERROR != 0).count();
    t.check(&format!("crc errors = {}", crc), crc == 50, "expected 50");
    t.check(&format!("syndrome errors = {}", syn), syn == 20, "expected 20");
    t.check("iteration counts reported",
        done.iter().all(|c| c.iter_count as u64 == c.request.0 % 4 + 1), "mismatch");
    t.check(&format!("device processed {}", stats.processed), stats.processed == TOTAL,
        &format!("{:?}", stats));

    let wakeups = notifier.drain().unwrap_or(0);
    t.check(&format!("interrupts coalesced ({} wakeups)", wakeups),
        wakeups > 0 && wakeups <= stats.interrupts, &format!("{:?}", stats));
    let _ = ctl.set_interrupts(queue, ring.producer(), false);

    let mut dev = clean_decoder(ring.device_view(), regs, queue);

    // B2: best-effort writes a mismatched request
    ring.set_mismatch_policy(MismatchPolicy::BestEffort);
    let mut ops = vec![decode_op(1000), decode_op(1001), decode_op(1002)];
    ops[1].input = Some(BufferRef::new(0x1000, 0x200));
    let written = ring.enqueue(&mut ops);
    dev.step(64);
    let got = drain(ring, written, Duration::from_secs(1));
    t.check("best-effort: mismatch written, flagged",
        written == 3 && got.len() == 3 && ops[1].status == status::DATA_ERROR,
        &format!("written {} status {:#x}", written, ops[1].status));

    // B3: fail-fast stops at the mismatch
    ring.set_mismatch_policy(MismatchPolicy::FailFast);
    let mut ops = vec![decode_op(1003), decode_op(1004), decode_op(1005)];
    ops[1].input = Some(BufferRef::new(0x1000, 0x200));
    let written = ring.enqueue(&mut ops);
    dev.step(64);
    let got = drain(ring, written, Duration::from_secs(1));
    t.check("fail-fast: stops before mismatch",
        written == 1 && got.len() == 1 && ops[1].status == status::DATA_ERROR && ops[2].status == 0,
        &format!("written {} status {:#x}", written, ops[1].status));
    ring.set_mismatch_policy(MismatchPolicy::BestEffort);

    // B4: malformed request is never written
    let mut ops = vec![DecodeOp { input: None, ..decode_op(1006) }];
    let written = ring.enqueue(&mut ops);
    t.check("malformed request rejected",
        written == 0 && ops[0].status == status::MALFORMED | status::DATA_ERROR,
        &format!("written {} status {:#x}", written, ops[0].status));

    // B5: loopback reports no decoder status
    let mut ops = vec![decode_op(1007).with_loopback()];
    ring.enqueue(&mut ops);
    dev.step(64);
    let got = drain(ring, 1, Duration::from_secs(1));
    t.check("loopback completes with status 0",
        got.len() == 1 && got[0].is_ok() && got[0].iter_count == 0, &format!("{:?}", got));

    t.check("ring idle", ring.is_empty() && ring.free_count() == ring.capacity() - 1,
        &format!("pending {}", ring.pending_count()));
}

// ════════════════════════════════════════════════════════════
// Part C: Command queue batches
// ════════════════════════════════════════════════════════════

fn test_command_batches(t: &mut TestRunner) {
    t.part('C', "Command queue batches");

    const CONTROL_REG: usize = 0x00;
    const TAIL_REG: usize = 0x04;
    const HEAD_REG: usize = 0x08;

    let regs: Regs = Arc::new(HeapRegisters::new(0x20));
    let config = RingConfig::new().ring_size(64).batch_pool_size(4).max_batch_ops(8);
    let doorbell = Doorbell::ByteOffset { offset: TAIL_REG, control: Some((CONTROL_REG, 1)) };
    let ring: DescriptorRing<CommandPayload, Regs> =
        match DescriptorRing::new(&config, Arc::clone(&regs), doorbell) {
            Ok(ring) => ring,
            Err(e) => {
                t.fail("create command ring", &e.to_string());
                return;
            }
        };
    let mut dev = SimDevice::new(ring.device_view(), Arc::clone(&regs), doorbell,
        HeadReport::ByteOffset { offset: HEAD_REG });
    let mut coord = BatchCoordinator::new(ring, HEAD_REG, &config);

    let cipher = |id: u64, mode: AesMode| {
        CipherOp::new(RequestRef(id), mode, BufferRef::new(0x20_0000 + id * 0x40, 0x40), 0x30_0000)
            .with_iv(0x40_0000 + id * 0x20)
    };

    // C1: three batches, one per mode
    let mut a: Vec<CipherOp> = (0..4).map(|i| cipher(i, AesMode::Ecb)).collect();
    let mut b: Vec<CipherOp> = (4..7).map(|i| cipher(i, AesMode::Cbc)).collect();
    let mut c: Vec<CipherOp> = (7..9).map(|i| cipher(i, AesMode::Ctr)).collect();
    let handles: Vec<_> = [&mut a, &mut b, &mut c]
        .into_iter()
        .filter_map(|ops| coord.submit_batch(ops))
        .collect();
    let descs: Vec<u32> = handles.iter().map(|h| h.descriptors).collect();
    t.check(&format!("batch descriptors {:?}", descs), descs == [4, 6, 4], "expected [4, 6, 4]");
    t.check("run bit written", regs.read_u32(CONTROL_REG) == 1, "control register clear");
    t.check("nothing complete before device runs", coord.poll_batch(16).is_none(), "early completion");

    // C2: device finishes only the first batch
    dev.step(4);
    let first = coord.poll_batch(16).unwrap_or_default();
    t.check("first batch complete",
        first.iter().map(|c| c.request.0).eq(0..4), &format!("{:?}", first));
    t.check("second batch in progress", coord.poll_batch(16).is_none(), "completed early");

    // C3: rest, with a partial drain
    dev.step(64);
    let part = coord.poll_batch(2).unwrap_or_default();
    let rest = coord.poll_batch(16).unwrap_or_default();
    let last = coord.poll_batch(16).unwrap_or_default();
    t.check("partial drain then remainder",
        part.len() == 2 && rest.len() == 1 && last.len() == 2, &format!("{} {} {}", part.len(), rest.len(), last.len()));
    t.check("all batches recycled",
        coord.pending_batches() == 0 && coord.available_batches() == 4 && coord.consumer().is_empty(),
        &format!("pending {} available {}", coord.pending_batches(), coord.available_batches()));

    // C4: pool exhaustion
    let mut ok = 0;
    for round in 0..5u64 {
        let mut ops = vec![cipher(100 + round, AesMode::Ecb)];
        if coord.submit_batch(&mut ops).is_some() {
            ok += 1;
        }
    }
    t.check("batch pool exhausted after 4", ok == 4, &format!("submitted {}", ok));
    t.check("oldest batch age tracked", coord.oldest_age().is_some(), "no age");
    dev.step(64);
    let mut drained = 0;
    while let Some(done) = coord.poll_batch(16) {
        drained += done.len();
    }
    t.check(&format!("drained {} after device caught up", drained), drained == 4, "expected 4");
}

// ════════════════════════════════════════════════════════════
// Part D: Stop, flush, release
// ════════════════════════════════════════════════════════════

fn test_stop_release(
    t: &mut TestRunner,
    ctl: QueueControl<Regs>,
    mut ring: DecodeRing,
    queue: QueueHandle,
    regs: &Regs,
) {
    t.part('D', "Stop, flush, release");

    // D1: flush acknowledged after outstanding work drains
    let dev = clean_decoder(ring.device_view(), regs, &queue);
    let control = dev.control();
    control.stall();
    let stop = Arc::new(AtomicBool::new(false));
    let device = match dev.spawn(Arc::clone(&stop)) {
        Ok(h) => h,
        Err(e) => {
            t.fail("spawn device thread", &e.to_string());
            return;
        }
    };
    let mut ops: Vec<DecodeOp> = (2000..2010).map(decode_op).collect();
    let written = ring.enqueue(&mut ops);
    control.resume();
    let stopped = ctl.stop(&queue);
    t.check("stop acknowledged", stopped.is_ok() && !ctl.is_enabled(&queue), &format!("{:?}", stopped));
    let got = drain(&mut ring, written, Duration::from_secs(1));
    t.check(&format!("{} in-flight decodes flushed", got.len()), got.len() == written && written == 10,
        &format!("written {}", written));

    // D2: restart, then a device that never acknowledges
    let restarted = ctl.start(&queue, &mut ring);
    t.check("restart", restarted.is_ok() && ring.is_empty(), &format!("{:?}", restarted));
    control.set_hang_flush(true);
    match ctl.stop(&queue) {
        Err(RingError::Timeout { op: "flush", waited_us, .. }) => {
            t.check(&format!("hung flush -> Timeout after {}us", waited_us), !ctl.is_enabled(&queue),
                "queue still enabled");
        }
        other => t.fail("hung flush -> Timeout", &format!("{:?}", other)),
    }
    stop.store(true, Ordering::Release);
    let stats = device.join().unwrap_or_default();
    t.check(&format!("one flush acknowledged ({})", stats.flushes), stats.flushes == 1, &format!("{:?}", stats));

    // D3: release and reuse
    let index = queue.index();
    let released = ctl.release(queue);
    t.check("release", released.is_ok() && ctl.assigned_queues() == 0, &format!("{:?}", released));
    match ctl.setup_ring(QueueKind::Decode, &mut ring, 0) {
        Ok(q) => t.check(&format!("released queue reused -> q{}", q.index()), q.index() == index, "different queue"),
        Err(e) => t.fail("released queue reused", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part E: Context registry
// ════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
struct DeviceContext {
    name: String,
    queues: usize,
}

fn test_registry(t: &mut TestRunner) {
    t.part('E', "Context registry");

    let registry = ContextRegistry::new();
    t.check("empty before register", registry.current().is_none(), "unexpected context");

    registry.register(DeviceContext { name: "fec0".into(), queues: BOUND.len() });
    t.check("register sets context",
        registry.with(|c| c.name.clone()).as_deref() == Some("fec0"), "missing");

    let kept = registry.clear_if(|c| c.name == "fec1");
    t.check("remove of other device ignored", kept.is_none() && registry.is_registered(), "cleared");

    let removed = registry.clear_if(|c| c.name == "fec0");
    t.check("remove clears context",
        removed.map(|c| c.queues) == Some(BOUND.len()) && !registry.is_registered(), "still set");
}

// ════════════════════════════════════════════════════════════

fn main() {
    init_tracing();
    println!("=== dring End-to-End Smoke Test ===");

    let mut t = TestRunner::new();
    let config = RingConfig::from_env()
        .ring_size(64)
        .flush_timeout(Duration::from_millis(50));
    let regs = device_registers(true);

    match test_setup(&mut t, &regs, &config) {
        Some((ctl, mut ring, queue)) => {
            test_decode_path(&mut t, &ctl, &mut ring, &queue, &regs);
            test_stop_release(&mut t, ctl, ring, queue, &regs);
        }
        None => println!("       Skipping data path tests."),
    }
    test_command_batches(&mut t);
    test_registry(&mut t);

    t.summary();
    std::process::exit(if t.failed() { 1 } else { 0 });
}
