//! End-to-end scheduling scenarios on real threads.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use os_emu::{
    Instruction, MemoryManager, Pid, ProcessState, ProcessTable, RecordingTrace, SchedTraceEvent, Scheduler,
    SchedulerConfig, SchedulingPolicy, TraceSink,
};

fn prints(n: usize) -> Vec<Instruction> {
    (0..n)
        .map(|i| Instruction::Print {
            message: format!("line {i}"),
        })
        .collect()
}

struct Rig {
    table: Arc<ProcessTable>,
    memory: Arc<MemoryManager>,
    trace: Arc<RecordingTrace>,
    sched: Scheduler,
}

fn rig(cores: usize, policy: SchedulingPolicy, delay: Duration) -> Rig {
    let table = Arc::new(ProcessTable::new());
    let memory = Arc::new(MemoryManager::flat(1 << 20));
    let trace = Arc::new(RecordingTrace::new());
    let cfg = SchedulerConfig::new(cores, policy)
        .with_instruction_delay(delay)
        .with_alloc_backoff(Duration::from_millis(1));
    let sched = Scheduler::with_trace(cfg, Arc::clone(&table), Arc::clone(&memory), trace.clone());
    Rig {
        table,
        memory,
        trace,
        sched,
    }
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Records like [`RecordingTrace`] but parks the preempting worker right
/// after `target` is requeued, until the test calls [`release`](Self::release).
///
/// The preemption event fires while the worker still holds the pause gate,
/// so the dispatcher cannot take `target` off the queue while parked.
struct HoldOnPreempt {
    inner: RecordingTrace,
    target: Pid,
    hold: Mutex<(bool, u32)>,
    cv: Condvar,
}

impl HoldOnPreempt {
    fn new(target: Pid) -> Self {
        Self {
            inner: RecordingTrace::new(),
            target,
            hold: Mutex::new((false, 0)),
            cv: Condvar::new(),
        }
    }

    /// Block until the `n`th preemption of `target` is parked.
    fn wait_parked(&self, n: u32) -> bool {
        let guard = self.hold.lock().unwrap();
        let (guard, timeout) = self
            .cv
            .wait_timeout_while(guard, Duration::from_secs(10), |(held, seen)| !(*held && *seen == n))
            .unwrap();
        drop(guard);
        !timeout.timed_out()
    }

    fn release(&self) {
        self.hold.lock().unwrap().0 = false;
        self.cv.notify_all();
    }
}

impl TraceSink for HoldOnPreempt {
    fn is_enabled(&self) -> bool {
        true
    }

    fn on_event(&self, event: SchedTraceEvent) {
        self.inner.on_event(event);
        if !matches!(event, SchedTraceEvent::Preempted { pid, .. } if pid == self.target) {
            return;
        }
        let mut guard = self.hold.lock().unwrap();
        guard.0 = true;
        guard.1 += 1;
        self.cv.notify_all();
        // Bounded so a failing assertion on the test thread cannot hang the worker.
        let _ = self
            .cv
            .wait_timeout_while(guard, Duration::from_secs(10), |(held, _)| *held)
            .unwrap();
    }
}

#[test]
fn round_robin_two_cores_quantum_two() {
    let table = Arc::new(ProcessTable::new());
    let memory = Arc::new(MemoryManager::flat(1 << 20));
    let a = table.spawn("A", prints(5), 64).unwrap();
    let b = table.spawn("B", prints(1), 64).unwrap();
    let trace = Arc::new(HoldOnPreempt::new(a));
    let cfg = SchedulerConfig::new(2, SchedulingPolicy::round_robin(2).unwrap())
        .with_instruction_delay(Duration::from_millis(2));
    let sched = Scheduler::with_trace(cfg, Arc::clone(&table), Arc::clone(&memory), trace.clone());
    assert!(sched.add_process(a));
    assert!(sched.add_process(b));
    sched.start();

    // A is observable in the ready queue after each of its two preemptions.
    for n in 1..=2 {
        assert!(trace.wait_parked(n), "preemption {n} of A never happened");
        let queued = sched.queued_processes();
        let running = sched.running_processes();
        trace.release();
        assert!(queued.contains(&a), "A not queued after preemption {n}: {queued:?}");
        assert!(!running.contains_key(&a), "A still on a core after preemption {n}");
    }

    assert!(wait_for(Duration::from_secs(10), || sched.finished_processes().len() == 2));
    let m = sched.stop();
    let trace = &trace.inner;

    // B finishes in its first slice.
    assert_eq!(trace.slices_of(b), vec![1]);
    // A needs three slices of 2, 2 and 1 instructions.
    assert_eq!(trace.slices_of(a), vec![2, 2, 1]);

    // Each preemption of A is followed by a fresh dispatch.
    let a_events = trace.events_for(a);
    let kinds: Vec<&str> = a_events
        .iter()
        .map(|e| match e {
            SchedTraceEvent::Submitted { .. } => "submit",
            SchedTraceEvent::Dispatched { .. } => "dispatch",
            SchedTraceEvent::Preempted { .. } => "preempt",
            SchedTraceEvent::Finished { .. } => "finish",
            SchedTraceEvent::Deferred { .. } => "defer",
            SchedTraceEvent::Interrupted { .. } => "interrupt",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["submit", "dispatch", "preempt", "dispatch", "preempt", "dispatch", "finish"]
    );
    for e in &a_events {
        if let SchedTraceEvent::Dispatched { quantum, .. } = e {
            assert_eq!(*quantum, Some(2));
        }
    }

    assert_eq!(m.preemptions, 2);
    assert_eq!(m.completions, 2);
    assert_eq!(m.instructions_executed, 6);
    assert_eq!(memory.process_count(), 0);
    assert_eq!(table.with(a, |p| p.state()), Some(ProcessState::Finished));
}

#[test]
fn round_robin_requeues_to_the_tail() {
    // One core: A, B, C rotate in submission order.
    let r = rig(1, SchedulingPolicy::round_robin(1).unwrap(), Duration::ZERO);
    let pids: Vec<Pid> = ["A", "B", "C"]
        .iter()
        .map(|n| r.table.spawn(n, prints(2), 16).unwrap())
        .collect();
    for &pid in &pids {
        r.sched.add_process(pid);
    }
    r.sched.start();
    assert!(wait_for(Duration::from_secs(10), || r.sched.finished_processes().len() == 3));
    r.sched.stop();

    let dispatch_order: Vec<Pid> = r
        .trace
        .events()
        .iter()
        .filter_map(|e| match e {
            SchedTraceEvent::Dispatched { pid, .. } => Some(*pid),
            _ => None,
        })
        .collect();
    let expected: Vec<Pid> = pids.iter().chain(pids.iter()).copied().collect();
    assert_eq!(dispatch_order, expected);
}

#[test]
fn process_with_exactly_quantum_instructions_is_not_requeued() {
    let r = rig(1, SchedulingPolicy::round_robin(3).unwrap(), Duration::ZERO);
    let pid = r.table.spawn("exact", prints(3), 16).unwrap();
    r.sched.add_process(pid);
    r.sched.start();
    assert!(wait_for(Duration::from_secs(5), || r.sched.finished_processes() == vec![pid]));
    let m = r.sched.stop();
    assert_eq!(m.preemptions, 0);
    assert_eq!(r.trace.slices_of(pid), vec![3]);
}

#[test]
fn fcfs_never_requeues_a_started_process() {
    let r = rig(2, SchedulingPolicy::Fcfs, Duration::from_millis(1));
    let pids: Vec<Pid> = (0..6)
        .map(|i| r.table.spawn(&format!("p{i}"), prints(10), 32).unwrap())
        .collect();
    for &pid in &pids {
        r.sched.add_process(pid);
    }
    r.sched.start();

    let mut started: HashSet<Pid> = HashSet::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while r.sched.finished_processes().len() < pids.len() && Instant::now() < deadline {
        let snap = r.sched.snapshot();
        for pid in snap.running.keys() {
            started.insert(*pid);
        }
        for pid in &snap.queued {
            assert!(!started.contains(pid), "pid {pid} requeued under FCFS");
        }
        thread::sleep(Duration::from_micros(200));
    }
    let m = r.sched.stop();
    assert_eq!(m.completions, 6);
    assert_eq!(m.preemptions, 0);
    for pid in pids {
        assert_eq!(r.trace.slices_of(pid), vec![10]);
    }
}

#[test]
fn exclusivity_and_core_count_hold_under_load() {
    let r = rig(3, SchedulingPolicy::round_robin(2).unwrap(), Duration::from_micros(200));
    for i in 0..12 {
        let pid = r.table.spawn(&format!("p{i}"), prints(8), 64).unwrap();
        r.sched.add_process(pid);
    }
    r.sched.start();

    let deadline = Instant::now() + Duration::from_secs(10);
    while r.sched.finished_processes().len() < 12 && Instant::now() < deadline {
        let snap = r.sched.snapshot();
        assert_eq!(snap.total_cores, 3);
        assert!(snap.busy_cores() <= snap.total_cores);

        let cores: HashSet<usize> = snap.running.values().copied().collect();
        assert_eq!(cores.len(), snap.running.len(), "two pids on one core");
        for pid in &snap.queued {
            assert!(!snap.running.contains_key(pid), "pid {pid} both queued and running");
        }
        let unique: HashSet<&Pid> = snap.queued.iter().collect();
        assert_eq!(unique.len(), snap.queued.len(), "pid queued twice");

        let busy = r.sched.busy_cores();
        assert!(busy <= r.sched.total_cores());
    }
    let m = r.sched.stop();
    assert_eq!(m.completions, 12);
    assert!(r.trace.events().iter().all(|e| match e {
        SchedTraceEvent::Preempted { executed, .. } | SchedTraceEvent::Finished { executed, .. } => *executed <= 2,
        _ => true,
    }));
}

#[test]
fn pause_freezes_busy_cores_until_resume() {
    let r = rig(2, SchedulingPolicy::round_robin(3).unwrap(), Duration::from_millis(2));
    for i in 0..4 {
        let pid = r.table.spawn(&format!("p{i}"), prints(200), 64).unwrap();
        r.sched.add_process(pid);
    }
    r.sched.start();
    assert!(wait_for(Duration::from_secs(5), || r.sched.busy_cores() == 2));

    assert!(r.sched.pause());
    assert!(!r.sched.pause(), "already paused");
    assert!(r.sched.is_paused());

    let frozen = r.sched.snapshot();
    let cycles = r.sched.cpu_cycles();
    // One in-flight instruction per core may complete after pause().
    thread::sleep(Duration::from_millis(30));
    let settled_cycles = r.sched.cpu_cycles();
    assert!(settled_cycles <= cycles + 2);
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(5));
        assert_eq!(r.sched.snapshot(), frozen);
        assert_eq!(r.sched.busy_cores(), frozen.busy_cores());
        assert_eq!(r.sched.cpu_cycles(), settled_cycles);
    }

    assert!(r.sched.resume());
    assert!(!r.sched.resume(), "not paused");
    assert!(wait_for(Duration::from_secs(5), || r.sched.cpu_cycles() > settled_cycles));
    r.sched.stop();
}

#[test]
fn stop_while_paused_terminates_every_thread() {
    let r = rig(4, SchedulingPolicy::Fcfs, Duration::from_millis(1));
    let mut pids = Vec::new();
    for i in 0..6 {
        let pid = r.table.spawn(&format!("p{i}"), prints(1000), 64).unwrap();
        r.sched.add_process(pid);
        pids.push(pid);
    }
    r.sched.start();
    // Every core has started executing its first process.
    assert!(wait_for(Duration::from_secs(5), || r
        .sched
        .core_instructions()
        .iter()
        .all(|&n| n > 0)));
    r.sched.pause();

    let started = Instant::now();
    let m = r.sched.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!r.sched.is_running());
    assert!(!r.sched.is_paused());
    assert_eq!(m.worker_count, 4);
    assert_eq!(m.interrupted, 4);

    // Nothing lost: every process is back in the queue, none on a core.
    assert_eq!(r.sched.busy_cores(), 0);
    let mut queued = r.sched.queued_processes();
    queued.sort();
    assert_eq!(queued, pids);
    for pid in pids {
        assert_eq!(r.table.with(pid, |p| p.state()), Some(ProcessState::Ready));
    }
}

#[test]
fn processes_added_while_running_are_picked_up() {
    let r = rig(2, SchedulingPolicy::round_robin(4).unwrap(), Duration::ZERO);
    r.sched.start();
    thread::sleep(Duration::from_millis(5));
    assert_eq!(r.sched.busy_cores(), 0);
    let pid = r.table.spawn("late", prints(9), 16).unwrap();
    r.sched.add_process(pid);
    assert!(wait_for(Duration::from_secs(5), || r.sched.finished_processes() == vec![pid]));
    r.sched.stop();
    assert_eq!(r.trace.slices_of(pid), vec![4, 4, 1]);
    let out = r.table.with(pid, |p| p.output().len()).unwrap();
    assert_eq!(out, 9);
}
