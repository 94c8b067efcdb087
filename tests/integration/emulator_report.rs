//! Emulator runs driven through configuration files, down to the report.

use std::time::Duration;

use os_emu::{
    AllocatorKind, Config, ConfigError, Emulator, EmulatorError, Instruction, MemoryManager, Pid, ProcessState,
    SchedulerKind, SpawnError,
};

fn prints(n: usize) -> Vec<Instruction> {
    vec![
        Instruction::Print {
            message: "tick".into()
        };
        n
    ]
}

fn quick_config() -> Config {
    Config {
        num_cpu: 2,
        scheduler: SchedulerKind::Rr,
        quantum_cycles: 3,
        min_ins: 5,
        max_ins: 20,
        max_overall_mem: 4096,
        mem_per_frame: 4096,
        min_mem_per_proc: 64,
        max_mem_per_proc: 256,
        ..Config::default()
    }
}

#[test]
fn text_config_file_drives_a_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.txt");
    std::fs::write(
        &path,
        "# small machine\n\
         num-cpu 2\n\
         scheduler \"fcfs\"\n\
         quantum-cycles 4\n\
         batch-process-freq 1\n\
         min-ins 3\n\
         max-ins 9\n\
         delay-per-exec 0\n\
         max-overall-mem 1024\n\
         mem-per-frame 64\n\
         min-mem-per-proc 64\n\
         max-mem-per-proc 128\n",
    )
    .unwrap();

    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.scheduler, SchedulerKind::Fcfs);
    assert_eq!(cfg.allocator_kind(), AllocatorKind::Paging);

    let emu = Emulator::with_seed(&cfg, 42).unwrap();
    for _ in 0..8 {
        emu.spawn_generated().unwrap();
    }
    assert!(emu.start());
    assert!(emu.wait_until_idle(Duration::from_secs(20)));
    let m = emu.stop();
    assert_eq!(m.completions, 8);
    assert_eq!(m.preemptions, 0, "fcfs never preempts");

    let report = emu.report();
    assert_eq!(report.finished.len(), 8);
    assert!(report.running.is_empty());
    assert_eq!(report.cores_used, 0);
    assert_eq!(report.memory.process_count, 0);
    assert_eq!(report.memory.kind, AllocatorKind::Paging);
    assert_eq!(report.cpu_cycles, m.instructions_executed);

    let out = dir.path().join("csopesy-log.txt");
    report.write_to(&out).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.starts_with("CPU utilization: 0%\n"));
    assert!(text.contains("Finished processes:\nprocess_1\t("));
    assert!(text.contains("Memory Status (paging):"));
    assert!(text.contains("Memory Usage: 0KB / 1KB"));
    assert!(text.contains(&format!("CPU cycles: {}", m.instructions_executed)));
}

#[test]
fn json_config_file_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{ "num-cpu": 3, "scheduler": "rr", "quantum-cycles": 2, "allocator": "flat",
            "max-overall-mem": 2048, "mem-per-frame": 16,
            "min-mem-per-proc": 64, "max-mem-per-proc": 64 }"#,
    )
    .unwrap();
    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.num_cpu, 3);
    assert_eq!(cfg.allocator_kind(), AllocatorKind::Flat);
    assert_eq!(cfg.min_ins, Config::default().min_ins);
}

#[test]
fn bad_config_files_report_where_they_fail() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("absent.txt");
    assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

    let unknown = dir.path().join("unknown.txt");
    std::fs::write(&unknown, "num-cpu 2\nturbo 1\n").unwrap();
    match Config::load(&unknown) {
        Err(ConfigError::UnknownKey { key, line }) => {
            assert_eq!(key, "turbo");
            assert_eq!(line, 2);
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }

    let invalid = dir.path().join("invalid.txt");
    std::fs::write(&invalid, "num-cpu 0\n").unwrap();
    assert!(matches!(Config::load(&invalid), Err(ConfigError::Invalid { .. })));

    let cfg = Config {
        num_cpu: 0,
        ..Config::default()
    };
    assert!(matches!(Emulator::new(&cfg), Err(EmulatorError::Config(_))));
}

#[test]
fn flat_memory_of_1024_bytes_runs_processes_in_turn() {
    // Two 600-byte processes cannot be resident together in 1024 bytes.
    let cfg = Config {
        num_cpu: 2,
        scheduler: SchedulerKind::Rr,
        quantum_cycles: 2,
        delay_per_exec: 1,
        max_overall_mem: 1024,
        mem_per_frame: 1024,
        min_mem_per_proc: 1024,
        max_mem_per_proc: 1024,
        ..Config::default()
    };
    let emu = Emulator::with_seed(&cfg, 7).unwrap();
    assert_eq!(emu.memory().kind(), AllocatorKind::Flat);
    let a = emu.spawn("a", prints(10), 600).unwrap();
    let b = emu.spawn("b", prints(10), 600).unwrap();
    emu.start();

    let mut max_resident = 0;
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    while !emu.wait_until_idle(Duration::ZERO) && std::time::Instant::now() < deadline {
        let stats = emu.memory().stats();
        assert!(stats.used <= stats.total);
        max_resident = max_resident.max(stats.process_count);
        std::thread::sleep(Duration::from_micros(300));
    }
    let m = emu.stop();
    assert_eq!(max_resident, 1);
    assert_eq!(m.completions, 2);
    assert!(m.alloc_failures >= 1);
    assert_eq!(emu.memory().free_memory(), 1024);
    for pid in [a, b] {
        assert_eq!(emu.table().with(pid, |p| p.state()), Some(ProcessState::Finished));
    }
}

#[test]
fn duplicate_names_are_rejected_by_the_emulator() {
    let emu = Emulator::with_seed(&quick_config(), 1).unwrap();
    let pid = emu.spawn("worker", prints(1), 64).unwrap();
    assert_eq!(pid, Pid(1));
    match emu.spawn("worker", prints(1), 64) {
        Err(EmulatorError::Spawn(SpawnError::DuplicateName { name })) => assert_eq!(name, "worker"),
        other => panic!("expected duplicate name, got {other:?}"),
    }
    assert_eq!(emu.scheduler().submitted_count(), 1);
}

#[test]
fn batch_spawning_adds_work_while_running() {
    let emu = Emulator::with_seed(&quick_config(), 3).unwrap();
    emu.start();
    assert!(emu.start_batch(Duration::from_millis(2)));
    assert!(!emu.start_batch(Duration::from_millis(2)), "already batching");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while emu.scheduler().submitted_count() < 5 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let spawned = emu.stop_batch();
    assert!(spawned >= 5);
    assert_eq!(emu.table().len() as u64, spawned);

    assert!(emu.wait_until_idle(Duration::from_secs(20)));
    emu.stop();
    let report = emu.report();
    assert_eq!(report.finished.len() as u64, spawned);
    let json = report.to_json().unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["finished"].as_array().map(Vec::len), Some(spawned as usize));
    assert_eq!(v["policy"], "rr(quantum=3)");
}

#[test]
fn pause_and_resume_through_the_emulator() {
    let cfg = Config {
        delay_per_exec: 1,
        min_ins: 50,
        max_ins: 50,
        ..quick_config()
    };
    let emu = Emulator::with_seed(&cfg, 11).unwrap();
    for _ in 0..3 {
        emu.spawn_generated().unwrap();
    }
    emu.start();
    assert!(emu.pause());
    let report = emu.report();
    assert!(report.cores_used <= 2);
    assert!(emu.resume());
    assert!(emu.wait_until_idle(Duration::from_secs(20)));
    let m = emu.stop();
    assert_eq!(m.completions, 3);
    assert_eq!(m.instructions_executed, 150);
}

#[test]
fn memory_manager_direct_use_matches_reported_stats() {
    let mm = MemoryManager::paging(1024, 128);
    let stats = mm.stats();
    assert_eq!(stats.total, 1024);
    assert_eq!(stats.free, 1024);
    assert_eq!(stats.process_count, 0);
    assert!(mm.visualize().contains("0 / 8 frames used (128 bytes each)"));
}
