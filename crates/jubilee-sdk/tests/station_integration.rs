//! 工作站端到端集成测试（模拟固件，无硬件）
//!
//! 覆盖协议执行的关键场景：96 孔板超声、未配置槽位拒绝、归位
//! 前置条件、换刀期间超时的故障锁存与恢复、规划确定性。

use std::sync::Arc;

use jubilee_sdk::prelude::*;
use jubilee_sdk::station::deck::CleaningConfig;
use jubilee_sdk::station::tool::{LockParams, MachineLimits, ParkPoints, ToolRoles, ToolTable};
use jubilee_sdk::station::types::{Point2, Vec3};

fn tool_table() -> ToolTable {
    ToolTable {
        machine: MachineLimits { z_max: 300.0 },
        roles: ToolRoles {
            sonicator: 1,
            camera: Some(0),
        },
        tools: vec![
            Tool {
                index: 0,
                name: "camera".to_string(),
                offset: Vec3::new(0.0, 20.0, -18.0),
                max_insertion_depth: 0.0,
                park: ParkPoints {
                    approach: Point2::new(287.0, 330.0),
                    park: Point2::new(287.0, 341.0),
                },
                lock: LockParams {
                    search_rotation_deg: 160.0,
                    search_current_ma: 650,
                    holding_current_ma: 300,
                },
                narrow_z_limit: false,
            },
            Tool {
                index: 1,
                name: "sonicator".to_string(),
                offset: Vec3::new(0.0, 43.0, -30.0),
                max_insertion_depth: 35.0,
                park: ParkPoints {
                    approach: Point2::new(148.0, 330.0),
                    park: Point2::new(148.0, 341.0),
                },
                lock: LockParams {
                    search_rotation_deg: 160.0,
                    search_current_ma: 650,
                    holding_current_ma: 300,
                },
                narrow_z_limit: true,
            },
        ],
    }
}

fn plate_96(height: f64) -> Labware {
    Labware {
        well_count: 96,
        corner_well_centroids: [
            Point2::new(200.0, 200.0),
            Point2::new(299.0, 200.0),
            Point2::new(299.0, 263.0),
        ],
        height,
    }
}

fn deck_config_with_plate() -> DeckConfig {
    let mut config = DeckConfig::default();
    config.plates.insert(5, plate_96(20.0));
    config.safe_z = Some(65.0);
    config
}

struct Harness {
    station: Station,
    sim: SimHandle,
    runs: Arc<parking_lot::Mutex<Vec<SonicationSpec>>>,
}

fn build_station(deck_config: DeckConfig) -> Harness {
    let sim_duet = SimDuet::new();
    let sim = sim_duet.handle();
    // 锁堵转角 120 度：力矩限位正常可检出
    sim.set_lock_stall(Some(120.0));
    let machine = Arc::new(
        MachineBuilder::new()
            .transport(Box::new(sim_duet))
            .connect()
            .expect("sim connect"),
    );
    let tools = Arc::new(ToolRegistry::from_table(tool_table()).expect("tool table"));
    let deck = Deck::new(deck_config).expect("deck config");
    let sonicator = SimSonicator::new();
    let runs = sonicator.runs_handle();
    let station = Station::new(machine, tools, deck, Box::new(sonicator));
    Harness { station, sim, runs }
}

fn single_op_protocol() -> Protocol {
    Protocol::from_json(
        r#"[{"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "A", "column_index": 1,
                       "plunge_depth": 10.0, "seconds": 3.0, "autoclean": false}}]"#,
    )
    .unwrap()
}

/// 取出 log 中所有 Z 轴运动的目标值
fn z_moves(log: &[String]) -> Vec<f64> {
    log.iter()
        .filter(|c| c.starts_with("G0 Z"))
        .filter_map(|c| {
            c.split_whitespace()
                .find(|w| w.starts_with('Z'))
                .and_then(|w| w[1..].parse::<f64>().ok())
        })
        .collect()
}

#[test]
fn sonicate_96_well_plate_scenario() {
    let mut h = build_station(deck_config_with_plate());
    h.station.home_all().unwrap();
    h.sim.take_commands();

    h.station.execute(&single_op_protocol()).unwrap();

    // 刀具换到了超声探头
    assert_eq!(h.station.mounted_tool(), Some(1));
    assert_eq!(h.sim.selected_tool(), Some(1));

    // 驻留 3.0 秒，恰好一次
    let runs = h.runs.lock();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].seconds, 3.0);
    drop(runs);

    let log = h.sim.take_commands();
    // 下探恰好到板顶下 10mm（板顶 20mm -> Z 10mm），且用受控速度
    assert!(log.iter().any(|c| c == "G0 Z10 F800"));
    // 台面上方的所有其他 Z 运动都不低于 safe_z (65mm)
    for z in z_moves(&log) {
        if (z - 10.0).abs() < 1e-9 {
            continue; // 受控下探
        }
        assert!(z >= 65.0, "travel at Z{z} below safe_z");
    }
    // 回抽收尾：最后一个 Z 运动回到 safe_z 及以上
    let last_z = *z_moves(&log).last().unwrap();
    assert!(last_z >= 65.0);
}

#[test]
fn unconfigured_slot_rejects_operation() {
    // 同一协议，但槽位 5 没有 labware
    let mut h = build_station(DeckConfig::default());
    h.station.home_all().unwrap();
    h.sim.take_commands();

    let err = h.station.execute(&single_op_protocol()).unwrap_err();
    match err {
        StationError::Operation { index, source } => {
            assert_eq!(index, 0);
            assert!(matches!(
                *source,
                StationError::LabwareNotConfigured { slot: 5 }
            ));
        }
        other => panic!("expected Operation wrapper, got {other:?}"),
    }
    // 规划阶段失败：没有发出任何运动指令
    assert!(h.sim.commands().is_empty());
}

#[test]
fn motion_before_homing_fails_with_zero_commands() {
    let mut h = build_station(deck_config_with_plate());
    // 不归位，直接执行
    h.sim.take_commands();
    let err = h.station.execute(&single_op_protocol()).unwrap_err();
    assert!(matches!(err, StationError::NotHomed));
    assert!(h.sim.commands().is_empty());
}

#[test]
fn ack_timeout_during_picking_latches_fault_until_reset() {
    let mut h = build_station(deck_config_with_plate());
    h.station.home_all().unwrap();

    // 裸托架起步：首个提升电流指令出现在 PICKING 指令组
    h.sim.timeout_on("M906 U650");
    let err = h.station.execute(&single_op_protocol()).unwrap_err();
    match err {
        StationError::Operation { index: 0, source } => match *source {
            StationError::ToolChange { state, .. } => assert_eq!(state, ChangeState::Picking),
            other => panic!("expected ToolChange, got {other:?}"),
        },
        other => panic!("expected Operation wrapper, got {other:?}"),
    }
    assert!(h.station.machine().is_faulted());
    assert_eq!(h.station.change_state(), ChangeState::Faulted);

    // 故障锁存期间，后续 execute 一律拒绝
    let err = h.station.execute(&single_op_protocol()).unwrap_err();
    assert!(matches!(err, StationError::Faulted(_)));

    // 操作员复位 + 重新归位后恢复执行
    h.station.operator_reset().unwrap();
    assert_eq!(h.station.change_state(), ChangeState::Idle);
    h.station.home_all().unwrap();
    h.station.execute(&single_op_protocol()).unwrap();
    assert_eq!(h.station.mounted_tool(), Some(1));
}

#[test]
fn replanning_same_protocol_is_deterministic() {
    // 两台同样配置的工作站，同一协议：指令序列逐条一致
    let protocol = Protocol::from_json(
        r#"[{"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "B", "column_index": 3,
                       "plunge_depth": 8.0, "seconds": 1.0, "autoclean": false}},
            {"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "C", "column_index": 4,
                       "plunge_depth": 6.0, "seconds": 2.0, "autoclean": false}}]"#,
    )
    .unwrap();

    let mut logs: Vec<Vec<String>> = Vec::new();
    for _ in 0..2 {
        let mut h = build_station(deck_config_with_plate());
        h.station.home_all().unwrap();
        h.sim.take_commands();
        h.station.execute(&protocol).unwrap();
        logs.push(h.sim.take_commands());
    }
    assert_eq!(logs[0], logs[1]);
}

#[test]
fn autoclean_runs_cleaning_routine_between_operations() {
    let mut config = deck_config_with_plate();
    // 清洗浴槽也放在 5 号板上（H12），清洗序列禁止嵌套 autoclean
    config.cleaning = Some(CleaningConfig {
        protocol: vec![Operation::SonicateWell(SonicateWellSpec {
            deck_index: 5,
            row_letter: 'H',
            column_index: 12,
            plunge_depth: 12.0,
            seconds: 3.0,
            power: None,
            pulse_duty_cycle: None,
            pulse_interval: None,
            autoclean: false,
        })],
    });
    let mut h = build_station(config);
    h.station.home_all().unwrap();

    let protocol = Protocol::from_json(
        r#"[{"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "A", "column_index": 1,
                       "plunge_depth": 10.0, "seconds": 3.0, "autoclean": true}}]"#,
    )
    .unwrap();
    h.station.execute(&protocol).unwrap();

    // 一次孔位驻留 + 一次清洗驻留
    assert_eq!(h.runs.lock().len(), 2);
}

#[test]
fn autoclean_without_cleaning_station_fails() {
    let mut h = build_station(deck_config_with_plate());
    h.station.home_all().unwrap();
    let protocol = Protocol::from_json(
        r#"[{"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "A", "column_index": 1,
                       "plunge_depth": 10.0, "seconds": 3.0, "autoclean": true}}]"#,
    )
    .unwrap();
    let err = h.station.execute(&protocol).unwrap_err();
    match err {
        StationError::Operation { index: 0, source } => {
            assert!(matches!(*source, StationError::Configuration(_)));
        }
        other => panic!("expected Operation wrapper, got {other:?}"),
    }
}

#[test]
fn deck_config_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let deck = Deck::new(deck_config_with_plate()).unwrap();
    deck.save(&path).unwrap();
    let reloaded = Deck::load(&path).unwrap();
    assert_eq!(reloaded.safe_z(), 65.0);
    assert_eq!(reloaded.config().plates.len(), 1);
    assert_eq!(reloaded.config().plates[&5], plate_96(20.0));
}
