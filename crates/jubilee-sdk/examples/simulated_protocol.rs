//! 模拟固件上的完整协议执行演示
//!
//! 运行方式：
//! ```bash
//! cargo run -p jubilee-sdk --example simulated_protocol
//! ```

use std::sync::Arc;

use jubilee_sdk::prelude::*;
use jubilee_sdk::station::tool::{LockParams, MachineLimits, ParkPoints, ToolRoles, ToolTable};
use jubilee_sdk::station::types::{Point2, Vec3};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    jubilee_sdk::init_logging();

    // 固件模拟器：锁堵转角 120 度（力矩限位可检出）
    let sim = SimDuet::new();
    let handle = sim.handle();
    handle.set_lock_stall(Some(120.0));

    let machine = Arc::new(MachineBuilder::new().transport(Box::new(sim)).connect()?);

    let tools = Arc::new(ToolRegistry::from_table(ToolTable {
        machine: MachineLimits { z_max: 300.0 },
        roles: ToolRoles {
            sonicator: 1,
            camera: None,
        },
        tools: vec![Tool {
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
        }],
    })?);

    // 5 号槽放一块 96 孔板，板顶 20mm，safe_z 65mm
    let mut deck_config = DeckConfig::default();
    deck_config.plates.insert(
        5,
        Labware {
            well_count: 96,
            corner_well_centroids: [
                Point2::new(200.0, 200.0),
                Point2::new(299.0, 200.0),
                Point2::new(299.0, 263.0),
            ],
            height: 20.0,
        },
    );
    deck_config.safe_z = Some(65.0);
    let deck = Deck::new(deck_config)?;

    let mut station = Station::new(machine, tools, deck, Box::new(SimSonicator::new()));

    station.home_all()?;
    let protocol = Protocol::from_json(
        r#"[{"operation": "sonicate_well",
             "specs": {"deck_index": 5, "row_letter": "A", "column_index": 1,
                       "plunge_depth": 10.0, "seconds": 3.0, "autoclean": false}}]"#,
    )?;
    station.execute(&protocol)?;

    println!("protocol complete; mounted tool: {:?}", station.mounted_tool());
    println!("commands issued:");
    for command in handle.commands() {
        println!("  {command}");
    }
    Ok(())
}
