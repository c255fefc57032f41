//! One-shot 命令实现
//!
//! 每个命令都是一次完整的"构建工作站 -> 执行 -> 退出"，适合脚本
//! 与 CI。交互场景用 `shell` 子命令。

use anyhow::{bail, Context, Result};
use jubilee_sdk::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// 构建工作站
///
/// 硬件传输由外部的 Duet 桥接进程提供；本工具内置的只有固件
/// 模拟器。刀具表缺失是致命配置错误；台面配置缺失则从空白开始。
pub fn build_station(tools: &Path, deck: &Path, simulated: bool) -> Result<Station> {
    if !simulated {
        bail!(
            "no hardware transport is built in; attach the duet bridge, \
             or pass --simulated for the built-in firmware simulator"
        );
    }

    let machine = Arc::new(
        MachineBuilder::new()
            .transport(Box::new(SimDuet::new()))
            .connect()
            .context("failed to connect to the simulated firmware")?,
    );

    let tools = Arc::new(
        ToolRegistry::load(tools)
            .with_context(|| format!("failed to load tool table from {}", tools.display()))?,
    );

    let deck = match Deck::load(deck) {
        Ok(deck) => deck,
        Err(StationError::Io { path, .. }) => {
            warn!(path = %path, "no deck configuration found; starting with an empty deck");
            Deck::new(DeckConfig::default())?
        }
        Err(e) => return Err(e).context("failed to load deck configuration"),
    };

    // 模拟模式下用记录型超声执行器；真实探头驱动由硬件桥接提供
    Ok(Station::new(machine, tools, deck, Box::new(SimSonicator::new())))
}

/// 解析孔位标签（"A1" -> ('A', 1)）
pub fn parse_well(well: &str) -> Result<(char, u8)> {
    let mut chars = well.chars();
    let row = chars
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .with_context(|| format!("bad well label {well:?} (expected e.g. A1)"))?;
    let column: u8 = chars
        .as_str()
        .parse()
        .with_context(|| format!("bad well label {well:?} (expected e.g. A1)"))?;
    Ok((row.to_ascii_uppercase(), column))
}

pub fn home(station: &mut Station) -> Result<()> {
    station.home_all()?;
    println!("homed; parked at idle height");
    Ok(())
}

pub fn move_to(
    station: &mut Station,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
) -> Result<()> {
    station.move_to(x, y, z)?;
    let pose = station.machine().snapshot().pose;
    println!("position: {pose}");
    Ok(())
}

pub fn change_tool(station: &mut Station, target: Option<u8>) -> Result<()> {
    let report = station.change_tool(target)?;
    match (report.noop, report.to) {
        (true, _) => println!("tool unchanged"),
        (false, Some(index)) => println!("tool {index} mounted"),
        (false, None) => println!("tool parked; carriage is bare"),
    }
    Ok(())
}

pub fn sonicate(
    station: &mut Station,
    slot: u8,
    well: &str,
    depth: f64,
    seconds: f64,
    power: Option<f64>,
    autoclean: bool,
) -> Result<()> {
    let (row_letter, column_index) = parse_well(well)?;
    station.sonicate_well(SonicateWellSpec {
        deck_index: slot,
        row_letter,
        column_index,
        plunge_depth: depth,
        seconds,
        power,
        pulse_duty_cycle: None,
        pulse_interval: None,
        autoclean,
    })?;
    println!("sonicated {well} on slot {slot} for {seconds}s");
    Ok(())
}

pub fn run_protocol(station: &mut Station, path: &Path) -> Result<()> {
    let protocol = Protocol::load(path)
        .with_context(|| format!("failed to load protocol from {}", path.display()))?;
    println!("executing {} operations...", protocol.len());
    station.execute(&protocol)?;
    println!("protocol complete");
    Ok(())
}

pub fn clean(station: &mut Station) -> Result<()> {
    station.clean_tool()?;
    println!("clean routine complete");
    Ok(())
}

pub fn show_deck(station: &Station) -> Result<()> {
    let deck = station.deck();
    println!("safe_z: {:.3} mm, idle_z: {:.3} mm", deck.safe_z(), deck.idle_z());
    if !deck.is_occupied() {
        println!("deck is empty");
        return Ok(());
    }
    for (slot, labware) in &deck.config().plates {
        println!(
            "slot {slot}: {} wells, top at {:.3} mm",
            labware.well_count, labware.height
        );
    }
    if deck.cleaning().is_some() {
        println!("cleaning station configured");
    }
    Ok(())
}

pub fn save_deck(station: &Station, path: &Path) -> Result<()> {
    station.deck().save(path)?;
    println!("deck configuration saved to {}", path.display());
    Ok(())
}

pub fn show_status(station: &Station) -> Result<()> {
    let machine = station.machine();
    let snapshot = machine.snapshot();
    println!("firmware: {}", machine.firmware_version());
    println!("position: {}", snapshot.pose);
    println!(
        "homed: X={} Y={} Z={} U={}",
        snapshot.homed[0], snapshot.homed[1], snapshot.homed[2], snapshot.homed[3]
    );
    match station.mounted_tool() {
        Some(index) => println!("mounted tool: {index}"),
        None => println!("mounted tool: none (bare carriage)"),
    }
    println!("tool changer: {:?}", station.change_state());
    if machine.is_faulted() {
        println!(
            "FAULTED: {}",
            machine.fault_reason().unwrap_or_else(|| "unknown".into())
        );
    }
    Ok(())
}

pub fn reset(station: &mut Station) -> Result<()> {
    station.operator_reset()?;
    println!("fault cleared; re-home before executing protocols");
    Ok(())
}
