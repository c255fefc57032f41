//! 交互 shell
//!
//! 逐条执行与 one-shot 相同的原语；所有运动仍然经由工作站层的
//! 状态机与安全模型。单条命令失败只打印错误，不退出 shell。

use crate::commands;
use anyhow::Result;
use jubilee_sdk::prelude::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};

const BANNER: &str = r"
  ____              _           _   _               ____  _        _   _
 / ___|  ___  _ __ (_) ___ __ _| |_(_) ___  _ __   / ___|| |_ __ _| |_(_) ___  _ __
 \___ \ / _ \| '_ \| |/ __/ _` | __| |/ _ \| '_ \  \___ \| __/ _` | __| |/ _ \| '_ \
  ___) | (_) | | | | | (_| (_| | |_| | (_) | | | |  ___) | || (_| | |_| | (_) | | | |
 |____/ \___/|_| |_|_|\___\__,_|\__|_|\___/|_| |_| |____/ \__\__,_|\__|_|\___/|_| |_|
";

const HELP: &str = "\
commands:
  home                                  home all axes (parks tool first)
  move [x] [y] [z]                      safe absolute move ('-' skips an axis)
  tool <index>                          mount a tool
  park                                  park the current tool
  sonicate <slot> <well> <depth> <secs> sonicate one well (e.g. sonicate 5 A1 10 3)
  clean                                 run the cleaning routine
  run <protocol.json>                   execute a protocol file
  deck                                  show deck configuration
  save [path]                           save deck configuration
  status                                show machine status
  reset                                 operator fault reset
  help                                  this text
  exit                                  leave the shell";

enum Outcome {
    Continue,
    Quit,
}

pub fn run(station: &mut Station, deck_path: &Path) -> Result<()> {
    println!("{BANNER}");
    println!("type 'help' for commands");
    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("jubilee> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match dispatch(station, deck_path, &line) {
                    Ok(Outcome::Quit) => break,
                    Ok(Outcome::Continue) => {}
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
            // CTRL-C：清掉输入行继续；中止在途操作由信号处理器负责
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// 解析可跳过的坐标（'-' 或 '_' 表示不动该轴）
fn parse_coord(token: Option<&str>) -> Result<Option<f64>> {
    match token {
        None | Some("-") | Some("_") => Ok(None),
        Some(raw) => Ok(Some(raw.parse()?)),
    }
}

fn dispatch(station: &mut Station, deck_path: &Path, line: &str) -> Result<Outcome> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Outcome::Continue);
    };
    let args: Vec<&str> = words.collect();

    match head {
        "help" => println!("{HELP}"),
        "exit" | "quit" => return Ok(Outcome::Quit),
        "home" => commands::home(station)?,
        "move" => {
            let x = parse_coord(args.first().copied())?;
            let y = parse_coord(args.get(1).copied())?;
            let z = parse_coord(args.get(2).copied())?;
            commands::move_to(station, x, y, z)?;
        }
        "tool" => {
            let index: u8 = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("usage: tool <index>"))?
                .parse()?;
            commands::change_tool(station, Some(index))?;
        }
        "park" => commands::change_tool(station, None)?,
        "sonicate" => {
            let [slot, well, depth, seconds] = args.as_slice() else {
                anyhow::bail!("usage: sonicate <slot> <well> <depth> <seconds>");
            };
            commands::sonicate(
                station,
                slot.parse()?,
                well,
                depth.parse()?,
                seconds.parse()?,
                None,
                false,
            )?;
        }
        "clean" => commands::clean(station)?,
        "run" => {
            let path = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("usage: run <protocol.json>"))?;
            commands::run_protocol(station, &PathBuf::from(path))?;
        }
        "deck" => commands::show_deck(station)?,
        "save" => {
            let path = args.first().map(PathBuf::from);
            commands::save_deck(station, path.as_deref().unwrap_or(deck_path))?;
        }
        "status" => commands::show_status(station)?,
        "reset" => commands::reset(station)?,
        other => anyhow::bail!("unknown command {other:?} (try 'help')"),
    }
    Ok(Outcome::Continue)
}
