use std::path::{Path, PathBuf};

use draftdoc_config::{AppConfig, ConfigError};
use draftdoc_core::geometry::Point2;
use draftdoc_core::shape::{CircleRecord, LineRecord, PolygonShape, RectRecord, Shape};
use draftdoc_core::text::TextRecord;
use draftdoc_engine::Engine;
use draftdoc_engine::command::{CommandBus, CommandContext, CommandRequest};
use draftdoc_engine::errors::EngineError;
use draftdoc_engine::selection::SelectionMode;
use draftdoc_engine::session::{Modifiers, TransformBegin, TransformMode};
use draftdoc_io::{EsnpFile, SnapshotLoader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str =
    "用法: draftdoc [--config PATH] <demo [--out PATH] | inspect FILE | verify FILE...>";

enum Mode {
    Demo { out: Option<PathBuf> },
    Inspect { path: PathBuf },
    Verify { paths: Vec<PathBuf> },
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut config_override: Option<PathBuf> = None;
    let mut mode_name: Option<String> = None;
    let mut out: Option<PathBuf> = None;
    let mut paths: Vec<PathBuf> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    exit_with_usage("`--config` 需要提供配置文件路径");
                };
                config_override = Some(PathBuf::from(path));
            }
            "--out" => {
                let Some(path) = args.next() else {
                    exit_with_usage("`--out` 需要提供输出文件路径");
                };
                out = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            other if mode_name.is_none() && !other.starts_with('-') => {
                mode_name = Some(other.to_string());
            }
            other if !other.starts_with('-') => paths.push(PathBuf::from(other)),
            other => exit_with_usage(&format!("未知参数：{other}")),
        }
    }

    let mode = match (mode_name.as_deref(), paths.as_slice()) {
        (Some("demo") | None, []) => Mode::Demo { out },
        (Some("inspect"), [path]) => Mode::Inspect { path: path.clone() },
        (Some("verify"), [_, ..]) => Mode::Verify { paths },
        _ => exit_with_usage("参数不完整或多余"),
    };

    let config = load_configuration(config_override);
    init_logging(&config);

    let succeeded = match mode {
        Mode::Demo { out } => {
            let out = out.unwrap_or_else(|| config.snapshot.default_output.clone());
            info!(out = %out.display(), "运行演示");
            run_demo(&config, &out)
        }
        Mode::Inspect { path } => run_inspect(&path),
        Mode::Verify { paths } => run_verify(&config, &paths),
    };
    if !succeeded {
        std::process::exit(1);
    }
}

fn exit_with_usage(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!("{USAGE}");
    std::process::exit(2);
}

/// 构建一张小图，经命令总线与变换会话编辑后保存。
fn run_demo(config: &AppConfig, out: &Path) -> bool {
    let mut engine = Engine::with_options(config.engine_options());
    let bytes = match build_demo(&mut engine) {
        Ok(()) => engine.serialize_to_bytes(),
        Err(err) => Err(err),
    };
    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "执行演示失败");
            return false;
        }
    };
    if let Err(err) = EsnpFile::new().write_bytes(out, &bytes) {
        error!(error = %err, "保存演示快照失败");
        return false;
    }
    let meta = engine.history_meta();
    println!(
        "已写入 {}（{} 字节，{} 个实体，{} 条历史记录）",
        out.display(),
        bytes.len(),
        engine.document().draw_order().len(),
        meta.len
    );
    true
}

fn build_demo(engine: &mut Engine) -> Result<(), EngineError> {
    let frame = engine.create_entity(
        Shape::Rect(RectRecord::new(0.0, 0.0, 200.0, 120.0)),
        None,
    )?;
    let hub = engine.create_entity(
        Shape::Circle(CircleRecord::new(Point2::new(100.0, 60.0), 30.0, 30.0)),
        None,
    )?;
    engine.create_entity(
        Shape::Line(LineRecord::new(Point2::new(0.0, 0.0), Point2::new(200.0, 120.0))),
        None,
    )?;
    let marker = engine.create_entity(
        Shape::Polygon(PolygonShape::new(vec![
            Point2::new(220.0, 0.0),
            Point2::new(260.0, 0.0),
            Point2::new(240.0, 35.0),
        ])),
        None,
    )?;
    engine.create_entity(
        Shape::Text(TextRecord::new(Point2::new(0.0, 160.0), "draftdoc demo")),
        None,
    )?;
    engine.set_entity_rotation(frame, 15.0)?;

    let bus = CommandBus::new();
    engine.set_selection(&[hub, marker], SelectionMode::Replace);
    let mut context = CommandContext { engine: &mut *engine };
    for request in [
        CommandRequest::with_args("move_selection", ["10", "-5"]),
        CommandRequest::new("bring_to_front"),
        CommandRequest::new("undo"),
        CommandRequest::new("redo"),
    ] {
        let response = bus.dispatch(&request, &mut context);
        info!(
            command = %request.name,
            success = response.success,
            message = response.message.as_deref().unwrap_or(""),
            "命令已执行"
        );
    }

    let mut request =
        TransformBegin::new(vec![marker], TransformMode::Rotate, Point2::new(280.0, 15.0));
    request.modifiers = Modifiers::SHIFT;
    engine.begin_transform(request)?;
    engine.update_transform(Point2::new(250.0, 60.0), Modifiers::SHIFT)?;
    engine.commit_transform()?;

    let batch = engine.poll_events(usize::MAX);
    info!(
        generation = batch.generation,
        events = batch.events.len(),
        "演示事件已取出"
    );
    Ok(())
}

fn run_inspect(path: &Path) -> bool {
    let snapshot = match EsnpFile::new().load(path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(error = %err, "读取快照失败");
            return false;
        }
    };
    let summary = serde_json::json!({
        "path": path.display().to_string(),
        "selection": snapshot.selection.iter().map(|id| id.get()).collect::<Vec<_>>(),
        "history": {
            "entries": snapshot.history.entries.len(),
            "cursor": snapshot.history.cursor,
        },
        "document": snapshot.document.dump(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => {
            println!("{text}");
            true
        }
        Err(err) => {
            error!(error = %err, "生成快照摘要失败");
            false
        }
    }
}

/// 将每个文件载入新引擎，再保存并重新载入，检查文档在往返后保持不变。
fn run_verify(config: &AppConfig, paths: &[PathBuf]) -> bool {
    let file = EsnpFile::new();
    let mut failures = 0usize;
    for path in paths {
        let outcome = file
            .read_bytes(path)
            .map_err(|err| err.to_string())
            .and_then(|bytes| verify_bytes(config, &bytes));
        match outcome {
            Ok(entities) => println!("通过  {}（{entities} 个实体）", path.display()),
            Err(message) => {
                failures += 1;
                warn!(path = %path.display(), error = %message, "校验失败");
                println!("失败  {}: {message}", path.display());
            }
        }
    }
    failures == 0
}

fn verify_bytes(config: &AppConfig, bytes: &[u8]) -> Result<usize, String> {
    let round_trip = || -> Result<(Engine, Engine), EngineError> {
        let mut engine = Engine::with_options(config.engine_options());
        engine.load_snapshot_from_bytes(bytes)?;
        let again = engine.serialize_to_bytes()?;
        let mut reloaded = Engine::with_options(config.engine_options());
        reloaded.load_snapshot_from_bytes(&again)?;
        Ok((engine, reloaded))
    };
    let (engine, reloaded) = round_trip().map_err(|err| err.to_string())?;
    if reloaded.document().dump() != engine.document().dump() {
        return Err("文档在保存并重新载入后发生变化".to_string());
    }
    Ok(engine.document().draw_order().len())
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(config.logging.level.clone())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时保留已有的订阅者。
    let _ = fmt().with_env_filter(filter).try_init();
}
