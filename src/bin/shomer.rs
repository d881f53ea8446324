//! Shomer - 实时人数统计终端
//!
//! 系统架构:
//! 1. 采集线程: 读取视频源 (摄像头 / IP摄像头 / 测试画面)
//! 2. 检测线程: 人体/人脸检测 → 进出场跟踪 → 计数统计
//! 3. 主线程:   定时打印统计, 退出时导出事件日志
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use shomer_rs::input::{open_source, InputSource};
use shomer_rs::models::{simulated_pair, DetectionAdapter, FaceDetector, PersonDetector};
use shomer_rs::{gen_time_string, Args, CounterConfig, Detector, LogRecord};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // ========== 加载配置 ==========
    let mut config = match args.config.clone().or_else(CounterConfig::default_path) {
        Some(path) => CounterConfig::load(&path),
        None => {
            log::warn!("无法确定配置目录, 使用默认配置");
            CounterConfig::default()
        }
    };
    if let Some(grace) = args.grace {
        config.grace_period_secs = grace;
    }
    config
        .validate()
        .context("命令行参数覆盖后的配置无效")?;
    config.print_summary();

    // ========== 输入源 ==========
    let input = InputSource::parse(&args.source)
        .with_context(|| format!("无法解析输入源: {}", args.source))?;
    log::info!("📹 输入源: {}", input);
    let source = open_source(&input);

    // ========== 检测模型 ==========
    let seed = rand::random::<u64>();
    let (person, face) = simulated_pair(args.simulate, seed);
    let person: Option<Box<dyn PersonDetector>> = if args.simulate > 0 {
        Some(Box::new(person))
    } else {
        None
    };
    let face: Option<Box<dyn FaceDetector>> = if args.simulate > 0 && !args.no_faces {
        Some(Box::new(face))
    } else {
        None
    };
    let adapter = DetectionAdapter::new(
        person,
        face,
        config.conf_threshold,
        config.detection_width,
    );

    let offset = config.clock_offset();
    let mut detector =
        Detector::start(config, source, adapter).context("检测模块启动失败")?;

    // ========== 主循环 ==========
    let run_for = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let stats_every = Duration::from_secs(args.stats_interval.max(1));
    let started = Instant::now();
    let mut last_stats = Instant::now();

    match run_for {
        Some(limit) => log::info!("🚀 Shomer 已启动, 运行 {}s", limit.as_secs()),
        None => {
            log::info!("🚀 Shomer 已启动, 按 Ctrl+C 退出");
            if args.log_json.is_some() {
                log::warn!("--duration 为 0 时进程被中断, 不会导出事件日志");
            }
        }
    }
    loop {
        std::thread::sleep(Duration::from_millis(100));

        if last_stats.elapsed() >= stats_every {
            print_stats(&detector);
            last_stats = Instant::now();
        }
        if matches!(run_for, Some(limit) if started.elapsed() >= limit) {
            break;
        }
    }

    detector.stop();
    print_stats(&detector);

    if let Some(path) = args.log_json.as_deref() {
        let path = export_path(path, offset);
        write_event_log(&path, &detector.event_log())
            .with_context(|| format!("事件日志导出失败: {}", path.display()))?;
        log::info!("📝 事件日志已导出: {}", path.display());
    }

    Ok(())
}

fn print_stats(detector: &Detector) {
    let perf = detector.get_performance_stats();
    log::info!(
        "📊 当前 {} 人 | 人脸 {} | 进 {} 出 {} | 会话 {:.0}s | 采集 {:.1}fps (失败 {}) | {:.1} det/s (效率 {:.1}%)",
        perf.current_people,
        perf.current_faces,
        perf.tracking.total_entries,
        perf.tracking.total_exits,
        perf.tracking.session_duration,
        perf.capture_fps,
        perf.capture_failures,
        perf.detection_rate.detections_per_second,
        perf.detection_rate.detection_efficiency,
    );
}

/// 目录 → <目录>/events_<时间>.json
fn export_path(path: &Path, offset: chrono::FixedOffset) -> PathBuf {
    if path.is_dir() {
        path.join(format!("events_{}.json", gen_time_string(offset, "")))
    } else {
        path.to_path_buf()
    }
}

fn write_event_log(path: &Path, records: &[LogRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json)?;
    Ok(())
}
