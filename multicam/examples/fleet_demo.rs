// multicam/examples/fleet_demo.rs
//
// 两台仿真相机：打开 → 采集 → 录制 2 秒 → 停止 → 关闭
// 录像写到当前目录下的 recordings/，配置写到 recordings/cameras.json

use anyhow::Result;
use multicam::config::{ConfigStore, DEFAULT_SECTION};
use multicam::prelude::*;
use multicam_simulation::{SimulatedCameraSpec, SimulatedDriver};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 1. 仿真设备：一台黑白、一台彩色
    let driver = SimulatedDriver::new()
        .with_camera(SimulatedCameraSpec::new(
            "SimMono",
            "0001",
            640,
            480,
            60.0,
            PixelFormat::Mono8,
        ))
        .with_camera(SimulatedCameraSpec::new(
            "SimColor",
            "0002",
            320,
            240,
            30.0,
            PixelFormat::Bgr8,
        ));

    // 2. 配置：第一次运行时生成 Default 分区
    let store = Arc::new(ConfigStore::open("recordings/cameras.json")?);
    let defaults = store
        .default_config()
        .frame_rate(30.0)
        .output("recordings")
        .display_format("RGB8");
    store.store(DEFAULT_SECTION, &defaults)?;

    let board = PreviewBoard::new();
    let mut fleet = FleetCoordinator::new(Arc::new(driver), store, Arc::new(FileEncoderFactory))
        .with_preview(Arc::new(board.clone()));

    // 3. 打开并启动采集
    let opened = fleet.open_all().await?;
    for failure in opened.failures() {
        println!("Skipped {}: {:?}", failure.identity, failure.result);
    }
    fleet.start_acquisition_all().await?;

    // 4. 录制
    for outcome in fleet.start_recording_all().outcomes {
        match outcome.result {
            Ok(path) => println!("{} -> {}", outcome.identity, path.display()),
            Err(e) => eprintln!("{}: failed to start recording: {}", outcome.identity, e),
        }
    }

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        for identity in board.identities() {
            if let Some(image) = board.latest(&identity) {
                println!(
                    "{}: preview {}x{} {} @ {:.1} fps",
                    identity, image.width, image.height, image.format, image.fps
                );
            }
        }
    }

    // 5. 停止录制，等待剩余帧写完
    fleet.stop_recording_all();
    while fleet.states().iter().any(|s| *s != CaptureState::Idle) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for index in 0..fleet.len() {
        let telemetry = fleet.health(index)?;
        println!("{}: {:?}", fleet.identities()[index], telemetry);
    }

    fleet.close_all().await;
    Ok(())
}
