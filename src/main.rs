mod config;
mod densify;
mod grid;
mod guidance;
mod logging;
mod models;
mod simulation;

use clap::{Arg, ArgAction, Command};
use config::{ConfigError, MissionConfig};
use guidance::{GuidanceEngine, MissionOutcome};
use logging::{LogConfig, LogOutput};
use models::MissionPlan;
use simulation::{SimFlightServer, SimPlanner, SimVehicle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

fn main() {
    let code = run_cli();
    std::process::exit(code);
}

fn run_cli() -> i32 {
    // コマンドライン引数の解析
    let matches = Command::new("spar")
        .version("0.1.0")
        .about("グリッド測量ミッション誘導 (Survey guidance with ROI diversion)")
        .long_about(
            "事前計画したグリッド測量を実行し、外部から通知されたROIへ迂回して\n\
             中断した地点から測量を再開するミッション誘導ノードです。",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("ミッション設定ファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するミッション設定ファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、デフォルト設定で実行されます。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("ミッションの情報のみ表示して終了")
                .conflicts_with("plan-only"),
        )
        .arg(
            Arg::new("plan-only")
                .short('p')
                .long("plan-only")
                .action(ArgAction::SetTrue)
                .help("最終的なウェイポイント列を表示して終了"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: デバッグ, -vv: トレース)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .default_value("logs")
                .help("ログファイルのディレクトリ"),
        )
        .get_matches();

    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            return 2;
        }
    };
    let base_level = matches
        .get_one::<String>("log-level")
        .map(|s| logging::parse_log_level(s))
        .unwrap_or(tracing::Level::INFO);
    let log_config = LogConfig {
        level: logging::level_from_verbosity(base_level, matches.get_count("verbose")),
        output,
        log_dir: matches
            .get_one::<String>("log-dir")
            .cloned()
            .unwrap_or_else(|| "logs".to_string()),
        ..LogConfig::default()
    };

    // ファイル出力のガードはプロセス終了まで保持する
    let _guard = match logging::init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            return 1;
        }
    };

    let config = match load_config(matches.get_one::<String>("config")) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("エラー: {}", e);
            return 1;
        }
    };

    if matches.get_flag("info") {
        config.print_summary();
        return 0;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ランタイム起動エラー: {}", e);
            return 1;
        }
    };

    match runtime.block_on(run_mission(config, matches.get_flag("plan-only"))) {
        Ok(None) => 0,
        Ok(Some(outcome)) => {
            println!("ミッション結果: {}", outcome);
            match outcome {
                MissionOutcome::Complete => 0,
                MissionOutcome::Cancelled(reason) => {
                    eprintln!("中止理由: {}", reason);
                    1
                }
                MissionOutcome::Interrupted => 130,
            }
        }
        Err(e) => {
            error!("ミッションを開始できません: {}", e);
            eprintln!("エラー: {}", e);
            1
        }
    }
}

/// 設定ファイルを読み込む。未指定ならデフォルト設定
fn load_config(path: Option<&String>) -> Result<MissionConfig, ConfigError> {
    match path {
        Some(path) => {
            let config = MissionConfig::from_file(path)?;
            info!("設定ファイル読み込み完了: {}", path);
            Ok(config)
        }
        None => {
            info!("設定ファイルが指定されていないため、デフォルト設定を使用します");
            let config = MissionConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// ミッション計画を作成
///
/// 設定に明示的な計画があればそれを使い、なければグリッドを生成して
/// 経路計画サービスで高密度化します。
async fn build_plan(config: &MissionConfig, startup_delay: Duration) -> Result<MissionPlan, Box<dyn std::error::Error>> {
    if let Some(rows) = &config.plan {
        info!("設定ファイルの計画を使用します ({}点)", rows.len());
        return Ok(MissionPlan::from_rows(rows)?);
    }

    let grid = grid::generate_grid(&config.grid.to_spec());
    info!("測量グリッドを生成しました: {}点", grid.len());

    let waypoints = if config.planner.enabled {
        let mut planner = SimPlanner::new(
            config.endpoints.planner_service.clone(),
            config.planner.step_m,
            startup_delay,
        );
        densify::densify(&mut planner, &grid).await
    } else {
        grid
    };

    Ok(MissionPlan::new(waypoints)?)
}

/// ミッションを実行
///
/// `plan_only` の場合は計画を表示して `None` を返します。
async fn run_mission(
    config: MissionConfig,
    plan_only: bool,
) -> Result<Option<MissionOutcome>, Box<dyn std::error::Error>> {
    let startup_delay = Duration::from_secs_f64(config.sim.startup_delay_s);
    let plan = build_plan(&config, startup_delay).await?;

    if plan_only {
        println!("=== ミッション計画 ({}点) ===", plan.len());
        for (i, wp) in plan.waypoints().iter().enumerate() {
            println!("{:4}: {}", i, wp);
        }
        return Ok(None);
    }

    let start = config.sim.start.to_position();
    let vehicle = Arc::new(Mutex::new(SimVehicle::new(start)));
    let (pose_tx, pose_rx) = watch::channel(start);
    let (roi_tx, roi_rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = watch::channel(false);

    info!("ポーズトピック '{}' を購読します", config.endpoints.pose_topic);
    info!("ROIトピック '{}' を購読します", config.endpoints.roi_topic);
    let driver = simulation::spawn_vehicle_loop(vehicle.clone(), config.sim.dt_s, pose_tx);
    let roi_script = simulation::spawn_roi_script(config.sim.roi_events.clone(), roi_tx);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C を受信しました");
            let _ = stop_tx.send(true);
        }
    });

    let server = SimFlightServer::new(vehicle, config.endpoints.flight_server.clone(), startup_delay);
    let engine = GuidanceEngine::new(plan, config.guidance.to_config(), server);
    let outcome = engine.run(pose_rx, roi_rx, stop_rx).await;

    interrupt.abort();
    roi_script.abort();
    driver.abort();

    Ok(Some(outcome))
}
