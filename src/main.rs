use clap::{Arg, ArgAction, Command};
use paper_sim::{
    core::config::AppConfig,
    simulation::{BacktestRunner, DataLoader, JournalSink, JsonlJournalSink, ScheduledOrder},
    utils::{init_logger, HmacSigner},
    ReplaySpeed,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 解析命令行参数
    let matches = Command::new("paper-sim")
        .version("0.1.0")
        .about("模拟盘回测引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("YAML配置文件路径，缺省使用内置默认值"),
        )
        .arg(
            Arg::new("ticks")
                .short('t')
                .long("ticks")
                .value_name("FILE")
                .help("行情数据 JSON 数组")
                .required(true),
        )
        .arg(
            Arg::new("orders")
                .short('o')
                .long("orders")
                .value_name("FILE")
                .help("预设订单 JSON 数组"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .help("随机种子，覆盖配置"),
        )
        .arg(
            Arg::new("speed")
                .long("speed")
                .value_name("SPEED")
                .help("回放速度: instant, turbo, fast, realtime"),
        )
        .arg(
            Arg::new("journal")
                .long("journal")
                .value_name("FILE")
                .help("交易日志以 JSON Lines 追加写入该文件"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .action(ArgAction::SetTrue)
                .help("输出完整回测报告而不只是绩效汇总"),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.replay.seed = *seed;
    }
    if let Some(speed) = matches.get_one::<String>("speed") {
        config.replay.speed = speed.parse::<ReplaySpeed>()?;
    }

    // 初始化日志系统
    if let Err(e) = init_logger(&config.log) {
        eprintln!("日志初始化失败: {}", e);
    }

    let ticks_file = matches
        .get_one::<String>("ticks")
        .ok_or("缺少 --ticks 参数")?;
    let loaded = DataLoader::load_file(ticks_file)?;
    log::info!(
        "📂 加载行情 {}: {} 个事件，丢弃 {} 条",
        ticks_file,
        loaded.events.len(),
        loaded.dropped
    );

    let orders: Vec<ScheduledOrder> = match matches.get_one::<String>("orders") {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    // 签名密钥只用于模拟，未设置时使用固定测试密钥
    let secret = std::env::var("PAPER_SIM_SIGNER_KEY").unwrap_or_else(|_| {
        log::warn!("⚠️ 未设置 PAPER_SIM_SIGNER_KEY，使用默认模拟密钥");
        "paper-sim".to_string()
    });
    let signer = Arc::new(HmacSigner::new("paper-wallet", secret));

    let journal_sink: Option<Arc<dyn JournalSink>> = match matches.get_one::<String>("journal") {
        Some(path) => Some(Arc::new(JsonlJournalSink::open(path)?)),
        None => None,
    };

    log::info!(
        "🚀 启动回测: 种子 {} 速度 {:?} 预设订单 {}",
        config.replay.seed,
        config.replay.speed,
        orders.len()
    );
    let runner = BacktestRunner::new(config, signer, journal_sink)?;
    let outcome = runner.run(&loaded.events, orders).await?;

    let output = if matches.get_flag("report") {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string_pretty(&outcome.result)?
    };
    println!("{}", output);
    Ok(())
}
