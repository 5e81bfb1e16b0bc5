use anyhow::Result;
use clap::{value_parser, Arg, Command};

use taskq::common::{start_application, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskq")
        .version("1.0.0")
        .about("进程内优先级任务队列与Worker池")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/taskq.toml 与 taskq.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("N")
                .help("Worker数量")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("demo-tasks")
                .long("demo-tasks")
                .value_name("N")
                .help("启动后提交的演示任务数量")
                .value_parser(value_parser!(usize))
                .default_value("0"),
        )
        .get_matches();

    let startup_config = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        workers: matches.get_one::<usize>("workers").copied(),
        demo_tasks: matches.get_one::<usize>("demo-tasks").copied().unwrap_or(0),
    };

    start_application(startup_config).await
}
