use std::time::Duration;

use anyhow::{Context, Result};
use taskq_core::{AppConfig, ConfigValidator, LogConfig, LogLevel, OutputFormat};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::Application;
use crate::shutdown::ShutdownManager;

/// 命令行传入的启动参数，覆盖配置文件中的对应项
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub workers: Option<usize>,
    pub demo_tasks: usize,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的日志级别
pub fn init_logging(log_config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_config.level.as_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_config.format {
        OutputFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        OutputFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = &startup_config.log_level {
        config.log.level = level.parse::<LogLevel>()?;
    }
    if let Some(format) = &startup_config.log_format {
        config.log.format = format.parse::<OutputFormat>()?;
    }
    if let Some(workers) = startup_config.workers {
        config.worker.pool_size = workers;
    }

    config.validate()?;
    Ok(config)
}

/// 启动应用并运行到收到关闭信号
pub async fn start_application(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(&config.log)?;

    info!("启动任务队列服务");
    if let Some(path) = &startup_config.config_path {
        info!("配置文件: {}", path);
    }

    let stop_timeout = config.worker.stop_timeout();
    let app = std::sync::Arc::new(Application::new(config));
    if startup_config.demo_tasks > 0 {
        app.submit_demo_tasks(startup_config.demo_tasks).await?;
    }

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = std::sync::Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // Worker池的停止预算之外再留出少量余量
    let budget = stop_timeout + Duration::from_secs(5);
    match tokio::time::timeout(budget, app_handle).await {
        Ok(Ok(())) => info!("任务队列服务已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    match app.status().await {
        Ok((queue_status, pool_status)) => info!(
            "退出时状态: 队列中 {} 个任务, 共登记 {} 个任务, {} 个Worker",
            queue_status.queue_size,
            queue_status.statistics.total_tasks,
            pool_status.workers.len()
        ),
        Err(e) => warn!("获取退出状态失败: {e}"),
    }

    info!("任务队列服务已退出");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_applies_overrides() {
        let startup = StartupConfig {
            log_level: Some("debug".to_string()),
            log_format: Some("json".to_string()),
            workers: Some(2),
            ..Default::default()
        };
        let config = load_config(&startup).unwrap();
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, OutputFormat::Json);
        assert_eq!(config.worker.pool_size, 2);
    }

    #[test]
    fn test_load_config_rejects_invalid_overrides() {
        let startup = StartupConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());

        let startup = StartupConfig {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/taskq.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }
}
